// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - NODE CONFIGURATION
//
// TOML-loadable settings for a device-local node. Every field has a
// production default; the development profile seeds wallets so relay
// rewards can be exercised without a faucet.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::path::Path;

use rlt_core::RelayError;
use rlt_store::dag::DEFAULT_MAX_TRANSACTIONS;

use crate::anchor::{
    DEFAULT_ANCHOR_INTERVAL_SECS, DEFAULT_MIN_ANCHOR_INTERVAL_SECS, DEFAULT_MIN_TX_FOR_ANCHOR,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// DAG store directory.
    pub dag_path: String,
    /// Wallet store directory.
    pub wallet_path: String,
    /// DAG retention bound; pruning kicks in beyond it.
    pub max_transactions: usize,
    /// Balance granted on lazy wallet creation (0 in production).
    pub initial_balance_micro_rlt: u64,
    /// Anchoring scheduler cadence.
    pub anchor_interval_secs: u64,
    /// Minimum spacing between anchors.
    pub min_anchor_interval_secs: u64,
    /// Minimum new-tx delta per anchor.
    pub min_tx_for_anchor: u64,
    /// Beacon sweep cadence.
    pub beacon_sweep_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            dag_path: "rlt_dag".to_string(),
            wallet_path: "rlt_wallet".to_string(),
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            initial_balance_micro_rlt: 0,
            anchor_interval_secs: DEFAULT_ANCHOR_INTERVAL_SECS,
            min_anchor_interval_secs: DEFAULT_MIN_ANCHOR_INTERVAL_SECS,
            min_tx_for_anchor: DEFAULT_MIN_TX_FOR_ANCHOR,
            beacon_sweep_secs: rlt_net::BEACON_SWEEP_SECS,
        }
    }
}

impl NodeConfig {
    /// Development profile: the 100 000 µRLT first-touch grant.
    pub fn development() -> Self {
        Self {
            initial_balance_micro_rlt: 100_000,
            ..Self::default()
        }
    }

    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::InvalidData(format!("cannot read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| RelayError::InvalidData(format!("cannot parse config: {}", e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
