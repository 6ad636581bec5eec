// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - NODE MODULE
//
// Wires the relay-token subsystems into one device-local node: transaction
// admission, relay rewards, hop observation, anchoring, and the
// transport-facing entry points. The BLE/Wi-Fi transport, UI, and key
// store are external collaborators behind the RelayNode surface.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod anchor;
pub mod config;
pub mod hoplog;
pub mod node;
pub mod processor;
pub mod rewards;

pub use anchor::{
    compute_root, AnchorRecord, AnchorStatus, AnchorSubmitter, AnchoringService,
    RecordingSubmitter,
};
pub use config::NodeConfig;
pub use hoplog::HopLog;
pub use node::{OutboundMessage, RelayNode};
pub use processor::{AdmitOutcome, ProcessorStats, TransactionProcessor};
pub use rewards::{PendingReward, RewardDistributor, RewardStats, MAX_REWARD_RETRIES};

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
