// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - WALLET LEDGER
//
// Durable balance + history store. Every successful award or spend commits
// the balance delta and exactly one history row in a single atomic unit.
// History rows are keyed (public_key, transaction_id), so replayed rewards
// and retry storms collapse into one credit.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use std::sync::Mutex;

use rlt_core::{RelayError, TxId, MICRO_RLT_PER_RLT};

use crate::now_secs;

const TREE_WALLETS: &str = "wallets";
const TREE_HISTORY: &str = "wallet_history";

/// Wallet creation policy. Production defaults to a zero starting balance;
/// the development profile seeds first-touch wallets so relay rewards can
/// be exercised without a faucet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletConfig {
    pub initial_balance_micro_rlt: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            initial_balance_micro_rlt: 0,
        }
    }
}

impl WalletConfig {
    /// Development/testing profile: 100 000 µRLT granted on lazy creation.
    pub fn development() -> Self {
        Self {
            initial_balance_micro_rlt: 100_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WalletRow {
    public_key: String,
    balance_micro_rlt: u64,
    created_at: u64,
    last_updated: u64,
}

/// Kind of a wallet history entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Reward,
    Spend,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WalletHistoryEntry {
    pub public_key: String,
    pub transaction_id: String,
    pub amount: u64,
    #[serde(rename = "type")]
    pub entry_type: TransactionType,
    pub created_at: u64,
    /// Monotonic counter; orders entries created within the same second.
    pub seq: u64,
    pub description: String,
}

/// Point-in-time wallet view for the inspection surface.
#[derive(Debug, Clone)]
pub struct WalletSummary {
    pub balance_micro_rlt: u64,
    pub balance_rlt: f64,
    pub recent_history: Vec<WalletHistoryEntry>,
}

/// Totals across all wallets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletStatistics {
    pub wallet_count: u64,
    pub total_balance_micro_rlt: u64,
    pub history_entries: u64,
}

struct WalletInner {
    wallets: sled::Tree,
    history: sled::Tree,
}

/// Persistent wallet store. Mutations serialize through a single writer
/// lock; each mutation commits wallet row + history row atomically across
/// both trees, all-or-nothing.
pub struct WalletLedger {
    db: sled::Db,
    config: WalletConfig,
    inner: Mutex<WalletInner>,
}

impl WalletLedger {
    pub fn open<P: AsRef<Path>>(path: P, config: WalletConfig) -> Result<Self, RelayError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| RelayError::DatabaseError(format!("Failed to open wallet db: {}", e)))?;
        let wallets = db
            .open_tree(TREE_WALLETS)
            .map_err(|e| RelayError::DatabaseError(format!("Failed to open wallets tree: {}", e)))?;
        let history = db.open_tree(TREE_HISTORY).map_err(|e| {
            RelayError::DatabaseError(format!("Failed to open history tree: {}", e))
        })?;
        Ok(Self {
            db,
            config,
            inner: Mutex::new(WalletInner { wallets, history }),
        })
    }

    /// Composite history key: public_key (32) || transaction_id (32).
    fn history_key(public_key: &[u8; 32], tx_id: &TxId) -> [u8; 64] {
        let mut key = [0u8; 64];
        key[..32].copy_from_slice(public_key);
        key[32..].copy_from_slice(tx_id.as_bytes());
        key
    }

    /// Create a wallet if absent. Races to create the same wallet collapse
    /// into one row, never an error.
    pub fn create(&self, public_key: &[u8; 32]) -> Result<(), RelayError> {
        let inner = self.lock();
        self.ensure_wallet_tree(&inner.wallets, public_key)?;
        inner
            .wallets
            .flush()
            .map_err(|e| RelayError::DatabaseError(format!("Failed to flush wallet: {}", e)))?;
        Ok(())
    }

    /// Balance in µRLT. Lazily creates the wallet at the configured initial
    /// balance on first reference.
    pub fn balance(&self, public_key: &[u8; 32]) -> Result<u64, RelayError> {
        let inner = self.lock();
        let row = self.ensure_wallet_tree(&inner.wallets, public_key)?;
        Ok(row.balance_micro_rlt)
    }

    /// Credit a relay reward. Atomic: wallet ensured, balance incremented,
    /// one history row inserted. A duplicate (public_key, tx_id) is a
    /// silent no-op, so retry storms cannot double-credit.
    pub fn award_reward(
        &self,
        public_key: &[u8; 32],
        amount: u64,
        tx_id: &TxId,
    ) -> Result<(), RelayError> {
        self.apply(
            public_key,
            amount,
            tx_id,
            TransactionType::Reward,
            format!("Relay reward for tx {}", tx_id.short()),
        )
    }

    /// Debit a spend. Fails with InsufficientBalance when the wallet cannot
    /// cover the amount; on success the debit and its history row commit
    /// together. Duplicate (public_key, tx_id) rows are silently skipped.
    pub fn spend(
        &self,
        public_key: &[u8; 32],
        amount: u64,
        tx_id: &TxId,
        description: &str,
    ) -> Result<(), RelayError> {
        self.apply(
            public_key,
            amount,
            tx_id,
            TransactionType::Spend,
            description.to_string(),
        )
    }

    fn apply(
        &self,
        public_key: &[u8; 32],
        amount: u64,
        tx_id: &TxId,
        entry_type: TransactionType,
        description: String,
    ) -> Result<(), RelayError> {
        let inner = self.lock();
        let key = Self::history_key(public_key, tx_id);
        let pub_hex = hex::encode(public_key);
        let now = now_secs();
        let seq = self
            .db
            .generate_id()
            .map_err(|e| RelayError::DatabaseError(format!("Failed to generate seq: {}", e)))?;
        let initial = self.config.initial_balance_micro_rlt;

        let entry = WalletHistoryEntry {
            public_key: pub_hex.clone(),
            transaction_id: tx_id.to_hex(),
            amount,
            entry_type,
            created_at: now,
            seq,
            description,
        };
        let entry_bytes = serde_json::to_vec(&entry)
            .map_err(|e| RelayError::DatabaseError(format!("Failed to serialize entry: {}", e)))?;

        let result: Result<(), TransactionError<RelayError>> =
            (&inner.wallets, &inner.history).transaction(|(w, h)| {
                // Composite-key idempotence: the same (pub, tx_id) never
                // produces a second balance delta.
                if h.get(key.as_slice())?.is_some() {
                    return Ok(());
                }

                let mut wallet = match w.get(pub_hex.as_bytes())? {
                    Some(bytes) => serde_json::from_slice::<WalletRow>(&bytes).map_err(|e| {
                        ConflictableTransactionError::Abort(RelayError::DatabaseError(format!(
                            "Failed to deserialize wallet: {}",
                            e
                        )))
                    })?,
                    None => WalletRow {
                        public_key: pub_hex.clone(),
                        balance_micro_rlt: initial,
                        created_at: now,
                        last_updated: now,
                    },
                };

                match entry_type {
                    TransactionType::Reward | TransactionType::Unknown => {
                        wallet.balance_micro_rlt =
                            wallet.balance_micro_rlt.saturating_add(amount);
                    }
                    TransactionType::Spend => {
                        if wallet.balance_micro_rlt < amount {
                            return Err(ConflictableTransactionError::Abort(
                                RelayError::InsufficientBalance {
                                    required: amount,
                                    available: wallet.balance_micro_rlt,
                                },
                            ));
                        }
                        wallet.balance_micro_rlt -= amount;
                    }
                }
                wallet.last_updated = now;

                let wallet_bytes = serde_json::to_vec(&wallet).map_err(|e| {
                    ConflictableTransactionError::Abort(RelayError::DatabaseError(format!(
                        "Failed to serialize wallet: {}",
                        e
                    )))
                })?;
                w.insert(pub_hex.as_bytes(), wallet_bytes.as_slice())?;
                h.insert(key.as_slice(), entry_bytes.as_slice())?;
                Ok(())
            });
        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => {
                return Err(RelayError::DatabaseError(format!(
                    "Atomic wallet update failed: {}",
                    e
                )))
            }
        }

        self.db
            .flush()
            .map_err(|e| RelayError::DatabaseError(format!("Failed to flush wallet: {}", e)))?;
        Ok(())
    }

    /// History entries for a wallet, newest first.
    pub fn history(
        &self,
        public_key: &[u8; 32],
        limit: usize,
    ) -> Result<Vec<WalletHistoryEntry>, RelayError> {
        let inner = self.lock();
        let mut entries: Vec<WalletHistoryEntry> = Vec::new();
        for item in inner.history.scan_prefix(public_key) {
            let (_, value) = item
                .map_err(|e| RelayError::DatabaseError(format!("Failed to read history: {}", e)))?;
            let entry: WalletHistoryEntry = serde_json::from_slice(&value).map_err(|e| {
                RelayError::DatabaseError(format!("Failed to deserialize entry: {}", e))
            })?;
            entries.push(entry);
        }
        entries.sort_unstable_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Balance plus the ten most recent history rows.
    pub fn summary(&self, public_key: &[u8; 32]) -> Result<WalletSummary, RelayError> {
        let balance = self.balance(public_key)?;
        let recent_history = self.history(public_key, 10)?;
        Ok(WalletSummary {
            balance_micro_rlt: balance,
            balance_rlt: balance as f64 / MICRO_RLT_PER_RLT as f64,
            recent_history,
        })
    }

    /// Totals across every wallet.
    pub fn statistics(&self) -> Result<WalletStatistics, RelayError> {
        let inner = self.lock();
        let mut wallet_count = 0u64;
        let mut total_balance = 0u64;
        for item in inner.wallets.iter() {
            let (_, value) = item
                .map_err(|e| RelayError::DatabaseError(format!("Failed to read wallet: {}", e)))?;
            let row: WalletRow = serde_json::from_slice(&value).map_err(|e| {
                RelayError::DatabaseError(format!("Failed to deserialize wallet: {}", e))
            })?;
            wallet_count += 1;
            total_balance = total_balance.saturating_add(row.balance_micro_rlt);
        }
        Ok(WalletStatistics {
            wallet_count,
            total_balance_micro_rlt: total_balance,
            history_entries: inner.history.len() as u64,
        })
    }

    /// Get-or-create inside an already-held lock.
    fn ensure_wallet_tree(
        &self,
        wallets: &sled::Tree,
        public_key: &[u8; 32],
    ) -> Result<WalletRow, RelayError> {
        let pub_hex = hex::encode(public_key);
        if let Some(bytes) = wallets
            .get(pub_hex.as_bytes())
            .map_err(|e| RelayError::DatabaseError(format!("Failed to read wallet: {}", e)))?
        {
            return serde_json::from_slice(&bytes).map_err(|e| {
                RelayError::DatabaseError(format!("Failed to deserialize wallet: {}", e))
            });
        }
        let now = now_secs();
        let row = WalletRow {
            public_key: pub_hex.clone(),
            balance_micro_rlt: self.config.initial_balance_micro_rlt,
            created_at: now,
            last_updated: now,
        };
        let bytes = serde_json::to_vec(&row)
            .map_err(|e| RelayError::DatabaseError(format!("Failed to serialize wallet: {}", e)))?;
        wallets
            .insert(pub_hex.as_bytes(), bytes)
            .map_err(|e| RelayError::DatabaseError(format!("Failed to create wallet: {}", e)))?;
        Ok(row)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WalletInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp(config: WalletConfig) -> (WalletLedger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = WalletLedger::open(dir.path().join("wallet"), config).unwrap();
        (ledger, dir)
    }

    fn tx(n: u8) -> TxId {
        TxId([n; 32])
    }

    const ALICE: [u8; 32] = [0xA1u8; 32];
    const BOB: [u8; 32] = [0xB0u8; 32];

    #[test]
    fn test_lazy_creation_with_initial_balance() {
        let (ledger, _dir) = open_temp(WalletConfig::development());
        assert_eq!(ledger.balance(&ALICE).unwrap(), 100_000);

        let (prod, _dir2) = open_temp(WalletConfig::default());
        assert_eq!(prod.balance(&ALICE).unwrap(), 0);
    }

    #[test]
    fn test_create_is_idempotent() {
        let (ledger, _dir) = open_temp(WalletConfig::development());
        ledger.create(&ALICE).unwrap();
        ledger.award_reward(&ALICE, 50, &tx(1)).unwrap();
        // A second create must not reset the balance
        ledger.create(&ALICE).unwrap();
        assert_eq!(ledger.balance(&ALICE).unwrap(), 100_050);
    }

    #[test]
    fn test_award_reward_idempotent() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 100, &tx(7)).unwrap();
        ledger.award_reward(&ALICE, 100, &tx(7)).unwrap();

        assert_eq!(ledger.balance(&ALICE).unwrap(), 100);
        assert_eq!(ledger.history(&ALICE, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_award_different_txs_accumulate() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 100, &tx(1)).unwrap();
        ledger.award_reward(&ALICE, 250, &tx(2)).unwrap();
        assert_eq!(ledger.balance(&ALICE).unwrap(), 350);
        assert_eq!(ledger.history(&ALICE, 100).unwrap().len(), 2);
    }

    #[test]
    fn test_spend_requires_balance() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 100, &tx(1)).unwrap();

        let err = ledger.spend(&ALICE, 200, &tx(2), "send fee").unwrap_err();
        assert_eq!(
            err,
            RelayError::InsufficientBalance {
                required: 200,
                available: 100
            }
        );
        // Failed spend leaves no history row and no balance change
        assert_eq!(ledger.balance(&ALICE).unwrap(), 100);
        assert_eq!(ledger.history(&ALICE, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_spend_success_and_idempotence() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 500, &tx(1)).unwrap();
        ledger.spend(&ALICE, 200, &tx(2), "message fee").unwrap();
        assert_eq!(ledger.balance(&ALICE).unwrap(), 300);

        // Replayed spend with the same tx id: no double debit
        ledger.spend(&ALICE, 200, &tx(2), "message fee").unwrap();
        assert_eq!(ledger.balance(&ALICE).unwrap(), 300);
        assert_eq!(ledger.history(&ALICE, 100).unwrap().len(), 2);
    }

    #[test]
    fn test_balance_equals_signed_history_sum() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 1_000, &tx(1)).unwrap();
        ledger.award_reward(&ALICE, 500, &tx(2)).unwrap();
        ledger.spend(&ALICE, 300, &tx(3), "fee").unwrap();

        let history = ledger.history(&ALICE, 100).unwrap();
        let signed_sum: i64 = history
            .iter()
            .map(|e| match e.entry_type {
                TransactionType::Spend => -(e.amount as i64),
                _ => e.amount as i64,
            })
            .sum();
        assert_eq!(ledger.balance(&ALICE).unwrap() as i64, signed_sum);
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        for i in 1..=5u8 {
            ledger.award_reward(&ALICE, i as u64 * 10, &tx(i)).unwrap();
        }
        let history = ledger.history(&ALICE, 3).unwrap();
        assert_eq!(history.len(), 3);
        // Newest (last awarded) first
        assert_eq!(history[0].amount, 50);
        assert_eq!(history[1].amount, 40);
        assert_eq!(history[2].amount, 30);
    }

    #[test]
    fn test_history_scoped_per_wallet() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 10, &tx(1)).unwrap();
        ledger.award_reward(&BOB, 20, &tx(1)).unwrap();

        let alice_history = ledger.history(&ALICE, 100).unwrap();
        assert_eq!(alice_history.len(), 1);
        assert_eq!(alice_history[0].amount, 10);
        assert_eq!(ledger.history(&BOB, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_summary() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 2_500_000, &tx(1)).unwrap();

        let summary = ledger.summary(&ALICE).unwrap();
        assert_eq!(summary.balance_micro_rlt, 2_500_000);
        assert!((summary.balance_rlt - 2.5).abs() < 1e-9);
        assert_eq!(summary.recent_history.len(), 1);
    }

    #[test]
    fn test_statistics() {
        let (ledger, _dir) = open_temp(WalletConfig::default());
        ledger.award_reward(&ALICE, 100, &tx(1)).unwrap();
        ledger.award_reward(&BOB, 200, &tx(1)).unwrap();
        ledger.spend(&BOB, 50, &tx(2), "fee").unwrap();

        let stats = ledger.statistics().unwrap();
        assert_eq!(stats.wallet_count, 2);
        assert_eq!(stats.total_balance_micro_rlt, 250);
        assert_eq!(stats.history_entries, 3);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        {
            let ledger = WalletLedger::open(&path, WalletConfig::default()).unwrap();
            ledger.award_reward(&ALICE, 777, &tx(1)).unwrap();
        }
        let reopened = WalletLedger::open(&path, WalletConfig::default()).unwrap();
        assert_eq!(reopened.balance(&ALICE).unwrap(), 777);
        assert_eq!(reopened.history(&ALICE, 10).unwrap().len(), 1);
    }
}
