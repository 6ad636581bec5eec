// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - PERSISTENT STORAGE
//
// sled embedded database for the two durable stores:
//   - DAG storage: signed relay transactions with tip maintenance + pruning
//   - Wallet ledger: balances and append-only history with idempotent rows
// Both give atomic cross-key commits and crash-safe updates.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod dag;
pub mod wallet;

pub use dag::{DagStats, DagStorage};
pub use wallet::{
    TransactionType, WalletConfig, WalletHistoryEntry, WalletLedger, WalletStatistics,
    WalletSummary,
};

/// Seconds since the Unix epoch. Storage rows carry this as created_at.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
