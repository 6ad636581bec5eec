// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - REWARD DISTRIBUTOR
//
// Decides who gets paid for forwarding a transaction and attempts the
// credit. Senders are never paid for their own sends; the sender and the
// final recipient are filtered out of the relay path. Transient wallet
// failures land in a retry queue and are dropped after five attempts.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Arc, Mutex};

use rlt_core::{SignedRelayTx, TxId};
use rlt_store::WalletLedger;

use crate::now_secs;

/// A pending reward is discarded once it has failed this many retries.
pub const MAX_REWARD_RETRIES: u32 = 5;

/// A reward credit that failed transiently and awaits retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReward {
    pub id: u64,
    pub node: [u8; 32],
    pub amount_micro_rlt: u64,
    pub tx_id: TxId,
    pub retries: u32,
    pub created_at: u64,
}

/// Cumulative distribution counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardStats {
    pub distributed_micro_rlt: u64,
    pub nodes_rewarded: u64,
    pub pending_count: usize,
    pub pending_total_micro_rlt: u64,
}

struct DistributorState {
    pending: Vec<PendingReward>,
    next_pending_id: u64,
    distributed_micro_rlt: u64,
    nodes_rewarded: u64,
}

/// Credits relay rewards through the wallet ledger. Idempotence comes from
/// the wallet's (public_key, tx_id) composite key, so retries and replays
/// can never double-pay.
pub struct RewardDistributor {
    wallet: Arc<WalletLedger>,
    /// Our own verifying key; locally-originated sends earn nothing.
    local_pub: [u8; 32],
    state: Mutex<DistributorState>,
}

impl RewardDistributor {
    pub fn new(wallet: Arc<WalletLedger>, local_pub: [u8; 32]) -> Self {
        Self {
            wallet,
            local_pub,
            state: Mutex::new(DistributorState {
                pending: Vec::new(),
                next_pending_id: 1,
                distributed_micro_rlt: 0,
                nodes_rewarded: 0,
            }),
        }
    }

    /// Distribute rewards for an admitted transaction.
    ///
    /// - Locally-originated (sender is self): no relay reward at all.
    /// - With a relay path: every observed forwarder except the sender and
    ///   the final recipient earns fee_per_hop µRLT.
    /// - Without a path: the sender is credited fee_per_hop once, the
    ///   observer-only fallback used by accounting tests.
    ///
    /// Failures never propagate to admission: failed credits queue for
    /// retry and the error is logged.
    pub fn distribute(
        &self,
        tx: &SignedRelayTx,
        relay_path: Option<&[[u8; 32]]>,
        final_recipient: Option<&[u8; 32]>,
    ) {
        let fee = tx.tx.fee_per_hop as u64;
        if fee == 0 {
            return;
        }
        if tx.tx.sender_pub == self.local_pub {
            return;
        }

        let tx_id = tx.id();
        match relay_path {
            Some(path) => {
                for node in path {
                    if node == &tx.tx.sender_pub {
                        continue;
                    }
                    if let Some(recipient) = final_recipient {
                        if node == recipient {
                            continue;
                        }
                    }
                    self.try_award(*node, fee, tx_id);
                }
            }
            None => {
                self.try_award(tx.tx.sender_pub, fee, tx_id);
            }
        }
    }

    /// One credit attempt; transient failure parks it in the retry queue.
    fn try_award(&self, node: [u8; 32], amount: u64, tx_id: TxId) {
        match self.wallet.award_reward(&node, amount, &tx_id) {
            Ok(()) => {
                let mut state = self.lock();
                state.distributed_micro_rlt += amount;
                state.nodes_rewarded += 1;
            }
            Err(e) => {
                log::warn!(
                    "Reward credit failed for tx {} (will retry): {}",
                    tx_id.short(),
                    e
                );
                let mut state = self.lock();
                let id = state.next_pending_id;
                state.next_pending_id += 1;
                state.pending.push(PendingReward {
                    id,
                    node,
                    amount_micro_rlt: amount,
                    tx_id,
                    retries: 0,
                    created_at: now_secs(),
                });
            }
        }
    }

    /// Re-attempt every queued reward. Successes leave the queue; failures
    /// increment their retry counter and are discarded once they hit
    /// MAX_REWARD_RETRIES. Returns how many credits succeeded.
    pub fn retry_all(&self) -> usize {
        let queued: Vec<PendingReward> = {
            let mut state = self.lock();
            std::mem::take(&mut state.pending)
        };

        let mut succeeded = 0usize;
        let mut still_pending: Vec<PendingReward> = Vec::new();
        for mut entry in queued {
            match self
                .wallet
                .award_reward(&entry.node, entry.amount_micro_rlt, &entry.tx_id)
            {
                Ok(()) => {
                    succeeded += 1;
                    let mut state = self.lock();
                    state.distributed_micro_rlt += entry.amount_micro_rlt;
                    state.nodes_rewarded += 1;
                }
                Err(e) => {
                    entry.retries += 1;
                    if entry.retries >= MAX_REWARD_RETRIES {
                        log::warn!(
                            "Dropping reward for tx {} after {} retries: {}",
                            entry.tx_id.short(),
                            entry.retries,
                            e
                        );
                    } else {
                        still_pending.push(entry);
                    }
                }
            }
        }

        if !still_pending.is_empty() {
            let mut state = self.lock();
            state.pending.extend(still_pending);
        }
        succeeded
    }

    /// Snapshot of the retry queue.
    pub fn pending(&self) -> Vec<PendingReward> {
        self.lock().pending.clone()
    }

    pub fn stats(&self) -> RewardStats {
        let state = self.lock();
        RewardStats {
            distributed_micro_rlt: state.distributed_micro_rlt,
            nodes_rewarded: state.nodes_rewarded,
            pending_count: state.pending.len(),
            pending_total_micro_rlt: state
                .pending
                .iter()
                .map(|p| p.amount_micro_rlt)
                .sum(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DistributorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
