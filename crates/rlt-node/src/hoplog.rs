// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - HOP LOG
//
// Per-transaction forwarding observations. The transport reports each relay
// event it witnesses; the log keeps a hop counter and the ordered list of
// forwarder keys, which later feeds reward eligibility.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use rlt_core::TxId;

/// Bound on tracked transactions; the oldest entry falls out beyond this.
pub const HOP_LOG_CAP: usize = 1_000;

#[derive(Debug, Clone, Default)]
struct HopEntry {
    hops: u32,
    path: Vec<[u8; 32]>,
}

struct HopLogState {
    entries: HashMap<TxId, HopEntry>,
    insertion_order: VecDeque<TxId>,
}

/// Thread-safe hop counter + relay-path recorder.
pub struct HopLog {
    state: Mutex<HopLogState>,
}

impl Default for HopLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HopLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HopLogState {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Count one forwarding hop for a transaction.
    pub fn record(&self, tx_id: TxId) {
        self.record_relay(tx_id, None);
    }

    /// Count a hop and, when the transport identified the previous relay,
    /// append its key to the observed path.
    pub fn record_relay(&self, tx_id: TxId, previous_relay_pub: Option<[u8; 32]>) {
        let mut state = self.lock();
        if !state.entries.contains_key(&tx_id) {
            if state.insertion_order.len() == HOP_LOG_CAP {
                if let Some(evicted) = state.insertion_order.pop_front() {
                    state.entries.remove(&evicted);
                }
            }
            state.insertion_order.push_back(tx_id);
        }
        let entry = state.entries.entry(tx_id).or_default();
        entry.hops += 1;
        if let Some(pub_key) = previous_relay_pub {
            // The same relay showing up twice (loop) is recorded once
            if !entry.path.contains(&pub_key) {
                entry.path.push(pub_key);
            }
        }
    }

    /// Observed hop count, None for never-seen transactions.
    pub fn count(&self, tx_id: &TxId) -> Option<u32> {
        self.lock().entries.get(tx_id).map(|e| e.hops)
    }

    /// Ordered relay path observed so far, None for never-seen transactions.
    pub fn path(&self, tx_id: &TxId) -> Option<Vec<[u8; 32]>> {
        self.lock().entries.get(tx_id).map(|e| e.path.clone())
    }

    pub fn tracked(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HopLogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_after_three_records() {
        let log = HopLog::new();
        let id = TxId([1u8; 32]);
        log.record(id);
        log.record(id);
        log.record(id);

        assert_eq!(log.count(&id), Some(3));
        assert_eq!(log.count(&TxId([2u8; 32])), None);
    }

    #[test]
    fn test_path_accumulates_in_order() {
        let log = HopLog::new();
        let id = TxId([1u8; 32]);
        log.record_relay(id, Some([0xAA; 32]));
        log.record_relay(id, Some([0xBB; 32]));
        log.record_relay(id, None);

        assert_eq!(log.count(&id), Some(3));
        assert_eq!(log.path(&id), Some(vec![[0xAA; 32], [0xBB; 32]]));
    }

    #[test]
    fn test_duplicate_relay_recorded_once() {
        let log = HopLog::new();
        let id = TxId([1u8; 32]);
        log.record_relay(id, Some([0xAA; 32]));
        log.record_relay(id, Some([0xAA; 32]));

        assert_eq!(log.count(&id), Some(2));
        assert_eq!(log.path(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_bounded_eviction() {
        let log = HopLog::new();
        for i in 0..(HOP_LOG_CAP + 10) {
            let mut id = [0u8; 32];
            id[0..8].copy_from_slice(&(i as u64).to_le_bytes());
            log.record(TxId(id));
        }
        assert_eq!(log.tracked(), HOP_LOG_CAP);
        // The first entry was evicted
        let mut first = [0u8; 32];
        first[0..8].copy_from_slice(&0u64.to_le_bytes());
        assert_eq!(log.count(&TxId(first)), None);
    }
}
