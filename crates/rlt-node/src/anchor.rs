// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - ANCHORING SERVICE
//
// Periodically commits the DAG state to an external timestamping network.
// The root is a deterministic digest over the stats triple and the sorted
// tip set; submission runs through a narrow trait and resolves via an
// asynchronous callback into pending → confirmed | failed.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rlt_core::{RelayError, TxId};
use rlt_store::{DagStats, DagStorage};

/// Evaluation cadence for the anchoring scheduler.
pub const DEFAULT_ANCHOR_INTERVAL_SECS: u64 = 3_600;

/// Minimum spacing between two anchors.
pub const DEFAULT_MIN_ANCHOR_INTERVAL_SECS: u64 = 1_800;

/// Minimum new-transaction delta before an anchor is worth submitting.
pub const DEFAULT_MIN_TX_FOR_ANCHOR: u64 = 10;

/// Ring buffer bound on retained anchor records.
pub const ANCHOR_RING_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One anchor candidate and its submission lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    pub id: u64,
    pub root: [u8; 32],
    pub tx_count: u64,
    pub tip_count: u64,
    pub total_weight: u64,
    pub created_at: u64,
    pub status: AnchorStatus,
    pub confirmation_time: Option<u64>,
}

/// External-network submission contract. `submit` only initiates; the
/// transport reports the outcome later through `AnchoringService::resolve`.
pub trait AnchorSubmitter: Send + Sync {
    fn submit(&self, record: &AnchorRecord) -> Result<(), String>;
}

/// Test/default submitter that records what it was asked to submit.
#[derive(Default)]
pub struct RecordingSubmitter {
    submitted: Mutex<Vec<(u64, [u8; 32])>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<(u64, [u8; 32])> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AnchorSubmitter for RecordingSubmitter {
    fn submit(&self, record: &AnchorRecord) -> Result<(), String> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((record.id, record.root));
        Ok(())
    }
}

/// Deterministic stats-root:
/// SHA-256(total_le8 || tip_count_le8 || total_weight_le8 || sorted tip ids).
/// Collaborators verify against exactly this layout.
pub fn compute_root(stats: &DagStats, tips: &[TxId]) -> [u8; 32] {
    let mut sorted: Vec<TxId> = tips.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(stats.total.to_le_bytes());
    hasher.update(stats.tip_count.to_le_bytes());
    hasher.update(stats.total_weight.to_le_bytes());
    for tip in &sorted {
        hasher.update(tip.as_bytes());
    }
    hasher.finalize().into()
}

struct AnchorState {
    anchors: VecDeque<AnchorRecord>,
    next_id: u64,
}

pub struct AnchoringService {
    dag: Arc<DagStorage>,
    submitter: Arc<dyn AnchorSubmitter>,
    min_interval_secs: u64,
    min_tx_delta: u64,
    state: Mutex<AnchorState>,
}

impl AnchoringService {
    pub fn new(
        dag: Arc<DagStorage>,
        submitter: Arc<dyn AnchorSubmitter>,
        min_interval_secs: u64,
        min_tx_delta: u64,
    ) -> Self {
        Self {
            dag,
            submitter,
            min_interval_secs,
            min_tx_delta,
            state: Mutex::new(AnchorState {
                anchors: VecDeque::with_capacity(ANCHOR_RING_CAP),
                next_id: 1,
            }),
        }
    }

    pub fn with_defaults(dag: Arc<DagStorage>, submitter: Arc<dyn AnchorSubmitter>) -> Self {
        Self::new(
            dag,
            submitter,
            DEFAULT_MIN_ANCHOR_INTERVAL_SECS,
            DEFAULT_MIN_TX_FOR_ANCHOR,
        )
    }

    /// Root over the current DAG state.
    pub fn current_root(&self) -> Result<[u8; 32], RelayError> {
        let stats = self.dag.stats();
        let tips = self.dag.get_tips()?;
        Ok(compute_root(&stats, &tips))
    }

    /// Scheduler tick: anchor iff (a) no prior anchor or the minimum
    /// interval elapsed, (b) the root moved, and (c) enough new
    /// transactions accumulated. Returns the new anchor id when a
    /// submission was initiated.
    ///
    /// A submitter error marks the record failed immediately and is
    /// recorded, never thrown; the scheduling loop must survive flaky
    /// uplinks.
    pub fn evaluate(&self, now: u64) -> Result<Option<u64>, RelayError> {
        let stats = self.dag.stats();
        let tips = self.dag.get_tips()?;
        let root = compute_root(&stats, &tips);

        let (last_created, last_root, last_tx_count) = {
            let state = self.lock();
            match state.anchors.back() {
                Some(last) => (Some(last.created_at), Some(last.root), last.tx_count),
                None => (None, None, 0),
            }
        };

        if let Some(created) = last_created {
            if now.saturating_sub(created) < self.min_interval_secs {
                return Ok(None);
            }
        }
        if last_root == Some(root) {
            return Ok(None);
        }
        if stats.total.saturating_sub(last_tx_count) < self.min_tx_delta {
            return Ok(None);
        }

        let record = {
            let mut state = self.lock();
            let record = AnchorRecord {
                id: state.next_id,
                root,
                tx_count: stats.total,
                tip_count: stats.tip_count,
                total_weight: stats.total_weight,
                created_at: now,
                status: AnchorStatus::Pending,
                confirmation_time: None,
            };
            state.next_id += 1;
            if state.anchors.len() == ANCHOR_RING_CAP {
                state.anchors.pop_front();
            }
            state.anchors.push_back(record.clone());
            record
        };

        log::info!(
            "Anchoring DAG state: {} txs, {} tips, root {}",
            record.tx_count,
            record.tip_count,
            hex::encode(&record.root[..8])
        );

        if let Err(e) = self.submitter.submit(&record) {
            log::warn!("Anchor submission failed to start: {}", e);
            self.resolve(record.id, false, now);
        }

        Ok(Some(record.id))
    }

    /// Asynchronous submission callback: flips a pending record to
    /// confirmed or failed. Unknown ids (rotated out of the ring) are
    /// ignored.
    pub fn resolve(&self, anchor_id: u64, success: bool, now: u64) {
        let mut state = self.lock();
        if let Some(record) = state.anchors.iter_mut().find(|a| a.id == anchor_id) {
            if success {
                record.status = AnchorStatus::Confirmed;
                record.confirmation_time = Some(now);
            } else {
                record.status = AnchorStatus::Failed;
            }
        }
    }

    /// Most recent anchor record of any status.
    pub fn latest(&self) -> Option<AnchorRecord> {
        self.lock().anchors.back().cloned()
    }

    /// Most recent confirmed anchor.
    pub fn latest_confirmed(&self) -> Option<AnchorRecord> {
        self.lock()
            .anchors
            .iter()
            .rev()
            .find(|a| a.status == AnchorStatus::Confirmed)
            .cloned()
    }

    /// All retained anchors, oldest first.
    pub fn anchors(&self) -> Vec<AnchorRecord> {
        self.lock().anchors.iter().cloned().collect()
    }

    /// Descendant-by-growth integrity check: the current state matches the
    /// latest confirmed anchor exactly, or has grown past it. With no
    /// confirmed anchor yet there is nothing to contradict.
    pub fn verify_integrity(&self) -> Result<bool, RelayError> {
        let anchor = match self.latest_confirmed() {
            Some(a) => a,
            None => return Ok(true),
        };
        let root = self.current_root()?;
        if root == anchor.root {
            return Ok(true);
        }
        Ok(self.dag.stats().total >= anchor.tx_count)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnchorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
