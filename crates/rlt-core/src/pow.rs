// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - PROOF-OF-WORK ENGINE
//
// Anti-spam PoW for underpaying senders: a message whose declared fee falls
// below the relay's advertised minimum must carry a leading-zero-bit proof
// bound to (message, sender, timestamp).
//
// Difficulty is NOT consensus PoW. It scales with network conditions so
// the expected search time stays inside a sub-10-second band on phone-class
// CPUs.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::RelayError;

/// Difficulty floor: 1 leading zero bit (≈2 hash attempts on average).
pub const MIN_DIFFICULTY: u8 = 1;

/// Difficulty ceiling: 8 leading zero bits (≈256 attempts).
/// Anything above this is unfriendly to low-end phone CPUs.
pub const MAX_DIFFICULTY: u8 = 8;

/// Number of accepted computations per difficulty evaluation window.
pub const DIFFICULTY_WINDOW: usize = 50;

/// Base target search time before network scaling (seconds).
pub const BASE_TARGET_SECS: f64 = 2.0;

/// Clamp bounds for the network-aware target time.
pub const MIN_TARGET_SECS: f64 = 0.5;
pub const MAX_TARGET_SECS: f64 = 10.0;

/// Search loops between cancellation checks. Checking the flag every hash
/// would dominate the loop at low difficulties.
pub const CANCEL_CHECK_INTERVAL: u64 = 10_000;

/// Bounded ring of recent network metric snapshots kept for inspection.
pub const METRICS_RING_CAP: usize = 100;

/// PoW is required exactly when the declared fee undercuts the relay's
/// advertised minimum.
pub fn requires_pow(msg_fee_micro_rlt: u64, relay_min_fee_micro_rlt: u64) -> bool {
    msg_fee_micro_rlt < relay_min_fee_micro_rlt
}

/// An accepted proof-of-work computation.
#[derive(Debug, Clone, PartialEq)]
pub struct PowResult {
    pub nonce: u64,
    pub hash: [u8; 32],
    pub difficulty: u8,
    /// Wall-clock search time in seconds.
    pub compute_time: f64,
}

/// Snapshot of network conditions published by the transport layer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct NetworkMetrics {
    pub active_nodes: u32,
    pub msgs_per_sec: f64,
    /// Current token value in µRLT.
    pub token_value_micro_rlt: u64,
}

/// Compute the PoW digest: SHA-256(message || sender_pub || ts_le8 || nonce_le8).
pub fn compute_pow_hash(
    message: &[u8],
    sender_pub: &[u8; 32],
    timestamp: u64,
    nonce: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.update(sender_pub);
    hasher.update(timestamp.to_le_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.finalize().into()
}

/// Count leading zero bits in a byte array.
pub fn count_leading_zero_bits(bytes: &[u8]) -> u32 {
    let mut zero_bits = 0u32;
    for byte in bytes {
        if *byte == 0 {
            zero_bits += 8;
        } else {
            zero_bits += byte.leading_zeros();
            break;
        }
    }
    zero_bits
}

/// True if the digest carries at least `difficulty` leading zero bits.
/// Bit-level: difficulty/8 whole zero bytes, then the top difficulty%8 bits
/// of the next byte zero.
pub fn meets_difficulty(hash: &[u8; 32], difficulty: u8) -> bool {
    count_leading_zero_bits(hash) >= difficulty as u32
}

/// Search nonces from 0 upward until the digest meets `difficulty`.
/// Checks the cancel flag every CANCEL_CHECK_INTERVAL iterations; returns
/// None when cancelled. Callers impose their own time limits; the
/// difficulty band keeps expected runtimes in the sub-10-second range.
pub fn search(
    message: &[u8],
    sender_pub: &[u8; 32],
    timestamp: u64,
    difficulty: u8,
    cancel: &AtomicBool,
) -> Option<PowResult> {
    let started = Instant::now();
    let mut nonce: u64 = 0;
    loop {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return None;
        }

        let hash = compute_pow_hash(message, sender_pub, timestamp, nonce);
        if meets_difficulty(&hash, difficulty) {
            return Some(PowResult {
                nonce,
                hash,
                difficulty,
                compute_time: started.elapsed().as_secs_f64(),
            });
        }

        nonce = nonce.wrapping_add(1);
        // Full u64 space exhausted (astronomically unlikely at difficulty ≤ 8)
        if nonce == 0 {
            return None;
        }
    }
}

/// Recompute the digest for an asserted result and accept iff it matches
/// the claimed hash AND satisfies the claimed difficulty. Tampering with
/// message, sender, or timestamp shows up as a hash mismatch.
pub fn verify(
    message: &[u8],
    sender_pub: &[u8; 32],
    timestamp: u64,
    result: &PowResult,
) -> Result<(), RelayError> {
    let recomputed = compute_pow_hash(message, sender_pub, timestamp, result.nonce);
    if recomputed != result.hash {
        return Err(RelayError::PowInvalid);
    }
    if !meets_difficulty(&result.hash, result.difficulty) {
        return Err(RelayError::PowInvalid);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// DIFFICULTY CONTROL
// ─────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PowStats {
    pub current_difficulty: u8,
    pub total_computed: u64,
    pub total_verified: u64,
    pub window_len: usize,
    /// Mean compute time over the current window (seconds); 0 if empty.
    pub window_mean_secs: f64,
    pub target_secs: f64,
}

struct EngineState {
    difficulty: u8,
    /// Sliding window of recent accepted compute times (seconds).
    window: VecDeque<f64>,
    metrics: VecDeque<NetworkMetrics>,
    total_computed: u64,
    total_verified: u64,
}

/// Thread-safe PoW engine: owns the adaptive difficulty, the compute-time
/// window, and the bounded metrics ring. Long searches run on the caller's
/// thread and yield only for cancellation.
pub struct PowEngine {
    state: Mutex<EngineState>,
}

impl Default for PowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PowEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                difficulty: MIN_DIFFICULTY,
                window: VecDeque::with_capacity(DIFFICULTY_WINDOW),
                metrics: VecDeque::with_capacity(METRICS_RING_CAP),
                total_computed: 0,
                total_verified: 0,
            }),
        }
    }

    pub fn difficulty(&self) -> u8 {
        self.lock().difficulty
    }

    /// Search at the current difficulty and record the accepted result for
    /// difficulty adjustment. Returns None when cancelled.
    pub fn compute(
        &self,
        message: &[u8],
        sender_pub: &[u8; 32],
        timestamp: u64,
        cancel: &AtomicBool,
    ) -> Option<PowResult> {
        let difficulty = self.difficulty();
        let result = search(message, sender_pub, timestamp, difficulty, cancel)?;
        self.record_result(&result);
        Some(result)
    }

    /// Verify a received result and count it. Errors with PowInvalid on
    /// hash mismatch or unmet difficulty.
    pub fn verify(
        &self,
        message: &[u8],
        sender_pub: &[u8; 32],
        timestamp: u64,
        result: &PowResult,
    ) -> Result<(), RelayError> {
        verify(message, sender_pub, timestamp, result)?;
        self.lock().total_verified += 1;
        Ok(())
    }

    /// Feed an accepted computation into the difficulty controller.
    ///
    /// After every full window of DIFFICULTY_WINDOW samples the mean search
    /// time t̄ is compared against the network-aware target T*:
    ///   t̄ < 0.6·T* and d < 8  →  d + 1
    ///   t̄ > 1.8·T* and d > 1  →  d − 1
    /// The window is cleared on a change; otherwise it slides.
    pub fn record_result(&self, result: &PowResult) {
        let mut state = self.lock();
        state.total_computed += 1;
        if state.window.len() == DIFFICULTY_WINDOW {
            state.window.pop_front();
        }
        state.window.push_back(result.compute_time);

        if state.window.len() < DIFFICULTY_WINDOW {
            return;
        }

        let mean: f64 = state.window.iter().sum::<f64>() / state.window.len() as f64;
        let target = target_time(state.metrics.back());

        let old = state.difficulty;
        if mean < 0.6 * target && state.difficulty < MAX_DIFFICULTY {
            state.difficulty += 1;
        } else if mean > 1.8 * target && state.difficulty > MIN_DIFFICULTY {
            state.difficulty -= 1;
        }
        if state.difficulty != old {
            state.window.clear();
        }
    }

    /// Publish a fresh metrics snapshot (transport collaborator call).
    pub fn update_metrics(&self, metrics: NetworkMetrics) {
        let mut state = self.lock();
        if state.metrics.len() == METRICS_RING_CAP {
            state.metrics.pop_front();
        }
        state.metrics.push_back(metrics);
    }

    /// The current network-aware target search time (seconds).
    pub fn target_compute_time(&self) -> f64 {
        target_time(self.lock().metrics.back())
    }

    /// Recent metric snapshots, oldest first.
    pub fn recent_metrics(&self) -> Vec<NetworkMetrics> {
        self.lock().metrics.iter().copied().collect()
    }

    pub fn stats(&self) -> PowStats {
        let state = self.lock();
        let window_mean = if state.window.is_empty() {
            0.0
        } else {
            state.window.iter().sum::<f64>() / state.window.len() as f64
        };
        PowStats {
            current_difficulty: state.difficulty,
            total_computed: state.total_computed,
            total_verified: state.total_verified,
            window_len: state.window.len(),
            window_mean_secs: window_mean,
            target_secs: target_time(state.metrics.back()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// T* = clamp(2.0 / (token_value_mult · congestion_factor · hash_rate_factor),
///            0.5 s, 10 s). With no metrics published yet, all factors are 1
/// and the target is the 2-second base.
fn target_time(metrics: Option<&NetworkMetrics>) -> f64 {
    let (token_mult, congestion, hash_rate) = match metrics {
        Some(m) => {
            let token_mult = (m.token_value_micro_rlt as f64 / 100.0).max(1.0);
            let congestion = (m.msgs_per_sec / 10.0).clamp(0.5, 3.0);
            let hash_rate = (m.active_nodes as f64 * 10.0 / 100.0).clamp(0.5, 2.0);
            (token_mult, congestion, hash_rate)
        }
        None => (1.0, 1.0, 1.0),
    };
    (BASE_TARGET_SECS / (token_mult * congestion * hash_rate))
        .clamp(MIN_TARGET_SECS, MAX_TARGET_SECS)
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
