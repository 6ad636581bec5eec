// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - FEE CALCULATOR
//
// Prices what a sender should pay: a size + hop base fee shaped by
// priority, congestion, and (for high-priority traffic) observed latency.
// Keeps a bounded history of observed network fees so the advertised relay
// minimum can track what the mesh actually charges.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::VecDeque;
use std::sync::Mutex;

/// Fee per started KiB of message body, in µRLT.
pub const SIZE_FEE_PER_KB_MICRO_RLT: u64 = 1_000;

/// Fee per hop of requested TTL, in µRLT.
pub const HOP_FEE_MICRO_RLT: u64 = 100;

/// Floor on any computed message fee, in µRLT.
pub const MIN_MESSAGE_FEE_MICRO_RLT: u64 = 50;

/// Static base fee returned while no network fees have been observed yet.
pub const STATIC_BASE_FEE_MICRO_RLT: u64 = 100;

/// Bounded history of observed fees.
pub const FEE_HISTORY_CAP: usize = 1_000;

/// Number of most recent observations feeding the adaptive base.
pub const ADAPTIVE_WINDOW: usize = 100;

/// Message priority and its fee multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn multiplier(&self) -> f64 {
        match self {
            Priority::Low => 0.5,
            Priority::Normal => 1.0,
            Priority::High => 2.0,
            Priority::Urgent => 4.0,
        }
    }
}

/// Network conditions sampled by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConditions {
    /// Congestion level in [0, 1].
    pub congestion: f64,
    /// Average observed delivery latency in seconds.
    pub avg_latency_secs: f64,
}

/// Thread-safe fee calculator. The observed-fee history sits behind a
/// mutex; reads copy out summary values.
pub struct FeeCalculator {
    observed_fees: Mutex<VecDeque<u64>>,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl FeeCalculator {
    pub fn new() -> Self {
        Self {
            observed_fees: Mutex::new(VecDeque::with_capacity(ADAPTIVE_WINDOW)),
        }
    }

    /// Fee for a message, in µRLT.
    ///
    /// base = ceil(size/1024)·1000 + ttl·100, then multipliers in order:
    /// priority, 1 + 2·congestion, and for high priority with latency above
    /// half a second, 1 + latency·100. Never below the 50 µRLT floor.
    pub fn calculate(
        &self,
        message_size: usize,
        ttl: u8,
        priority: Priority,
        conditions: Option<NetworkConditions>,
    ) -> u64 {
        let size_fee = message_size.div_ceil(1024) as u64 * SIZE_FEE_PER_KB_MICRO_RLT;
        let hop_fee = ttl as u64 * HOP_FEE_MICRO_RLT;
        let base_fee = size_fee + hop_fee;

        let mut total = base_fee as f64 * priority.multiplier();
        if let Some(cond) = conditions {
            total *= 1.0 + 2.0 * cond.congestion.clamp(0.0, 1.0);
            if priority == Priority::High && cond.avg_latency_secs > 0.5 {
                total *= 1.0 + cond.avg_latency_secs * 100.0;
            }
        }

        (total.round() as u64).max(MIN_MESSAGE_FEE_MICRO_RLT)
    }

    /// Record a fee observed on the mesh (incoming traffic, beacons).
    pub fn record_observed_fee(&self, fee_micro_rlt: u64) {
        let mut fees = self.lock();
        if fees.len() == FEE_HISTORY_CAP {
            fees.pop_front();
        }
        fees.push_back(fee_micro_rlt);
    }

    /// Adaptive base: 80 % of the mean over the most recent (up to 100)
    /// observed fees. Falls back to the static 100 µRLT hop baseline while
    /// the history is empty.
    pub fn adaptive_base_fee(&self) -> u64 {
        let fees = self.lock();
        if fees.is_empty() {
            return STATIC_BASE_FEE_MICRO_RLT;
        }
        let window: Vec<u64> = fees.iter().rev().take(ADAPTIVE_WINDOW).copied().collect();
        let mean = window.iter().sum::<u64>() as f64 / window.len() as f64;
        (mean * 0.8).round() as u64
    }

    /// Number of fees currently in the history window.
    pub fn observed_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<u64>> {
        self.observed_fees.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
