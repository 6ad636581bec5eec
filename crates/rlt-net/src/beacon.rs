// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - FEE BEACON MANAGER
//
// Tracks the minimum relay fee each peer advertises and computes our own.
// Beacons ride inside the transport's discovery payload as a fixed 12-byte
// advert; entries older than 30 s are swept out on a 10 s cadence.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rlt_core::RelayError;

use crate::fees::{FeeCalculator, SIZE_FEE_PER_KB_MICRO_RLT};
use crate::now_secs;

/// Beacon wire magic: 0xFE 0xE1.
pub const BEACON_MAGIC: [u8; 2] = [0xFE, 0xE1];

/// Beacon advert length on the wire.
pub const BEACON_WIRE_LEN: usize = 12;

/// A peer beacon is considered stale after this many seconds.
pub const BEACON_TTL_SECS: u64 = 30;

/// Sweep cadence for expired beacons.
pub const BEACON_SWEEP_SECS: u64 = 10;

/// Floor on the advertised relay minimum fee, in µRLT.
pub const MIN_RELAY_FEE_FLOOR_MICRO_RLT: u64 = 5_000;

/// Delivery-time estimate for a hop we know nothing about (seconds).
pub const UNKNOWN_HOP_SECS: f64 = 0.2;

/// A peer's advertised relay pricing as we last heard it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeBeacon {
    pub peer_id: String,
    pub min_fee_micro_rlt: u64,
    pub rssi: Option<i32>,
    /// Local receive time (unix seconds); drives expiry.
    pub timestamp: u64,
    /// Advertised battery level in [0, 1].
    pub battery_level: f64,
    /// Advertised congestion in [0, 1].
    pub congestion: f64,
}

/// Decoded beacon advert payload (sender identity comes from transport).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BeaconPayload {
    pub min_fee_micro_rlt: u32,
    pub unix_seconds: u32,
    pub battery_level: f64,
    pub congestion: f64,
}

/// Summary over all currently-known peer minima. With no peers, every
/// field reports our own relay minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkFeeStats {
    pub peer_count: usize,
    pub mean: u64,
    pub min: u64,
    pub max: u64,
    pub median: u64,
}

/// Route cost estimate: summed hop minima plus the once-off size fee, and
/// the expected end-to-end delivery time.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCost {
    pub total_fee_micro_rlt: u64,
    pub estimated_delivery_secs: f64,
}

struct BeaconState {
    beacons: BTreeMap<String, FeeBeacon>,
    /// Local device conditions feeding our advertised minimum.
    battery_level: f64,
    congestion: f64,
}

/// Owns the peer beacon table and the local advertisement. The fee
/// calculator supplies the adaptive base that anchors our minimum.
pub struct FeeBeaconManager {
    calculator: Arc<FeeCalculator>,
    state: Mutex<BeaconState>,
}

impl FeeBeaconManager {
    pub fn new(calculator: Arc<FeeCalculator>) -> Self {
        Self {
            calculator,
            state: Mutex::new(BeaconState {
                beacons: BTreeMap::new(),
                battery_level: 1.0,
                congestion: 0.0,
            }),
        }
    }

    /// Update local battery/congestion readings (platform sensor callbacks).
    pub fn set_device_conditions(&self, battery_level: f64, congestion: f64) {
        let mut state = self.lock();
        state.battery_level = battery_level.clamp(0.0, 1.0);
        state.congestion = congestion.clamp(0.0, 1.0);
    }

    /// Our advertised minimum relay fee:
    /// adaptive_base × battery multiplier × congestion multiplier, never
    /// below the 5000 µRLT floor.
    pub fn relay_min_fee(&self) -> u64 {
        let state = self.lock();
        let base = self.calculator.adaptive_base_fee() as f64;

        let battery_mult = if state.battery_level < 0.2 {
            3.0
        } else if state.battery_level < 0.4 {
            2.0
        } else if state.battery_level < 0.6 {
            1.5
        } else {
            1.0
        };
        let congestion_mult = 1.0 + 1.5 * state.congestion;

        ((base * battery_mult * congestion_mult).round() as u64)
            .max(MIN_RELAY_FEE_FLOOR_MICRO_RLT)
    }

    /// Record (or overwrite) a peer's advertised minimum.
    pub fn record_beacon(&self, peer_id: &str, min_fee_micro_rlt: u64, rssi: Option<i32>) {
        let mut state = self.lock();
        state.beacons.insert(
            peer_id.to_string(),
            FeeBeacon {
                peer_id: peer_id.to_string(),
                min_fee_micro_rlt,
                rssi,
                timestamp: now_secs(),
                battery_level: 1.0,
                congestion: 0.0,
            },
        );
    }

    /// Record a fully-decoded beacon advert from a peer.
    pub fn record_payload(&self, peer_id: &str, payload: &BeaconPayload, rssi: Option<i32>) {
        let mut state = self.lock();
        state.beacons.insert(
            peer_id.to_string(),
            FeeBeacon {
                peer_id: peer_id.to_string(),
                min_fee_micro_rlt: payload.min_fee_micro_rlt as u64,
                rssi,
                timestamp: now_secs(),
                battery_level: payload.battery_level,
                congestion: payload.congestion,
            },
        );
    }

    pub fn get_beacon(&self, peer_id: &str) -> Option<FeeBeacon> {
        self.lock().beacons.get(peer_id).cloned()
    }

    pub fn peer_count(&self) -> usize {
        self.lock().beacons.len()
    }

    /// Drop beacons older than BEACON_TTL_SECS. Returns how many were
    /// removed. The node runs this on the 10 s sweep timer.
    pub fn sweep_expired(&self, now_secs: u64) -> usize {
        let mut state = self.lock();
        let before = state.beacons.len();
        state
            .beacons
            .retain(|_, b| now_secs.saturating_sub(b.timestamp) <= BEACON_TTL_SECS);
        let removed = before - state.beacons.len();
        if removed > 0 {
            log::debug!("Swept {} expired fee beacons", removed);
        }
        removed
    }

    /// Encode our current advert: magic || min_fee (4 LE) || unix_secs
    /// (4 LE) || battery (1) || congestion (1).
    pub fn encode_beacon(&self) -> [u8; BEACON_WIRE_LEN] {
        let min_fee = self.relay_min_fee().min(u32::MAX as u64) as u32;
        let state = self.lock();
        let mut out = [0u8; BEACON_WIRE_LEN];
        out[0..2].copy_from_slice(&BEACON_MAGIC);
        out[2..6].copy_from_slice(&min_fee.to_le_bytes());
        out[6..10].copy_from_slice(&(now_secs() as u32).to_le_bytes());
        out[10] = (state.battery_level * 255.0).round() as u8;
        out[11] = (state.congestion * 255.0).round() as u8;
        out
    }

    /// Decode a 12-byte beacon advert.
    pub fn decode_beacon(bytes: &[u8]) -> Result<BeaconPayload, RelayError> {
        if bytes.len() != BEACON_WIRE_LEN {
            return Err(RelayError::InvalidData(format!(
                "beacon must be {} bytes, got {}",
                BEACON_WIRE_LEN,
                bytes.len()
            )));
        }
        if bytes[0..2] != BEACON_MAGIC {
            return Err(RelayError::InvalidData(format!(
                "bad beacon magic 0x{:02x}{:02x}",
                bytes[0], bytes[1]
            )));
        }
        Ok(BeaconPayload {
            min_fee_micro_rlt: u32::from_le_bytes(bytes[2..6].try_into().unwrap_or([0u8; 4])),
            unix_seconds: u32::from_le_bytes(bytes[6..10].try_into().unwrap_or([0u8; 4])),
            battery_level: bytes[10] as f64 / 255.0,
            congestion: bytes[11] as f64 / 255.0,
        })
    }

    /// Cost of sending `message_size` bytes along `route`: each hop charges
    /// its advertised minimum (adaptive base for strangers), plus the
    /// once-off size fee. Delivery estimate per hop:
    /// 0.1 + max(0, (−rssi − 50)/100) + 0.5·congestion; unknown hops 0.2 s.
    pub fn route_cost(&self, route: &[String], message_size: usize) -> RouteCost {
        let adaptive_base = self.calculator.adaptive_base_fee();
        let state = self.lock();

        let mut total_fee =
            message_size.div_ceil(1024) as u64 * SIZE_FEE_PER_KB_MICRO_RLT;
        let mut delivery_secs = 0.0;

        for hop in route {
            match state.beacons.get(hop) {
                Some(beacon) => {
                    total_fee = total_fee.saturating_add(beacon.min_fee_micro_rlt);
                    let rssi_penalty = match beacon.rssi {
                        Some(rssi) => ((-rssi as f64) - 50.0).max(0.0) / 100.0,
                        None => 0.0,
                    };
                    delivery_secs += 0.1 + rssi_penalty + 0.5 * beacon.congestion;
                }
                None => {
                    total_fee = total_fee.saturating_add(adaptive_base);
                    delivery_secs += UNKNOWN_HOP_SECS;
                }
            }
        }

        RouteCost {
            total_fee_micro_rlt: total_fee,
            estimated_delivery_secs: delivery_secs,
        }
    }

    /// Aggregate stats over known peer minima.
    pub fn network_fee_stats(&self) -> NetworkFeeStats {
        let fees: Vec<u64> = {
            let state = self.lock();
            state
                .beacons
                .values()
                .map(|b| b.min_fee_micro_rlt)
                .collect()
        };

        if fees.is_empty() {
            let local = self.relay_min_fee();
            return NetworkFeeStats {
                peer_count: 0,
                mean: local,
                min: local,
                max: local,
                median: local,
            };
        }

        let mut sorted = fees.clone();
        sorted.sort_unstable();
        let mean = (fees.iter().sum::<u64>() as f64 / fees.len() as f64).round() as u64;
        let median = if sorted.len() % 2 == 0 {
            (sorted[sorted.len() / 2 - 1] + sorted[sorted.len() / 2]) / 2
        } else {
            sorted[sorted.len() / 2]
        };

        NetworkFeeStats {
            peer_count: fees.len(),
            mean,
            min: sorted[0],
            max: *sorted.last().unwrap_or(&0),
            median,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BeaconState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> FeeBeaconManager {
        FeeBeaconManager::new(Arc::new(FeeCalculator::new()))
    }

    #[test]
    fn test_relay_min_fee_floor() {
        let mgr = manager();
        // Adaptive base is the 100 µRLT static default, so the 5000 floor wins
        assert_eq!(mgr.relay_min_fee(), MIN_RELAY_FEE_FLOOR_MICRO_RLT);
    }

    #[test]
    fn test_relay_min_fee_battery_scaling() {
        let calc = Arc::new(FeeCalculator::new());
        for _ in 0..10 {
            calc.record_observed_fee(10_000); // adaptive base = 8000
        }
        let mgr = FeeBeaconManager::new(calc);

        mgr.set_device_conditions(1.0, 0.0);
        assert_eq!(mgr.relay_min_fee(), 8_000);

        mgr.set_device_conditions(0.5, 0.0); // <0.6 → 1.5×
        assert_eq!(mgr.relay_min_fee(), 12_000);

        mgr.set_device_conditions(0.3, 0.0); // <0.4 → 2×
        assert_eq!(mgr.relay_min_fee(), 16_000);

        mgr.set_device_conditions(0.1, 0.0); // <0.2 → 3×
        assert_eq!(mgr.relay_min_fee(), 24_000);
    }

    #[test]
    fn test_relay_min_fee_congestion_scaling() {
        let calc = Arc::new(FeeCalculator::new());
        for _ in 0..10 {
            calc.record_observed_fee(10_000);
        }
        let mgr = FeeBeaconManager::new(calc);

        mgr.set_device_conditions(1.0, 1.0); // 1 + 1.5 = 2.5×
        assert_eq!(mgr.relay_min_fee(), 20_000);
    }

    #[test]
    fn test_record_and_overwrite_beacon() {
        let mgr = manager();
        mgr.record_beacon("peer-a", 6_000, Some(-40));
        mgr.record_beacon("peer-a", 7_500, Some(-45));

        assert_eq!(mgr.peer_count(), 1);
        let beacon = mgr.get_beacon("peer-a").unwrap();
        assert_eq!(beacon.min_fee_micro_rlt, 7_500);
        assert_eq!(beacon.rssi, Some(-45));
    }

    #[test]
    fn test_sweep_expired() {
        let mgr = manager();
        mgr.record_beacon("fresh", 5_000, None);
        mgr.record_beacon("stale", 5_000, None);

        // Manually age one entry past the TTL
        {
            let mut state = mgr.lock();
            let stale = state.beacons.get_mut("stale").unwrap();
            stale.timestamp -= BEACON_TTL_SECS + 5;
        }

        let removed = mgr.sweep_expired(now_secs());
        assert_eq!(removed, 1);
        assert!(mgr.get_beacon("stale").is_none());
        assert!(mgr.get_beacon("fresh").is_some());
    }

    #[test]
    fn test_beacon_wire_roundtrip() {
        let mgr = manager();
        mgr.set_device_conditions(0.5, 0.25);
        let bytes = mgr.encode_beacon();
        assert_eq!(bytes.len(), BEACON_WIRE_LEN);
        assert_eq!(&bytes[0..2], &BEACON_MAGIC);

        let payload = FeeBeaconManager::decode_beacon(&bytes).unwrap();
        assert_eq!(payload.min_fee_micro_rlt as u64, mgr.relay_min_fee());
        assert!((payload.battery_level - 0.5).abs() < 0.01);
        assert!((payload.congestion - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(FeeBeaconManager::decode_beacon(&[0u8; 11]).is_err());
        assert!(FeeBeaconManager::decode_beacon(&[0u8; 13]).is_err());

        let mut bad_magic = [0u8; BEACON_WIRE_LEN];
        bad_magic[0] = 0xFE;
        bad_magic[1] = 0xE2;
        assert!(FeeBeaconManager::decode_beacon(&bad_magic).is_err());
    }

    #[test]
    fn test_route_cost_known_and_unknown_hops() {
        let mgr = manager();
        mgr.record_beacon("known", 6_000, Some(-70));

        let route = vec!["known".to_string(), "stranger".to_string()];
        let cost = mgr.route_cost(&route, 2_000); // 2 KB → 2000 µRLT size fee

        // 2000 (size) + 6000 (known) + 100 (adaptive base for stranger)
        assert_eq!(cost.total_fee_micro_rlt, 8_100);
        // known hop: 0.1 + (70-50)/100 + 0 = 0.3; stranger: 0.2
        assert!((cost.estimated_delivery_secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_route_cost_congested_hop() {
        let mgr = manager();
        mgr.record_payload(
            "busy",
            &BeaconPayload {
                min_fee_micro_rlt: 5_000,
                unix_seconds: 0,
                battery_level: 1.0,
                congestion: 1.0,
            },
            Some(-40),
        );
        let cost = mgr.route_cost(&["busy".to_string()], 0);
        assert_eq!(cost.total_fee_micro_rlt, 5_000);
        // 0.1 + 0 (strong signal) + 0.5·1.0
        assert!((cost.estimated_delivery_secs - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_network_fee_stats_empty() {
        let mgr = manager();
        let stats = mgr.network_fee_stats();
        let local = mgr.relay_min_fee();
        assert_eq!(stats.peer_count, 0);
        assert_eq!(stats.mean, local);
        assert_eq!(stats.min, local);
        assert_eq!(stats.max, local);
        assert_eq!(stats.median, local);
    }

    #[test]
    fn test_network_fee_stats() {
        let mgr = manager();
        mgr.record_beacon("a", 5_000, None);
        mgr.record_beacon("b", 7_000, None);
        mgr.record_beacon("c", 9_000, None);

        let stats = mgr.network_fee_stats();
        assert_eq!(stats.peer_count, 3);
        assert_eq!(stats.mean, 7_000);
        assert_eq!(stats.min, 5_000);
        assert_eq!(stats.max, 9_000);
        assert_eq!(stats.median, 7_000);
    }

    #[test]
    fn test_network_fee_stats_even_count_median() {
        let mgr = manager();
        mgr.record_beacon("a", 5_000, None);
        mgr.record_beacon("b", 6_000, None);
        mgr.record_beacon("c", 8_000, None);
        mgr.record_beacon("d", 9_000, None);
        assert_eq!(mgr.network_fee_stats().median, 7_000);
    }
}
