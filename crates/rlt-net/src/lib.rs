// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - NETWORK PRICING
//
// Everything the transport needs to price a message before it leaves the
// device: the adaptive fee calculator, peer-advertised fee beacons, and the
// cached route-cost optimizer.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod beacon;
pub mod fees;
pub mod route;

pub use beacon::{
    BeaconPayload, FeeBeacon, FeeBeaconManager, NetworkFeeStats, RouteCost, BEACON_SWEEP_SECS,
    BEACON_TTL_SECS,
};
pub use fees::{FeeCalculator, NetworkConditions, Priority};
pub use route::{RouteEstimate, RouteOptimizer};

pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
