// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RELAYMESH (RLT) - ROUTE OPTIMIZER
//
// Caches route-cost estimates so the transport can re-rank candidate paths
// on every discovery tick without recomputing beacon math. Cache keys are
// length-prefixed peer ids, so no peer-id content can collide with the key
// encoding itself.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::beacon::FeeBeaconManager;
use crate::now_secs;

/// Cached estimates go stale after this many seconds (matches beacon TTL).
pub const ROUTE_CACHE_TTL_SECS: u64 = 30;

/// Bound on distinct cached routes.
pub const ROUTE_CACHE_CAP: usize = 256;

/// A priced candidate route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEstimate {
    pub total_fee_micro_rlt: u64,
    pub estimated_delivery_secs: f64,
}

struct CachedEstimate {
    estimate: RouteEstimate,
    cached_at: u64,
}

/// Route-cost cache over the beacon manager.
pub struct RouteOptimizer {
    beacons: Arc<FeeBeaconManager>,
    cache: Mutex<HashMap<String, CachedEstimate>>,
}

impl RouteOptimizer {
    pub fn new(beacons: Arc<FeeBeaconManager>) -> Self {
        Self {
            beacons,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Collision-free cache key: every peer id is length-prefixed, then the
    /// size bucket is appended. "ab" + "c" and "a" + "bc" key differently
    /// no matter what separators peer ids contain.
    fn cache_key(route: &[String], message_size: usize) -> String {
        let mut key = String::with_capacity(route.len() * 16);
        for hop in route {
            key.push_str(&hop.len().to_string());
            key.push(':');
            key.push_str(hop);
        }
        key.push('#');
        key.push_str(&message_size.div_ceil(1024).to_string());
        key
    }

    /// Price a route, serving a fresh cache entry when one exists.
    pub fn estimate(&self, route: &[String], message_size: usize) -> RouteEstimate {
        let key = Self::cache_key(route, message_size);
        let now = now_secs();

        {
            let cache = self.lock();
            if let Some(cached) = cache.get(&key) {
                if now.saturating_sub(cached.cached_at) <= ROUTE_CACHE_TTL_SECS {
                    return cached.estimate.clone();
                }
            }
        }

        let cost = self.beacons.route_cost(route, message_size);
        let estimate = RouteEstimate {
            total_fee_micro_rlt: cost.total_fee_micro_rlt,
            estimated_delivery_secs: cost.estimated_delivery_secs,
        };

        let mut cache = self.lock();
        if cache.len() >= ROUTE_CACHE_CAP {
            // Evict stale entries first; if everything is fresh, drop the
            // oldest so the table stays bounded.
            cache.retain(|_, c| now.saturating_sub(c.cached_at) <= ROUTE_CACHE_TTL_SECS);
            if cache.len() >= ROUTE_CACHE_CAP {
                if let Some(oldest) = cache
                    .iter()
                    .min_by_key(|(_, c)| c.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    cache.remove(&oldest);
                }
            }
        }
        cache.insert(
            key,
            CachedEstimate {
                estimate: estimate.clone(),
                cached_at: now,
            },
        );
        estimate
    }

    /// Pick the cheapest candidate route; delivery time breaks fee ties.
    /// Returns the winning index alongside its estimate.
    pub fn best_route(
        &self,
        candidates: &[Vec<String>],
        message_size: usize,
    ) -> Option<(usize, RouteEstimate)> {
        let mut best: Option<(usize, RouteEstimate)> = None;
        for (i, route) in candidates.iter().enumerate() {
            let estimate = self.estimate(route, message_size);
            let better = match &best {
                None => true,
                Some((_, current)) => {
                    estimate.total_fee_micro_rlt < current.total_fee_micro_rlt
                        || (estimate.total_fee_micro_rlt == current.total_fee_micro_rlt
                            && estimate.estimated_delivery_secs
                                < current.estimated_delivery_secs)
                }
            };
            if better {
                best = Some((i, estimate));
            }
        }
        best
    }

    /// Drop every cached estimate (beacon table changed materially).
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn cached_routes(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedEstimate>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// TESTS
// ─────────────────────────────────────────────────────────────────
