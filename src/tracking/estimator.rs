//! Computes road distance/time through the routing provider, one throttled
//! call per delivery. Provider failures are swallowed on purpose: the last
//! good estimate stays in effect and the next cycle retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::models::order::GeoPoint;
use crate::models::route::RouteEstimate;
use crate::observability::metrics::Metrics;
use crate::routing::RoutingProvider;

#[derive(Default)]
struct Slot {
    estimate: Option<RouteEstimate>,
    last_attempt: Option<Instant>,
}

pub struct RouteEstimator {
    provider: Arc<dyn RoutingProvider>,
    throttle: Duration,
    slots: DashMap<Uuid, Slot>,
    metrics: Metrics,
}

impl RouteEstimator {
    pub fn new(provider: Arc<dyn RoutingProvider>, throttle: Duration, metrics: Metrics) -> Self {
        Self {
            provider,
            throttle,
            slots: DashMap::new(),
            metrics,
        }
    }

    /// Refreshes the delivery's estimate, or answers from the cache while the
    /// throttle window is open. `force` bypasses the window but still resets
    /// it, so the next automatic call is throttled again. Returns whatever
    /// estimate is current, which may be stale or absent.
    pub async fn estimate(
        &self,
        delivery_id: Uuid,
        origin: GeoPoint,
        destination: GeoPoint,
        force: bool,
    ) -> Option<RouteEstimate> {
        let previous = {
            let mut slot = self.slots.entry(delivery_id).or_default();

            if !force {
                let window_open = slot
                    .last_attempt
                    .is_some_and(|at| at.elapsed() < self.throttle);
                if window_open {
                    self.metrics.route_throttled_total.inc();
                    return slot.estimate.clone();
                }
            }

            // Reserve the window before calling out, success or not: a
            // failing provider gets probed at most once per window. The
            // guard must drop before the await below.
            slot.last_attempt = Some(Instant::now());
            slot.estimate.clone()
        };

        match self.provider.route(origin, destination).await {
            Ok(routes) => match RouteEstimate::from_candidates(routes) {
                Some(estimate) => {
                    self.metrics
                        .route_provider_calls_total
                        .with_label_values(&["success"])
                        .inc();
                    self.slots.entry(delivery_id).or_default().estimate = Some(estimate.clone());
                    Some(estimate)
                }
                None => {
                    self.metrics
                        .route_provider_calls_total
                        .with_label_values(&["error"])
                        .inc();
                    debug!(delivery_id = %delivery_id, "provider returned no routes; keeping previous estimate");
                    previous
                }
            },
            Err(err) => {
                self.metrics
                    .route_provider_calls_total
                    .with_label_values(&["error"])
                    .inc();
                debug!(
                    delivery_id = %delivery_id,
                    provider = self.provider.source_name(),
                    error = %err,
                    "route refresh failed; keeping previous estimate"
                );
                previous
            }
        }
    }

    /// The last known estimate without touching the provider.
    pub fn current(&self, delivery_id: Uuid) -> Option<RouteEstimate> {
        self.slots
            .get(&delivery_id)
            .and_then(|slot| slot.estimate.clone())
    }

    /// Dropped when the delivery terminates; estimates are never persisted.
    pub fn clear(&self, delivery_id: Uuid) {
        self.slots.remove(&delivery_id);
    }
}
