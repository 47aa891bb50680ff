//! The driver-side timer bundle for one active delivery. Three activities,
//! deliberately decoupled:
//!
//! 1. the GPS watch stream pushes fixes into a `watch` channel (memory only,
//!    no network on this path),
//! 2. a send timer reads the latest fix every cycle and hands it to the
//!    ingestor (last-write-wins, historical fixes are never queued),
//! 3. a route timer asks the estimator to refresh, which applies its own
//!    throttle.
//!
//! Everything hangs off one cancellation token. The state machine cancels it
//! the instant the delivery terminates, so no timer keeps sending stale data.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::models::order::GeoPoint;
use crate::state::AppState;
use crate::tracking::ingest::{ingest_watch, RawFix};

pub struct TrackingSession {
    cancel: CancellationToken,
    fix_tx: watch::Sender<Option<RawFix>>,
}

impl TrackingSession {
    /// Spawns the send and route timers and registers the session so the
    /// state machine can tear it down on terminal transitions.
    pub fn start(state: Arc<AppState>, delivery_id: Uuid) {
        let cancel = CancellationToken::new();
        let (fix_tx, fix_rx) = watch::channel(None);

        tokio::spawn(send_loop(
            state.clone(),
            delivery_id,
            fix_rx,
            cancel.child_token(),
        ));
        tokio::spawn(route_loop(state.clone(), delivery_id, cancel.child_token()));

        state
            .sessions
            .insert(delivery_id, Self { cancel, fix_tx });
    }

    /// Entry point for the GPS watch stream: overwrite the latest known fix.
    /// Never blocks and never does I/O.
    pub fn push_fix(&self, fix: RawFix) {
        let _ = self.fix_tx.send(Some(fix));
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_loop(
    state: Arc<AppState>,
    delivery_id: Uuid,
    fix_rx: watch::Receiver<Option<RawFix>>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(state.config.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let latest = *fix_rx.borrow();
                let Some(fix) = latest else { continue };

                // A failed send only affects this cycle; the next tick
                // resends the then-latest fix.
                if let Err(err) = ingest_watch(&state, delivery_id, fix) {
                    debug!(delivery_id = %delivery_id, error = %err, "position send skipped");
                }
            }
        }
    }

    debug!(delivery_id = %delivery_id, "send timer stopped");
}

async fn route_loop(state: Arc<AppState>, delivery_id: Uuid, cancel: CancellationToken) {
    let mut ticker = interval(state.config.route_throttle);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let endpoints = route_endpoints(&state, delivery_id);
                let Some((origin, destination)) = endpoints else { continue };

                state
                    .estimator
                    .estimate(delivery_id, origin, destination, false)
                    .await;
            }
        }
    }

    debug!(delivery_id = %delivery_id, "route timer stopped");
}

/// Origin is the delivery's latest known position, destination the order's
/// drop-off. Nothing to refresh until both are known.
fn route_endpoints(state: &AppState, delivery_id: Uuid) -> Option<(GeoPoint, GeoPoint)> {
    let delivery = state.deliveries.get(&delivery_id)?;
    let origin = delivery.current_position?;
    let order_id = delivery.order_id;
    drop(delivery);

    let order = state.orders.get(&order_id)?;
    Some((origin, order.destination))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::TrackingSession;
    use crate::config::Config;
    use crate::models::delivery::Delivery;
    use crate::models::order::{GeoPoint, Order, PaymentMethod};
    use crate::routing::HaversineProvider;
    use crate::state::AppState;
    use crate::tracking::ingest::RawFix;

    fn test_state() -> Arc<AppState> {
        let config = Config {
            http_port: 0,
            log_level: "warn".to_string(),
            event_buffer_size: 16,
            watch_accuracy_max_m: 2.0,
            send_interval: Duration::from_secs(6),
            route_throttle: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(12),
            routing_base_url: String::new(),
        };
        Arc::new(AppState::new(config, Arc::new(HaversineProvider::default())))
    }

    fn seed(state: &AppState) -> Uuid {
        let order = Order::new(
            PaymentMethod::Cash,
            GeoPoint {
                lat: 53.56,
                lng: 10.0,
            },
            Vec::new(),
        );
        let delivery = Delivery::new(order.id, Uuid::new_v4());
        let delivery_id = delivery.id;
        state.delivery_by_order.insert(order.id, delivery_id);
        state.orders.insert(order.id, order);
        state.deliveries.insert(delivery_id, delivery);
        delivery_id
    }

    fn fix(lat: f64, offset_secs: i64) -> RawFix {
        RawFix {
            lat,
            lng: 9.99,
            speed_ms: Some(4.0),
            accuracy_m: Some(1.0),
            recorded_at: Some(Utc::now() + chrono::Duration::seconds(offset_secs)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn send_timer_transmits_latest_fix_per_cycle() {
        let state = test_state();
        let delivery_id = seed(&state);
        TrackingSession::start(state.clone(), delivery_id);

        // Two watch-stream updates inside one send window: only the newer
        // one ever reaches the backend.
        {
            let session = state.sessions.get(&delivery_id).unwrap();
            session.push_fix(fix(53.551, 1));
            session.push_fix(fix(53.552, 2));
        }

        tokio::time::sleep(Duration::from_secs(7)).await;

        let delivery = state.deliveries.get(&delivery_id).unwrap();
        assert_eq!(delivery.positions.len(), 1);
        assert_eq!(delivery.current_position.unwrap().lat, 53.552);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_session_stops_sending() {
        let state = test_state();
        let delivery_id = seed(&state);
        TrackingSession::start(state.clone(), delivery_id);

        {
            let session = state.sessions.get(&delivery_id).unwrap();
            session.push_fix(fix(53.551, 1));
        }
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(state.deliveries.get(&delivery_id).unwrap().positions.len(), 1);

        state.cancel_session(delivery_id);
        {
            // Session gone from the registry; simulate a straggling fix via a
            // fresh push before cancellation would have landed.
            assert!(state.sessions.get(&delivery_id).is_none());
        }

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(state.deliveries.get(&delivery_id).unwrap().positions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn route_timer_refreshes_once_position_is_known() {
        let state = test_state();
        let delivery_id = seed(&state);
        TrackingSession::start(state.clone(), delivery_id);

        // No position yet: the route timer has nothing to do.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(state.estimator.current(delivery_id).is_none());

        {
            let session = state.sessions.get(&delivery_id).unwrap();
            session.push_fix(fix(53.551, 1));
        }

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(state.estimator.current(delivery_id).is_some());

        state.cancel_session(delivery_id);
    }
}
