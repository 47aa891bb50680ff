//! Validates and appends driver location samples. Two entry points with
//! different trust levels: the initial fix is taken as-is, continuous watch
//! samples are accuracy-filtered. Rejections change nothing and are reported
//! back; the sender simply retries with its latest fix on the next cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::PositionSample;
use crate::realtime::OrderEvent;
use crate::state::AppState;

const MS_TO_KMH: f64 = 3.6;

/// One raw fix as reported by the device, before validation.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawFix {
    pub lat: f64,
    pub lng: f64,
    /// Device speed in m/s; absent, negative, or non-finite becomes 0.
    pub speed_ms: Option<f64>,
    /// Reported accuracy radius in meters; absent counts as unreliable for
    /// watch samples.
    pub accuracy_m: Option<f64>,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    PoorAccuracy { accuracy_m: Option<f64>, max_m: f64 },
    /// Not newer than the newest stored sample.
    OutOfOrder,
    /// The delivery already terminated; stragglers are dropped.
    DeliveryInactive,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IngestOutcome {
    Accepted { accepted: bool, sample: PositionSample },
    Rejected { accepted: bool, rejection: RejectReason },
}

impl IngestOutcome {
    fn accepted(sample: PositionSample) -> Self {
        Self::Accepted {
            accepted: true,
            sample,
        }
    }

    fn rejected(rejection: RejectReason) -> Self {
        Self::Rejected {
            accepted: false,
            rejection,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// First known position: a single unfiltered fix so the map has something to
/// show before the watch stream settles.
pub fn ingest_initial(
    state: &AppState,
    delivery_id: Uuid,
    fix: RawFix,
) -> Result<IngestOutcome, AppError> {
    ingest(state, delivery_id, fix, None)
}

/// Continuous-watch samples; rejected when the reported accuracy is worse
/// than the configured threshold.
pub fn ingest_watch(
    state: &AppState,
    delivery_id: Uuid,
    fix: RawFix,
) -> Result<IngestOutcome, AppError> {
    ingest(state, delivery_id, fix, Some(state.config.watch_accuracy_max_m))
}

fn ingest(
    state: &AppState,
    delivery_id: Uuid,
    fix: RawFix,
    accuracy_max_m: Option<f64>,
) -> Result<IngestOutcome, AppError> {
    let outcome = ingest_inner(state, delivery_id, fix, accuracy_max_m)?;

    let label = if outcome.is_accepted() {
        "accepted"
    } else {
        "rejected"
    };
    state.metrics.positions_total.with_label_values(&[label]).inc();

    Ok(outcome)
}

fn ingest_inner(
    state: &AppState,
    delivery_id: Uuid,
    fix: RawFix,
    accuracy_max_m: Option<f64>,
) -> Result<IngestOutcome, AppError> {
    let mut delivery = state
        .deliveries
        .get_mut(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    if delivery.status.is_terminal() {
        return Ok(IngestOutcome::rejected(RejectReason::DeliveryInactive));
    }

    if let Some(max_m) = accuracy_max_m {
        let reliable = fix.accuracy_m.is_some_and(|a| a <= max_m);
        if !reliable {
            debug!(
                delivery_id = %delivery_id,
                accuracy_m = ?fix.accuracy_m,
                "watch sample dropped for poor accuracy"
            );
            return Ok(IngestOutcome::rejected(RejectReason::PoorAccuracy {
                accuracy_m: fix.accuracy_m,
                max_m,
            }));
        }
    }

    let recorded_at = fix.recorded_at.unwrap_or_else(Utc::now);
    if let Some(newest) = delivery.newest_recorded_at() {
        if recorded_at <= newest {
            return Ok(IngestOutcome::rejected(RejectReason::OutOfOrder));
        }
    }

    let sample = PositionSample {
        lat: fix.lat,
        lng: fix.lng,
        speed_kmh: clamp_speed(fix.speed_ms),
        recorded_at,
    };

    delivery.record_position(sample);

    // Fan out while the entry is still held so subscribers see position
    // events in stored order. The broadcast send is non-blocking, not I/O.
    state
        .broadcaster
        .publish(delivery.order_id, OrderEvent::PositionUpdated { sample });

    Ok(IngestOutcome::accepted(sample))
}

fn clamp_speed(speed_ms: Option<f64>) -> f64 {
    match speed_ms {
        Some(v) if v.is_finite() && v > 0.0 => v * MS_TO_KMH,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    use super::{clamp_speed, ingest_initial, ingest_watch, IngestOutcome, RawFix, RejectReason};
    use crate::config::Config;
    use crate::models::delivery::Delivery;
    use crate::realtime::OrderEvent;
    use crate::routing::HaversineProvider;
    use crate::state::AppState;

    fn test_state() -> AppState {
        let config = Config {
            http_port: 0,
            log_level: "warn".to_string(),
            event_buffer_size: 64,
            watch_accuracy_max_m: 2.0,
            send_interval: Duration::from_secs(6),
            route_throttle: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(12),
            routing_base_url: String::new(),
        };
        AppState::new(config, Arc::new(HaversineProvider::default()))
    }

    fn seed_delivery(state: &AppState) -> Uuid {
        let delivery = Delivery::new(Uuid::new_v4(), Uuid::new_v4());
        let id = delivery.id;
        state.delivery_by_order.insert(delivery.order_id, id);
        state.deliveries.insert(id, delivery);
        id
    }

    fn fix(lat: f64, accuracy_m: Option<f64>) -> RawFix {
        RawFix {
            lat,
            lng: 9.99,
            speed_ms: Some(5.0),
            accuracy_m,
            recorded_at: Some(Utc::now()),
        }
    }

    #[test]
    fn watch_filters_by_accuracy_but_initial_does_not() {
        let state = test_state();
        let id = seed_delivery(&state);

        let rejected = ingest_watch(&state, id, fix(53.55, Some(5.0))).unwrap();
        assert!(matches!(
            rejected,
            IngestOutcome::Rejected {
                rejection: RejectReason::PoorAccuracy { .. },
                ..
            }
        ));
        assert!(state.deliveries.get(&id).unwrap().current_position.is_none());

        // The same lousy fix is fine as the initial read.
        let accepted = ingest_initial(&state, id, fix(53.55, Some(5.0))).unwrap();
        assert!(accepted.is_accepted());

        let good = ingest_watch(&state, id, fix(53.56, Some(1.0))).unwrap();
        assert!(good.is_accepted());
        let current = state.deliveries.get(&id).unwrap().current_position.unwrap();
        assert_eq!(current.lat, 53.56);
    }

    #[test]
    fn watch_sample_without_accuracy_is_unreliable() {
        let state = test_state();
        let id = seed_delivery(&state);

        let rejected = ingest_watch(&state, id, fix(53.55, None)).unwrap();
        assert!(!rejected.is_accepted());
    }

    #[test]
    fn out_of_order_samples_are_dropped() {
        let state = test_state();
        let id = seed_delivery(&state);

        let now = Utc::now();
        let mut first = fix(53.55, Some(1.0));
        first.recorded_at = Some(now);
        assert!(ingest_watch(&state, id, first).unwrap().is_accepted());

        let mut stale = fix(53.54, Some(1.0));
        stale.recorded_at = Some(now - chrono::Duration::seconds(3));
        let outcome = ingest_watch(&state, id, stale).unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected {
                rejection: RejectReason::OutOfOrder,
                ..
            }
        ));

        // Head of history unchanged.
        let delivery = state.deliveries.get(&id).unwrap();
        assert_eq!(delivery.current_position.unwrap().lat, 53.55);
        assert_eq!(delivery.positions.len(), 1);
    }

    #[test]
    fn terminal_delivery_drops_stragglers() {
        let state = test_state();
        let id = seed_delivery(&state);
        state.deliveries.get_mut(&id).unwrap().status =
            crate::models::delivery::DeliveryStatus::Cancelled;

        let outcome = ingest_initial(&state, id, fix(53.55, Some(1.0))).unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected {
                rejection: RejectReason::DeliveryInactive,
                ..
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ingests_fan_out_in_stored_order() {
        let state = Arc::new(test_state());
        let id = seed_delivery(&state);
        let order_id = state.deliveries.get(&id).unwrap().order_id;
        let mut events = state.broadcaster.subscribe(order_id);

        let base = Utc::now();
        let mut handles = Vec::new();
        for i in 0..24i64 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let sample = RawFix {
                    lat: 53.55,
                    lng: 9.99,
                    speed_ms: None,
                    accuracy_m: Some(1.0),
                    recorded_at: Some(base + chrono::Duration::milliseconds(i)),
                };
                let _ = ingest_watch(&state, id, sample);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Sentinel so the drain below knows where the position events end.
        state.broadcaster.publish(order_id, OrderEvent::OrderReady);

        // Whatever subset was accepted, subscribers must see it in stored
        // order: timestamps strictly increasing, never reordered.
        let mut seen = 0u32;
        let mut last: Option<chrono::DateTime<Utc>> = None;
        loop {
            match events.next().await.unwrap().unwrap() {
                OrderEvent::PositionUpdated { sample } => {
                    if let Some(prev) = last {
                        assert!(sample.recorded_at > prev);
                    }
                    last = Some(sample.recorded_at);
                    seen += 1;
                }
                OrderEvent::OrderReady => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(seen >= 1);
    }

    #[test]
    fn speed_conversion_clamps_garbage() {
        assert_eq!(clamp_speed(Some(10.0)), 36.0);
        assert_eq!(clamp_speed(Some(-3.0)), 0.0);
        assert_eq!(clamp_speed(Some(f64::NAN)), 0.0);
        assert_eq!(clamp_speed(None), 0.0);
    }
}
