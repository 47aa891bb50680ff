use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::time::interval;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn subscribe_handler(
    ws: WebSocketUpgrade,
    Path(order_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, order_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, order_id: Uuid) {
    if !state.orders.contains_key(&order_id) {
        return;
    }

    state.metrics.active_subscriptions.inc();
    info!(order_id = %order_id, "realtime subscriber connected");

    let (sender, receiver) = socket.split();
    run_subscription(state.clone(), order_id, sender, receiver).await;

    state.metrics.active_subscriptions.dec();
    info!(order_id = %order_id, "realtime subscriber disconnected");
}

/// One subscriber for one order. Realtime events are multiplexed with a
/// periodic authoritative snapshot: the event stream is a latency
/// optimization, the snapshot is the source of truth and heals anything a
/// flaky connection missed. The stream ends when the order terminates, the
/// subscriber hangs up, or an explicit unsubscribe closes the socket.
async fn run_subscription<S, R>(state: Arc<AppState>, order_id: Uuid, mut sender: S, mut receiver: R)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut events = state.broadcaster.subscribe(order_id);
    // First tick fires immediately, so every subscriber starts from an
    // authoritative snapshot.
    let mut reconcile = interval(state.config.reconcile_interval);

    loop {
        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(event)) => {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize realtime event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                // Dropped behind the buffer; the next snapshot heals the gap.
                Some(Err(BroadcastStreamRecvError::Lagged(_))) => continue,
                // Channel closed: the order reached a terminal state. Push
                // one last snapshot so the subscriber sees the final word.
                None => {
                    if let Some(frame) = snapshot_frame(&state, order_id) {
                        let _ = sender.send(Message::Text(frame.into())).await;
                    }
                    break;
                }
            },
            _ = reconcile.tick() => {
                let Some(frame) = snapshot_frame(&state, order_id) else { break };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn snapshot_frame(state: &AppState, order_id: Uuid) -> Option<String> {
    let order = state.orders.get(&order_id)?.value().clone();
    let delivery_id = state.delivery_by_order.get(&order_id).map(|entry| *entry.value());
    let delivery = delivery_id
        .and_then(|id| state.deliveries.get(&id))
        .map(|entry| entry.value().clone());

    serde_json::to_string(&json!({
        "kind": "snapshot",
        "order": order,
        "delivery": delivery,
    }))
    .ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::ws::Message;
    use futures::channel::mpsc;
    use futures::{stream, StreamExt};
    use serde_json::Value;
    use uuid::Uuid;

    use super::run_subscription;
    use crate::config::Config;
    use crate::lifecycle::machine;
    use crate::lifecycle::phase::LifecycleEvent;
    use crate::models::actor::{Actor, ActorRole};
    use crate::models::order::{GeoPoint, Order, PaymentMethod};
    use crate::routing::HaversineProvider;
    use crate::state::AppState;

    fn test_state() -> Arc<AppState> {
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
        Arc::new(AppState::new(config, Arc::new(HaversineProvider::default())))
    }

    fn seed_order(state: &AppState) -> Uuid {
        let order = Order::new(
            PaymentMethod::Cash,
            GeoPoint {
                lat: 53.55,
                lng: 9.99,
            },
            Vec::new(),
        );
        let id = order.id;
        state.orders.insert(id, order);
        id
    }

    fn frame_json(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscriber_starts_and_ends_with_authoritative_snapshots() {
        let state = test_state();
        let order_id = seed_order(&state);

        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let incoming = stream::pending::<Result<Message, axum::Error>>();
        let subscription = tokio::spawn(run_subscription(state.clone(), order_id, tx, incoming));

        // The very first frame is a snapshot of the authoritative state,
        // before any realtime event.
        let first = frame_json(rx.next().await.unwrap());
        assert_eq!(first["kind"], "snapshot");
        assert_eq!(first["order"]["status"], "Pending");
        assert!(first["delivery"].is_null());

        machine::transition(
            &state,
            order_id,
            LifecycleEvent::KitchenAccept,
            Actor::new(ActorRole::Kitchen, None),
        )
        .unwrap();

        // Events arrive in publish order.
        let frame = frame_json(rx.next().await.unwrap());
        assert_eq!(frame["kind"], "cook_accepted");
        assert!(frame["cook_accepted_at"].is_string());

        let frame = frame_json(rx.next().await.unwrap());
        assert_eq!(frame["kind"], "status_changed");
        assert_eq!(frame["order_status"], "Preparing");

        machine::transition(
            &state,
            order_id,
            LifecycleEvent::Cancel {
                reason: "closing time".to_string(),
            },
            Actor::new(ActorRole::Admin, None),
        )
        .unwrap();

        // The terminal transition drains its event, then the closed channel
        // forces one final snapshot and the subscription ends.
        let mut last = None;
        while let Some(message) = rx.next().await {
            last = Some(frame_json(message));
        }

        let last = last.unwrap();
        assert_eq!(last["kind"], "snapshot");
        assert_eq!(last["order"]["status"], "Cancelled");
        assert_eq!(last["order"]["cancel_reason"], "closing time");

        subscription.await.unwrap();
    }
}
