use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::models::delivery::{DeliveryStatus, PositionSample};
use crate::models::order::OrderStatus;

/// Everything a subscriber can see happen to an order. Ordering is only
/// guaranteed within a kind: position updates arrive in ingest order, but a
/// status change may overtake a position frame. Subscribers heal any gap via
/// the reconciliation snapshot, never by trusting this stream alone.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderEvent {
    StatusChanged {
        order_status: OrderStatus,
        delivery_status: Option<DeliveryStatus>,
    },
    PositionUpdated {
        sample: PositionSample,
    },
    CookAccepted {
        cook_accepted_at: DateTime<Utc>,
    },
    OrderReady,
}

/// Per-order pub/sub. Channels are created lazily on first publish or
/// subscribe and dropped when the order terminates, which ends every
/// subscriber stream.
pub struct RealtimeBroadcaster {
    channels: DashMap<Uuid, broadcast::Sender<OrderEvent>>,
    buffer: usize,
}

impl RealtimeBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer,
        }
    }

    pub fn publish(&self, order_id: Uuid, event: OrderEvent) {
        let sender = self
            .channels
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0);

        // No receivers yet is fine; late subscribers catch up via snapshots.
        let _ = sender.send(event);
    }

    pub fn subscribe(&self, order_id: Uuid) -> BroadcastStream<OrderEvent> {
        let receiver = self
            .channels
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe();

        BroadcastStream::new(receiver)
    }

    /// Terminal orders stop broadcasting; dropping the sender closes all
    /// subscriber streams.
    pub fn close(&self, order_id: Uuid) {
        self.channels.remove(&order_id);
    }

    pub fn active_channels(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    use super::{OrderEvent, RealtimeBroadcaster};
    use crate::models::order::OrderStatus;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let broadcaster = RealtimeBroadcaster::new(16);
        let order_id = Uuid::new_v4();

        let mut stream = broadcaster.subscribe(order_id);
        broadcaster.publish(
            order_id,
            OrderEvent::StatusChanged {
                order_status: OrderStatus::Preparing,
                delivery_status: None,
            },
        );

        match stream.next().await.unwrap().unwrap() {
            OrderEvent::StatusChanged { order_status, .. } => {
                assert_eq!(order_status, OrderStatus::Preparing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_ends_subscriber_streams() {
        let broadcaster = RealtimeBroadcaster::new(16);
        let order_id = Uuid::new_v4();

        let mut stream = broadcaster.subscribe(order_id);
        broadcaster.close(order_id);

        assert!(stream.next().await.is_none());
        assert_eq!(broadcaster.active_channels(), 0);
    }

    #[tokio::test]
    async fn orders_are_isolated_from_each_other() {
        let broadcaster = RealtimeBroadcaster::new(16);
        let order_a = Uuid::new_v4();
        let order_b = Uuid::new_v4();

        let mut stream_b = broadcaster.subscribe(order_b);
        broadcaster.publish(order_a, OrderEvent::OrderReady);
        broadcaster.close(order_b);

        // Nothing published for order B, so its stream just ends.
        assert!(stream_b.next().await.is_none());
    }
}
