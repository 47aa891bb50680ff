use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::GeoPoint;

/// Ring-buffer cap on the per-delivery position history. Once full, the
/// oldest sample is evicted for every new one accepted.
pub const POSITION_HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    PickingUp,
    Delivering,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }
}

/// One GPS fix as stored: coordinates, derived speed, and the device
/// timestamp. Speed is km/h, already clamped to be finite and non-negative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSample {
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: DeliveryStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_position: Option<GeoPoint>,
    pub estimated_minutes: Option<u32>,
    /// Newest first, timestamps strictly decreasing down the list.
    pub positions: VecDeque<PositionSample>,
}

impl Delivery {
    pub fn new(order_id: Uuid, driver_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            driver_id,
            status: DeliveryStatus::PickingUp,
            started_at: Utc::now(),
            ended_at: None,
            current_position: None,
            estimated_minutes: None,
            positions: VecDeque::with_capacity(POSITION_HISTORY_CAP),
        }
    }

    /// Prepends an accepted sample, evicting beyond the cap, and moves the
    /// headline position along with it.
    pub fn record_position(&mut self, sample: PositionSample) {
        self.positions.push_front(sample);
        self.positions.truncate(POSITION_HISTORY_CAP);
        self.current_position = Some(GeoPoint {
            lat: sample.lat,
            lng: sample.lng,
        });
    }

    pub fn newest_recorded_at(&self) -> Option<DateTime<Utc>> {
        self.positions.front().map(|s| s.recorded_at)
    }
}
