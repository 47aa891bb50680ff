use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Online,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    Ready,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// One line of the checkout basket. Unit prices come from the external
/// catalog service at creation time; the list never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_confirmed: bool,
    pub destination: GeoPoint,
    pub items: Vec<OrderItem>,
    pub cook_accepted_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(payment_method: PaymentMethod, destination: GeoPoint, items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: OrderStatus::Pending,
            payment_method,
            // Cash settles at the door; only online payments wait for the
            // gateway's confirmation before the kitchen may accept.
            payment_confirmed: payment_method == PaymentMethod::Cash,
            destination,
            items,
            cook_accepted_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
