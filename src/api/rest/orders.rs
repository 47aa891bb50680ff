use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::actor_from_headers;
use crate::error::AppError;
use crate::lifecycle::machine::{self, TransitionOutcome};
use crate::lifecycle::phase::LifecycleEvent;
use crate::models::order::{GeoPoint, Order, OrderItem, PaymentMethod};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/ready", post(mark_ready))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/payment/confirm", post(confirm_payment))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    pub destination: GeoPoint,
    pub items: Vec<OrderItem>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.items.is_empty() {
        return Err(AppError::Validation("order needs at least one item".to_string()));
    }
    if payload.items.iter().any(|item| item.quantity == 0) {
        return Err(AppError::Validation("item quantity must be > 0".to_string()));
    }
    if !(-90.0..=90.0).contains(&payload.destination.lat)
        || !(-180.0..=180.0).contains(&payload.destination.lng)
    {
        return Err(AppError::Validation("destination out of range".to_string()));
    }

    let order = Order::new(payload.payment_method, payload.destination, payload.items);
    state.orders.insert(order.id, order.clone());

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order.value().clone()))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Order>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = machine::transition(&state, id, LifecycleEvent::KitchenAccept, actor)?;
    Ok(Json(outcome.order))
}

async fn mark_ready(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Order>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let outcome = machine::transition(&state, id, LifecycleEvent::KitchenMarkReady, actor)?;
    Ok(Json(outcome.order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let TransitionOutcome { order, .. } = machine::transition(
        &state,
        id,
        LifecycleEvent::Cancel {
            reason: payload.reason,
        },
        actor,
    )?;
    Ok(Json(order))
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = machine::confirm_payment(&state, id)?;
    Ok(Json(order))
}
