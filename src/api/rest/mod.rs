pub mod deliveries;
pub mod orders;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, ActorRole};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(orders::router())
        .merge(deliveries::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/orders/:id", get(ws::subscribe_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Mutating endpoints identify the caller through headers: `x-actor-role`
/// (required) and `x-actor-id` (required for drivers, who are checked for
/// delivery ownership).
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let raw_role = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Validation("x-actor-role header required".to_string()))?;

    let role = ActorRole::parse(raw_role)
        .ok_or_else(|| AppError::Validation(format!("unknown actor role: {raw_role}")))?;

    let id = match headers.get("x-actor-id") {
        Some(raw) => {
            let raw = raw
                .to_str()
                .map_err(|_| AppError::Validation("invalid x-actor-id header".to_string()))?;
            Some(
                Uuid::parse_str(raw)
                    .map_err(|_| AppError::Validation("x-actor-id must be a uuid".to_string()))?,
            )
        }
        None => None,
    };

    if role == ActorRole::Driver && id.is_none() {
        return Err(AppError::Validation(
            "drivers must send x-actor-id".to_string(),
        ));
    }

    Ok(Actor::new(role, id))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: usize,
    deliveries: usize,
    realtime_channels: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orders: state.orders.len(),
        deliveries: state.deliveries.len(),
        realtime_channels: state.broadcaster.active_channels(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
