use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::actor_from_headers;
use crate::error::AppError;
use crate::lifecycle::machine;
use crate::lifecycle::phase::LifecycleEvent;
use crate::models::actor::{Actor, ActorRole};
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::route::RouteEstimate;
use crate::state::AppState;
use crate::tracking::ingest::{self, IngestOutcome, RawFix};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery))
        .route("/deliveries/:id", put(advance_delivery).get(get_delivery))
        .route("/deliveries/:id/position", post(post_position))
        .route("/deliveries/:id/route", get(get_route))
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub order_id: Uuid,
}

#[derive(Deserialize)]
pub struct AdvanceDeliveryRequest {
    pub status: DeliveryStatus,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub estimated_minutes: Option<u32>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct PositionRequest {
    #[serde(flatten)]
    pub fix: RawFix,
    #[serde(default)]
    pub initial: bool,
}

#[derive(Deserialize)]
pub struct RouteQuery {
    #[serde(default)]
    pub force: bool,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let driver_id = actor
        .id
        .ok_or_else(|| AppError::Validation("drivers must send x-actor-id".to_string()))?;

    let outcome = machine::transition(
        &state,
        payload.order_id,
        LifecycleEvent::DriverAccept { driver_id },
        actor,
    )?;

    let delivery = outcome
        .delivery
        .ok_or_else(|| AppError::Internal("accept committed without a delivery".to_string()))?;

    Ok(Json(delivery))
}

/// Driver advance: PICKING_UP -> DELIVERING -> DELIVERED, or CANCELLED with
/// a reason. A position may piggyback on the status change; it is taken at
/// initial-fix trust (no accuracy filter).
async fn advance_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AdvanceDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    let actor = actor_from_headers(&headers)?;
    let order_id = order_of(&state, id)?;

    let event = match payload.status {
        DeliveryStatus::Delivering => LifecycleEvent::DriverConfirmPickup,
        DeliveryStatus::Delivered => LifecycleEvent::DriverMarkDelivered,
        DeliveryStatus::Cancelled => LifecycleEvent::Cancel {
            reason: payload.reason.clone(),
        },
        DeliveryStatus::PickingUp => {
            return Err(AppError::Validation(
                "deliveries start in PickingUp; advance to Delivering, Delivered or Cancelled"
                    .to_string(),
            ));
        }
    };

    machine::transition(&state, order_id, event, actor)?;

    if let (Some(lat), Some(lng)) = (payload.lat, payload.lng) {
        // Best effort: a terminal delivery just rejects the straggler.
        let _ = ingest::ingest_initial(
            &state,
            id,
            RawFix {
                lat,
                lng,
                speed_ms: None,
                accuracy_m: None,
                recorded_at: None,
            },
        );
    }

    let mut delivery = state
        .deliveries
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    if payload.estimated_minutes.is_some() && !delivery.status.is_terminal() {
        delivery.estimated_minutes = payload.estimated_minutes;
    }

    Ok(Json(delivery.clone()))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;

    Ok(Json(delivery.value().clone()))
}

async fn post_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<PositionRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    let actor = actor_from_headers(&headers)?;
    require_delivery_access(&state, id, actor)?;

    let outcome = if payload.initial {
        ingest::ingest_initial(&state, id, payload.fix)?
    } else {
        ingest::ingest_watch(&state, id, payload.fix)?
    };

    Ok(Json(outcome))
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RouteQuery>,
) -> Result<Json<RouteEstimate>, AppError> {
    let (origin, order_id) = {
        let delivery = state
            .deliveries
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {id} not found")))?;
        (delivery.current_position, delivery.order_id)
    };

    let origin = origin
        .ok_or_else(|| AppError::Validation("delivery has no known position yet".to_string()))?;

    let destination = state
        .orders
        .get(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?
        .destination;

    match state
        .estimator
        .estimate(id, origin, destination, query.force)
        .await
    {
        Some(estimate) => Ok(Json(estimate)),
        None => Err(AppError::NotFound(
            "no route estimate available".to_string(),
        )),
    }
}

fn order_of(state: &AppState, delivery_id: Uuid) -> Result<Uuid, AppError> {
    state
        .deliveries
        .get(&delivery_id)
        .map(|d| d.order_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))
}

fn require_delivery_access(state: &AppState, delivery_id: Uuid, actor: Actor) -> Result<(), AppError> {
    let delivery = state
        .deliveries
        .get(&delivery_id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;

    match actor.role {
        ActorRole::Admin => Ok(()),
        ActorRole::Driver if actor.id == Some(delivery.driver_id) => Ok(()),
        ActorRole::Driver => Err(AppError::Unauthorized(
            "delivery belongs to another driver".to_string(),
        )),
        _ => Err(AppError::Unauthorized(
            "only the owning driver reports positions".to_string(),
        )),
    }
}
