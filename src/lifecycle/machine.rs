//! Commits phase transitions against shared state: loads the order, runs the
//! pure transition function, mirrors the resulting phase onto both status
//! fields, fans the change out, and tears tracking down on terminal phases.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle::phase::{next_phase, LifecycleEvent, LifecyclePhase, TransitionCtx};
use crate::models::actor::Actor;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::order::{Order, OrderStatus};
use crate::realtime::OrderEvent;
use crate::state::AppState;

pub struct TransitionOutcome {
    pub order: Order,
    pub delivery: Option<Delivery>,
}

/// The single mutation path for lifecycle state. The order's map entry is
/// held exclusively for the whole commit, so two racing events (a cancel vs.
/// a mark-delivered, say) serialize and the loser sees a terminal phase.
pub fn transition(
    state: &AppState,
    order_id: Uuid,
    event: LifecycleEvent,
    actor: Actor,
) -> Result<TransitionOutcome, AppError> {
    let result = transition_inner(state, order_id, &event, actor);

    let outcome_label = if result.is_ok() { "success" } else { "rejected" };
    state
        .metrics
        .transitions_total
        .with_label_values(&[event.name(), outcome_label])
        .inc();

    result
}

fn transition_inner(
    state: &AppState,
    order_id: Uuid,
    event: &LifecycleEvent,
    actor: Actor,
) -> Result<TransitionOutcome, AppError> {
    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let delivery_id = state.delivery_by_order.get(&order_id).map(|entry| *entry);
    let (delivery_status, delivery_driver) = match delivery_id {
        Some(id) => {
            let delivery = state
                .deliveries
                .get(&id)
                .ok_or_else(|| AppError::Internal(format!("delivery {id} missing")))?;
            (Some(delivery.status), Some(delivery.driver_id))
        }
        None => (None, None),
    };

    let phase = LifecyclePhase::of(order.status, delivery_status);
    let ctx = TransitionCtx {
        payment_method: order.payment_method,
        payment_confirmed: order.payment_confirmed,
        delivery_driver,
    };

    let next = next_phase(phase, event, actor, ctx)?;
    let now = Utc::now();
    order.updated_at = now;

    let delivery = match next {
        LifecyclePhase::Preparing => {
            order.status = OrderStatus::Preparing;
            order.cook_accepted_at = Some(now);
            state.broadcaster.publish(
                order_id,
                OrderEvent::CookAccepted {
                    cook_accepted_at: now,
                },
            );
            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: None,
                },
            );
            None
        }
        LifecyclePhase::Ready => {
            order.status = OrderStatus::Ready;
            state.broadcaster.publish(order_id, OrderEvent::OrderReady);
            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: None,
                },
            );
            None
        }
        LifecyclePhase::PickingUp => {
            let LifecycleEvent::DriverAccept { driver_id } = event else {
                return Err(AppError::Internal("phase/event mismatch".to_string()));
            };

            let delivery = Delivery::new(order_id, *driver_id);
            state.delivery_by_order.insert(order_id, delivery.id);
            state.deliveries.insert(delivery.id, delivery.clone());
            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: Some(delivery.status),
                },
            );
            Some(delivery)
        }
        LifecyclePhase::Delivering => {
            let id = delivery_id.ok_or_else(|| AppError::Internal("no delivery".to_string()))?;
            let mut delivery = state
                .deliveries
                .get_mut(&id)
                .ok_or_else(|| AppError::Internal(format!("delivery {id} missing")))?;

            delivery.status = DeliveryStatus::Delivering;
            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: Some(delivery.status),
                },
            );
            Some(delivery.clone())
        }
        LifecyclePhase::Delivered => {
            let id = delivery_id.ok_or_else(|| AppError::Internal("no delivery".to_string()))?;
            let delivered = {
                let mut delivery = state
                    .deliveries
                    .get_mut(&id)
                    .ok_or_else(|| AppError::Internal(format!("delivery {id} missing")))?;
                delivery.status = DeliveryStatus::Delivered;
                delivery.ended_at = Some(now);
                delivery.clone()
            };

            order.status = OrderStatus::Delivered;
            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: Some(delivered.status),
                },
            );
            teardown(state, order_id, Some(id));
            Some(delivered)
        }
        LifecyclePhase::Cancelled => {
            let LifecycleEvent::Cancel { reason } = event else {
                return Err(AppError::Internal("phase/event mismatch".to_string()));
            };

            order.status = OrderStatus::Cancelled;
            order.cancel_reason = Some(reason.trim().to_string());

            let cancelled = match delivery_id {
                Some(id) => {
                    let mut delivery = state
                        .deliveries
                        .get_mut(&id)
                        .ok_or_else(|| AppError::Internal(format!("delivery {id} missing")))?;
                    delivery.status = DeliveryStatus::Cancelled;
                    delivery.ended_at = Some(now);
                    Some(delivery.clone())
                }
                None => None,
            };

            state.broadcaster.publish(
                order_id,
                OrderEvent::StatusChanged {
                    order_status: order.status,
                    delivery_status: cancelled.as_ref().map(|d| d.status),
                },
            );
            teardown(state, order_id, delivery_id);
            cancelled
        }
        LifecyclePhase::Pending => {
            return Err(AppError::Internal("no event targets PENDING".to_string()));
        }
    };

    info!(
        order_id = %order_id,
        event = event.name(),
        phase = next.as_str(),
        "lifecycle transition committed"
    );

    Ok(TransitionOutcome {
        order: order.clone(),
        delivery,
    })
}

/// Terminal cleanup: stop the driver's timers, drop the throttle slot, and
/// close the realtime channel so subscriber streams end after draining.
fn teardown(state: &AppState, order_id: Uuid, delivery_id: Option<Uuid>) {
    if let Some(id) = delivery_id {
        state.cancel_session(id);
        state.estimator.clear(id);
    }
    state.broadcaster.close(order_id);
}

/// The external payment collaborator's confirmation signal. Not a lifecycle
/// event: it only flips the gate the PENDING->ACCEPTED guard reads, and it
/// makes sense only while the order still waits for the kitchen.
pub fn confirm_payment(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidTransition {
            from: format!("{:?}", order.status),
            event: "confirm_payment".to_string(),
        });
    }

    order.payment_confirmed = true;
    order.updated_at = Utc::now();
    Ok(order.clone())
}
