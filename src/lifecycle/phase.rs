//! The combined Order + Delivery lifecycle as one sum type, with the pure
//! transition function over it. Keeping the two statuses fused here means
//! they can never disagree: `machine` derives both from the phase it commits.

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::actor::{Actor, ActorRole};
use crate::models::delivery::DeliveryStatus;
use crate::models::order::{OrderStatus, PaymentMethod};

/// Where an order is in its combined lifecycle. `Accepted` is transient:
/// a kitchen accept lands on `Preparing` in the same commit, so it never
/// appears as a resting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecyclePhase {
    Pending,
    Preparing,
    Ready,
    PickingUp,
    Delivering,
    Delivered,
    Cancelled,
}

impl LifecyclePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecyclePhase::Delivered | LifecyclePhase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Pending => "PENDING",
            LifecyclePhase::Preparing => "PREPARING",
            LifecyclePhase::Ready => "READY",
            LifecyclePhase::PickingUp => "PICKING_UP",
            LifecyclePhase::Delivering => "DELIVERING",
            LifecyclePhase::Delivered => "DELIVERED",
            LifecyclePhase::Cancelled => "CANCELLED",
        }
    }

    /// Reconstructs the phase from the stored statuses. The delivery, when
    /// present, is the finer-grained of the two.
    pub fn of(order: OrderStatus, delivery: Option<DeliveryStatus>) -> Self {
        match (order, delivery) {
            (_, Some(DeliveryStatus::PickingUp)) => LifecyclePhase::PickingUp,
            (_, Some(DeliveryStatus::Delivering)) => LifecyclePhase::Delivering,
            (OrderStatus::Pending, _) => LifecyclePhase::Pending,
            (OrderStatus::Accepted | OrderStatus::Preparing, _) => LifecyclePhase::Preparing,
            (OrderStatus::Ready, _) => LifecyclePhase::Ready,
            (OrderStatus::Delivered, _) => LifecyclePhase::Delivered,
            (OrderStatus::Cancelled, _) => LifecyclePhase::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    KitchenAccept,
    KitchenMarkReady,
    DriverAccept { driver_id: Uuid },
    DriverConfirmPickup,
    DriverMarkDelivered,
    Cancel { reason: String },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::KitchenAccept => "kitchen_accept",
            LifecycleEvent::KitchenMarkReady => "kitchen_mark_ready",
            LifecycleEvent::DriverAccept { .. } => "driver_accept",
            LifecycleEvent::DriverConfirmPickup => "driver_confirm_pickup",
            LifecycleEvent::DriverMarkDelivered => "driver_mark_delivered",
            LifecycleEvent::Cancel { .. } => "cancel",
        }
    }
}

/// Everything the guards need beyond the phase itself.
#[derive(Debug, Clone, Copy)]
pub struct TransitionCtx {
    pub payment_method: PaymentMethod,
    pub payment_confirmed: bool,
    /// Driver owning the existing delivery, if one was created.
    pub delivery_driver: Option<Uuid>,
}

/// The authoritative transition function. Pure: no clocks, no maps, no I/O.
/// Returns the phase to commit or the exact rejection the caller surfaces.
pub fn next_phase(
    phase: LifecyclePhase,
    event: &LifecycleEvent,
    actor: Actor,
    ctx: TransitionCtx,
) -> Result<LifecyclePhase, AppError> {
    // Terminal phases reject everything, including cancel. This is also the
    // deterministic winner rule for a cancel racing a mark-delivered.
    if phase.is_terminal() {
        return Err(invalid(phase, event));
    }

    if let LifecycleEvent::Cancel { reason } = event {
        if reason.trim().is_empty() {
            return Err(AppError::MissingReason);
        }
        return cancel_guard(phase, actor, ctx);
    }

    match (phase, event) {
        (LifecyclePhase::Pending, LifecycleEvent::KitchenAccept) => {
            require_role(actor, ActorRole::Kitchen)?;
            if ctx.payment_method == PaymentMethod::Online && !ctx.payment_confirmed {
                return Err(AppError::PaymentNotConfirmed);
            }
            // The ACCEPTED->PREPARING hop is implicit; the commit stamps
            // cook_accepted_at.
            Ok(LifecyclePhase::Preparing)
        }
        (LifecyclePhase::Preparing, LifecycleEvent::KitchenMarkReady) => {
            require_role(actor, ActorRole::Kitchen)?;
            Ok(LifecyclePhase::Ready)
        }
        (LifecyclePhase::Ready, LifecycleEvent::DriverAccept { .. }) => {
            require_role(actor, ActorRole::Driver)?;
            if ctx.delivery_driver.is_some() {
                return Err(AppError::InvalidTransition {
                    from: phase.as_str().to_string(),
                    event: "driver_accept (delivery already exists)".to_string(),
                });
            }
            Ok(LifecyclePhase::PickingUp)
        }
        (LifecyclePhase::PickingUp, LifecycleEvent::DriverConfirmPickup) => {
            require_delivery_owner(actor, ctx)?;
            Ok(LifecyclePhase::Delivering)
        }
        (LifecyclePhase::Delivering, LifecycleEvent::DriverMarkDelivered) => {
            require_delivery_owner(actor, ctx)?;
            Ok(LifecyclePhase::Delivered)
        }
        _ => Err(invalid(phase, event)),
    }
}

fn cancel_guard(
    phase: LifecyclePhase,
    actor: Actor,
    ctx: TransitionCtx,
) -> Result<LifecyclePhase, AppError> {
    match actor.role {
        ActorRole::Client => {
            // Clients may only back out before the kitchen commits, and only
            // when no online payment has to be unwound.
            if phase != LifecyclePhase::Pending || ctx.payment_method != PaymentMethod::Cash {
                return Err(AppError::Unauthorized(
                    "clients may cancel only pending cash orders".to_string(),
                ));
            }
        }
        ActorRole::Driver => {
            // A driver touching an order with a live delivery must own it.
            if let Some(owner) = ctx.delivery_driver {
                if actor.id != Some(owner) {
                    return Err(AppError::Unauthorized(
                        "delivery belongs to another driver".to_string(),
                    ));
                }
            }
        }
        ActorRole::Kitchen | ActorRole::Admin => {}
    }

    Ok(LifecyclePhase::Cancelled)
}

fn require_role(actor: Actor, role: ActorRole) -> Result<(), AppError> {
    if actor.role == role {
        Ok(())
    } else {
        Err(AppError::Unauthorized(format!(
            "requires {role:?} role"
        )))
    }
}

fn require_delivery_owner(actor: Actor, ctx: TransitionCtx) -> Result<(), AppError> {
    if actor.role == ActorRole::Admin {
        return Ok(());
    }
    if actor.role != ActorRole::Driver {
        return Err(AppError::Unauthorized("requires Driver role".to_string()));
    }

    match ctx.delivery_driver {
        Some(owner) if actor.id == Some(owner) => Ok(()),
        Some(_) => Err(AppError::Unauthorized(
            "delivery belongs to another driver".to_string(),
        )),
        None => Err(AppError::Unauthorized("no delivery to act on".to_string())),
    }
}

fn invalid(phase: LifecyclePhase, event: &LifecycleEvent) -> AppError {
    AppError::InvalidTransition {
        from: phase.as_str().to_string(),
        event: event.name().to_string(),
    }
}
