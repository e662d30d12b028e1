//! Order lifecycle.
//!
//! DESIGN
//! ======
//! Two paths change a room's status:
//!
//! - The strict, payment-backed machine on [`Order`] rows:
//!   `new → pending → shipped → delivered → completed`. Each step has one
//!   permitted actor and one required source state, enforced by a
//!   compare-and-set in the store. Completion captures payment first; a
//!   failed capture leaves the order untouched.
//! - The loose farmer action, [`update_status`], which sets any status on a
//!   room that has no linked order.
//!
//! Every strict step narrates itself into the linked room and publishes an
//! `order_status_update` event.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::event::{Outbound, rfc3339};
use crate::services::message::{self, MessageError};
use crate::services::payment::PaymentError;
use crate::services::room::{self, RoomError, RoomOrigin, RoomRequest};
use crate::state::AppState;
use crate::store::{NewOrder, Order, OrderStatus, Room, Side, StoreError, User};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("invalid order status: {0:?}")]
    InvalidStatus(String),
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("room {0} is backed by an order; use the order actions")]
    PaymentBacked(String),
    #[error("user {user_id} may not {action}")]
    Forbidden { user_id: i64, action: &'static str },
    #[error("order {0} not found")]
    NotFound(i64),
    #[error("invalid order: {0}")]
    InvalidRequest(String),
    #[error("room {room_key} is still tracking order {order_id}")]
    OrderInProgress { room_key: String, order_id: i64 },
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for OrderError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidStatus(_) => "E_INVALID_STATUS",
            Self::InvalidTransition { .. } => "E_INVALID_TRANSITION",
            Self::PaymentBacked(_) => "E_PAYMENT_BACKED",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::NotFound(_) => "E_ORDER_NOT_FOUND",
            Self::InvalidRequest(_) => "E_INVALID_ORDER",
            Self::OrderInProgress { .. } => "E_ORDER_IN_PROGRESS",
            Self::Payment(e) => e.error_code(),
            Self::Room(e) => e.error_code(),
            Self::Message(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidStatus(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } | Self::PaymentBacked(_) | Self::OrderInProgress { .. } => {
                StatusCode::CONFLICT
            }
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Payment(e) => e.status(),
            Self::Room(e) => e.status(),
            Self::Message(e) => e.status(),
            Self::Store(e) => e.status(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Payment(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

/// # Errors
///
/// `InvalidStatus` for anything outside the status enum.
pub fn parse_status(raw: &str) -> Result<OrderStatus, OrderError> {
    OrderStatus::parse(raw).ok_or_else(|| OrderError::InvalidStatus(raw.to_owned()))
}

fn status_event(room: &Room, status: OrderStatus, actor: &User) -> Outbound {
    Outbound::OrderStatusUpdate {
        room_id: room.room_key.clone(),
        status,
        updated_by: actor.id,
        updated_by_name: actor.full_name.clone(),
    }
}

// =============================================================================
// LOOSE PATH
// =============================================================================

/// Farmer sets the status of a room that has no linked order.
///
/// # Errors
///
/// `Forbidden` unless `actor` is the room's farmer; `PaymentBacked` when an
/// order is linked; `Room(NotFound)` if the room vanished.
pub async fn update_status(state: &AppState, room: &Room, actor: &User, status: OrderStatus) -> Result<Room, OrderError> {
    if actor.id != room.farmer_id {
        return Err(OrderError::Forbidden { user_id: actor.id, action: "update the order status" });
    }
    if room.order_id.is_some() {
        return Err(OrderError::PaymentBacked(room.room_key.clone()));
    }
    let updated = state
        .store
        .update_room_status(room.id, status)
        .await?
        .ok_or_else(|| RoomError::NotFound(room.room_key.clone()))?;
    info!(room_key = %room.room_key, from = %room.order_status, to = %status, "room status updated");

    state.hub.publish(&room.room_key, &status_event(&updated, status, actor));
    Ok(updated)
}

// =============================================================================
// STRICT MACHINE
// =============================================================================

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub farmer_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub amount_cents: i64,
    pub payment_intent_id: String,
}

/// Record an order authorized by an external payment intent, open (or
/// reuse) its room, link the two, and move the order to `pending`.
///
/// A room tracks one order at a time: the product's room is reused only
/// when it has no linked order or its linked order is completed.
///
/// # Errors
///
/// `InvalidRequest` for bad amounts or a product that belongs to another
/// farmer; `OrderInProgress` while the product's room still tracks an
/// unfinished order; room validation errors; `Store(Conflict)` for a reused
/// intent.
pub async fn place_order(state: &AppState, customer: &User, req: PlaceOrder) -> Result<(Order, Room), OrderError> {
    if req.payment_intent_id.trim().is_empty() {
        return Err(OrderError::InvalidRequest("payment_intent_id is required".into()));
    }
    if req.amount_cents < 0 {
        return Err(OrderError::InvalidRequest("amount_cents must not be negative".into()));
    }
    if let Some(product) = state.store.product(req.product_id).await? {
        if product.farmer_id.is_some_and(|owner| owner != req.farmer_id) {
            return Err(OrderError::InvalidRequest(format!(
                "product {} is not sold by farmer {}",
                product.id, req.farmer_id
            )));
        }
    }

    if let Some(existing) = state
        .store
        .find_room(customer.id, req.farmer_id, Some(req.product_id))
        .await?
    {
        ensure_room_free(state, &existing).await?;
    }

    let found = room::find_or_create_room(
        state,
        RoomRequest {
            customer_id: customer.id,
            farmer_id: req.farmer_id,
            product_id: Some(req.product_id),
            quantity: req.quantity,
            origin: RoomOrigin::Checkout,
            reuse_any: false,
        },
    )
    .await?;

    let order = state
        .store
        .insert_order(NewOrder {
            customer_id: customer.id,
            farmer_id: req.farmer_id,
            product_id: Some(req.product_id),
            quantity: req.quantity,
            amount_cents: req.amount_cents,
            payment_intent_id: req.payment_intent_id.trim().to_owned(),
        })
        .await?;
    state
        .store
        .link_room_order(found.room.id, order.id, OrderStatus::New)
        .await?;
    info!(order_id = order.id, room_key = %found.room.room_key, customer_id = customer.id, "order placed");

    let order = advance(state, order.id, customer, OrderStatus::New, OrderStatus::Pending).await?;
    let room = state
        .store
        .room_by_id(found.room.id)
        .await?
        .ok_or_else(|| RoomError::NotFound(found.room.room_key.clone()))?;
    Ok((order, room))
}

async fn ensure_room_free(state: &AppState, room: &Room) -> Result<(), OrderError> {
    let Some(linked_id) = room.order_id else {
        return Ok(());
    };
    let finished = state
        .store
        .order(linked_id)
        .await?
        .is_none_or(|linked| linked.status == OrderStatus::Completed);
    if finished {
        Ok(())
    } else {
        Err(OrderError::OrderInProgress { room_key: room.room_key.clone(), order_id: linked_id })
    }
}

/// Farmer ships a `pending` order.
///
/// # Errors
///
/// `Forbidden` for anyone but the order's farmer; `InvalidTransition` unless pending.
pub async fn ship(state: &AppState, order_id: i64, actor: &User) -> Result<Order, OrderError> {
    let order = order_for_actor(state, order_id, actor, Side::Farmer, "ship this order").await?;
    require_status(&order, OrderStatus::Pending, OrderStatus::Shipped)?;
    advance(state, order.id, actor, OrderStatus::Pending, OrderStatus::Shipped).await
}

/// Customer confirms a `shipped` order arrived.
///
/// # Errors
///
/// `Forbidden` for anyone but the order's customer; `InvalidTransition` unless shipped.
pub async fn confirm_receipt(state: &AppState, order_id: i64, actor: &User) -> Result<Order, OrderError> {
    let order = order_for_actor(state, order_id, actor, Side::Customer, "confirm receipt").await?;
    require_status(&order, OrderStatus::Shipped, OrderStatus::Delivered)?;
    advance(state, order.id, actor, OrderStatus::Shipped, OrderStatus::Delivered).await
}

/// Customer releases payment for a `delivered` order. Capture runs first;
/// if it fails, nothing changes.
///
/// # Errors
///
/// `Forbidden`, `InvalidTransition`, or `Payment` when the capture fails or
/// no provider is configured.
pub async fn confirm_payment(state: &AppState, order_id: i64, actor: &User) -> Result<Order, OrderError> {
    let order = order_for_actor(state, order_id, actor, Side::Customer, "confirm payment").await?;
    require_status(&order, OrderStatus::Delivered, OrderStatus::Completed)?;

    let gateway = state.payments.as_ref().ok_or(PaymentError::NotConfigured)?;
    if let Err(e) = gateway.capture(&order.payment_intent_id).await {
        warn!(order_id, error = %e, "payment capture failed; order left delivered");
        return Err(e.into());
    }
    info!(order_id, payment_intent_id = %order.payment_intent_id, "payment captured");

    advance(state, order.id, actor, OrderStatus::Delivered, OrderStatus::Completed).await
}

/// An order visible to either of its parties.
///
/// # Errors
///
/// `NotFound` when absent or when `user_id` is neither party.
pub async fn get_order_for(state: &AppState, order_id: i64, user_id: i64) -> Result<Order, OrderError> {
    let order = state.store.order(order_id).await?.ok_or(OrderError::NotFound(order_id))?;
    if order.customer_id != user_id && order.farmer_id != user_id {
        return Err(OrderError::NotFound(order_id));
    }
    Ok(order)
}

async fn order_for_actor(
    state: &AppState,
    order_id: i64,
    actor: &User,
    side: Side,
    action: &'static str,
) -> Result<Order, OrderError> {
    let order = get_order_for(state, order_id, actor.id).await?;
    let permitted = match side {
        Side::Customer => order.customer_id,
        Side::Farmer => order.farmer_id,
    };
    if actor.id != permitted {
        return Err(OrderError::Forbidden { user_id: actor.id, action });
    }
    Ok(order)
}

fn require_status(order: &Order, from: OrderStatus, to: OrderStatus) -> Result<(), OrderError> {
    if order.status == from {
        Ok(())
    } else {
        Err(OrderError::InvalidTransition { from: order.status, to })
    }
}

/// Compare-and-set `from → to`, then narrate and publish into the linked room.
async fn advance(
    state: &AppState,
    order_id: i64,
    actor: &User,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<Order, OrderError> {
    let Some(order) = state.store.transition_order(order_id, from, to).await? else {
        let current = state
            .store
            .order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        return Err(OrderError::InvalidTransition { from: current.status, to });
    };
    info!(order_id, %from, %to, actor_id = actor.id, "order transitioned");

    match state.store.room_by_order(order_id).await? {
        Some(room) => {
            message::post_system(state, &room, actor, &narration(&order)).await?;
            state.hub.publish(&room.room_key, &status_event(&room, to, actor));
        }
        None => warn!(order_id, "order has no linked room; transition not narrated"),
    }
    Ok(order)
}

/// System line appended to the room for each strict step.
#[must_use]
pub fn narration(order: &Order) -> String {
    let id = order.id;
    match order.status {
        OrderStatus::Pending => {
            let units = if order.quantity == 1 { "unit" } else { "units" };
            format!("Order #{id} placed for {} {units}. Payment is authorized and the order is awaiting shipment.", order.quantity)
        }
        OrderStatus::Shipped => format!("Order #{id} has been shipped."),
        OrderStatus::Delivered => format!("Order #{id} was received by the customer."),
        OrderStatus::Completed => format!("Payment for order #{id} has been released. The order is complete."),
        other => format!("Order #{id} is now {}.", other.label()),
    }
}

// =============================================================================
// VIEWS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: i64,
    pub customer: i64,
    pub farmer: i64,
    pub product: Option<i64>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub status: OrderStatus,
    pub room_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// # Errors
///
/// Store errors only.
pub async fn view(state: &AppState, order: &Order) -> Result<OrderView, OrderError> {
    let room_id = state.store.room_by_order(order.id).await?.map(|r| r.room_key);
    Ok(OrderView {
        id: order.id,
        customer: order.customer_id,
        farmer: order.farmer_id,
        product: order.product_id,
        quantity: order.quantity,
        amount_cents: order.amount_cents,
        status: order.status,
        room_id,
        created_at: rfc3339(order.created_at),
        updated_at: rfc3339(order.updated_at),
    })
}

#[cfg(test)]
#[path = "order_test.rs"]
mod tests;
