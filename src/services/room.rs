//! Room directory: find-or-create, lookup, listing and summaries.
//!
//! DESIGN
//! ======
//! A room is keyed by an opaque UUID string and holds exactly one customer
//! and one farmer. Creation races are settled by the store's unique index on
//! (customer, farmer, product): the loser re-reads the winner's row and
//! reports `created = false`, so the intro message is written at most once.

use serde::Serialize;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::event::rfc3339;
use crate::services::unread;
use crate::state::AppState;
use crate::store::{NewMessage, NewRoom, OrderStatus, Room, Side, StoreError};

const PREVIEW_CHARS: usize = 50;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(String),
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("product {0} not found")]
    ProductNotFound(i64),
    #[error("customer and farmer must be different users")]
    SameParticipant,
    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
    #[error("user {user_id} is not a participant of room {room_key}")]
    Forbidden { user_id: i64, room_key: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROOM_NOT_FOUND",
            Self::UserNotFound(_) => "E_USER_NOT_FOUND",
            Self::ProductNotFound(_) => "E_PRODUCT_NOT_FOUND",
            Self::SameParticipant => "E_SAME_PARTICIPANT",
            Self::InvalidQuantity(_) => "E_INVALID_QUANTITY",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::Store(e) => e.error_code(),
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound(_) | Self::UserNotFound(_) | Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::SameParticipant | Self::InvalidQuantity(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Store(e) => e.status(),
        }
    }
}

/// Why a room is being opened. Decides the intro message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomOrigin {
    Direct,
    Inquiry,
    Checkout,
}

#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub customer_id: i64,
    pub farmer_id: i64,
    pub product_id: Option<i64>,
    pub quantity: i32,
    pub origin: RoomOrigin,
    /// Fall back to any room between the pair when no exact-product room exists.
    pub reuse_any: bool,
}

#[derive(Debug, Clone)]
pub struct FoundRoom {
    pub room: Room,
    pub created: bool,
}

// =============================================================================
// FIND OR CREATE
// =============================================================================

/// Return the existing room for the pair (and product), or create one.
///
/// # Errors
///
/// Validation errors for bad participants, product or quantity; store errors.
pub async fn find_or_create_room(state: &AppState, req: RoomRequest) -> Result<FoundRoom, RoomError> {
    if req.customer_id == req.farmer_id {
        return Err(RoomError::SameParticipant);
    }
    if req.quantity < 1 {
        return Err(RoomError::InvalidQuantity(req.quantity));
    }
    for user_id in [req.customer_id, req.farmer_id] {
        if state.store.user(user_id).await?.is_none() {
            return Err(RoomError::UserNotFound(user_id));
        }
    }
    let product = match req.product_id {
        Some(id) => Some(state.store.product(id).await?.ok_or(RoomError::ProductNotFound(id))?),
        None => None,
    };

    if let Some(product) = &product {
        if let Some(room) = state
            .store
            .find_room(req.customer_id, req.farmer_id, Some(product.id))
            .await?
        {
            let room = sync_quantity(state, room, req.quantity).await?;
            return Ok(FoundRoom { room, created: false });
        }
    }
    if req.reuse_any || product.is_none() {
        if let Some(room) = state.store.find_room(req.customer_id, req.farmer_id, None).await? {
            return Ok(FoundRoom { room, created: false });
        }
    }

    let inserted = state
        .store
        .insert_room(NewRoom {
            room_key: Uuid::new_v4().to_string(),
            customer_id: req.customer_id,
            farmer_id: req.farmer_id,
            product_id: req.product_id,
            quantity: req.quantity,
        })
        .await?;

    let Some(room) = inserted else {
        // Lost a creation race; the winner wrote the intro.
        let room = state
            .store
            .find_room(req.customer_id, req.farmer_id, req.product_id)
            .await?
            .ok_or_else(|| RoomError::NotFound(format!("{}/{}", req.customer_id, req.farmer_id)))?;
        return Ok(FoundRoom { room, created: false });
    };
    info!(room_key = %room.room_key, customer_id = room.customer_id, farmer_id = room.farmer_id, "room created");

    if let Some(product) = &product {
        post_intro(state, &room, req.origin, &product.name, req.quantity).await?;
    }

    // Re-read so unread flags reflect the intro.
    let room = state.store.room_by_id(room.id).await?.unwrap_or(room);
    Ok(FoundRoom { room, created: true })
}

/// Append the intro unless the customer already mentioned the product.
async fn post_intro(
    state: &AppState,
    room: &Room,
    origin: RoomOrigin,
    product_name: &str,
    quantity: i32,
) -> Result<(), RoomError> {
    let Some(text) = intro_message(origin, product_name, quantity) else {
        return Ok(());
    };
    let duplicate = state
        .store
        .has_message_containing(room.id, room.customer_id, product_name)
        .await?;
    if duplicate {
        return Ok(());
    }
    state
        .store
        .append_message(NewMessage {
            room_id: room.id,
            sender_id: room.customer_id,
            sender_side: Side::Customer,
            body: text,
            image: None,
            images: Vec::new(),
        })
        .await?;
    Ok(())
}

async fn sync_quantity(state: &AppState, room: Room, quantity: i32) -> Result<Room, RoomError> {
    if room.quantity == quantity {
        return Ok(room);
    }
    Ok(state.store.set_room_quantity(room.id, quantity).await?.unwrap_or(room))
}

/// Intro text for a freshly opened room, authored by the customer.
#[must_use]
pub fn intro_message(origin: RoomOrigin, product_name: &str, quantity: i32) -> Option<String> {
    match origin {
        RoomOrigin::Direct => None,
        RoomOrigin::Checkout => {
            let units = if quantity > 1 { "units" } else { "unit" };
            Some(format!(
                "<strong>{product_name}</strong>\n\nHello! I've just purchased {quantity} {units} of {product_name}. \
                 I'd like to discuss delivery options and any other details about my order."
            ))
        }
        RoomOrigin::Inquiry => Some(format!(
            "<strong>{product_name}</strong>\n\nHi, I'm interested in purchasing {quantity} unit(s) of {product_name}. \
             Can you provide more information about it?"
        )),
    }
}

// =============================================================================
// LOOKUP
// =============================================================================

/// Look a room up by key, falling back to its numeric id.
///
/// # Errors
///
/// `NotFound` if neither matches.
pub async fn get_room_by_key(state: &AppState, key: &str) -> Result<Room, RoomError> {
    if let Some(room) = state.store.room_by_key(key).await? {
        return Ok(room);
    }
    if let Ok(id) = key.parse::<i64>() {
        if let Some(room) = state.store.room_by_id(id).await? {
            return Ok(room);
        }
    }
    Err(RoomError::NotFound(key.to_owned()))
}

/// Look a room up and require `user_id` to be one of its participants.
///
/// # Errors
///
/// `NotFound` or `Forbidden`.
pub async fn get_room_for(state: &AppState, key: &str, user_id: i64) -> Result<(Room, Side), RoomError> {
    let room = get_room_by_key(state, key).await?;
    let side = room
        .side_of(user_id)
        .ok_or_else(|| RoomError::Forbidden { user_id, room_key: room.room_key.clone() })?;
    Ok((room, side))
}

/// Rooms `user_id` takes part in, most recently updated first.
///
/// # Errors
///
/// Store errors only.
pub async fn list_rooms_for_participant(state: &AppState, user_id: i64) -> Result<Vec<Room>, RoomError> {
    Ok(state.store.rooms_for_user(user_id).await?)
}

/// Rooms where `farmer_id` is the farmer, ordered for the order board.
///
/// # Errors
///
/// Store errors only.
pub async fn farmer_orders(state: &AppState, farmer_id: i64) -> Result<Vec<Room>, RoomError> {
    let mut rooms: Vec<Room> = state
        .store
        .rooms_for_user(farmer_id)
        .await?
        .into_iter()
        .filter(|r| r.farmer_id == farmer_id)
        .collect();
    rooms.sort_by(|a, b| {
        status_priority(a.order_status)
            .cmp(&status_priority(b.order_status))
            .then(b.is_new_order.cmp(&a.is_new_order))
            .then(b.updated_at.cmp(&a.updated_at))
    });
    Ok(rooms)
}

/// Number of rooms listed under `recent_orders` on the farmer dashboard.
pub const DASHBOARD_RECENT: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct RecentOrder {
    pub room_id: String,
    pub customer_name: String,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub order_status: OrderStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmerDashboard {
    pub total_orders: usize,
    pub completed_orders: usize,
    /// Rooms still in `new` or `active`.
    pub active_orders: usize,
    pub recent_orders: Vec<RecentOrder>,
}

/// Order counts over the farmer's rooms plus the newest few rooms.
///
/// # Errors
///
/// Store errors only.
pub async fn farmer_dashboard(state: &AppState, farmer_id: i64) -> Result<FarmerDashboard, RoomError> {
    let mut rooms: Vec<Room> = state
        .store
        .rooms_for_user(farmer_id)
        .await?
        .into_iter()
        .filter(|r| r.farmer_id == farmer_id)
        .collect();

    let completed_orders = rooms.iter().filter(|r| r.order_status == OrderStatus::Completed).count();
    let active_orders = rooms
        .iter()
        .filter(|r| matches!(r.order_status, OrderStatus::New | OrderStatus::Active))
        .count();
    let total_orders = rooms.len();

    rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    let mut recent_orders = Vec::with_capacity(DASHBOARD_RECENT);
    for room in rooms.into_iter().take(DASHBOARD_RECENT) {
        let product_name = match room.product_id {
            Some(id) => state.store.product(id).await?.map(|p| p.name),
            None => None,
        };
        recent_orders.push(RecentOrder {
            customer_name: display_name(state, room.customer_id).await?,
            product_name,
            quantity: room.quantity,
            order_status: room.order_status,
            created_at: rfc3339(room.created_at),
            room_id: room.room_key,
        });
    }

    Ok(FarmerDashboard { total_orders, completed_orders, active_orders, recent_orders })
}

#[must_use]
pub fn status_priority(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::New => 0,
        OrderStatus::Active => 1,
        OrderStatus::Pending => 2,
        OrderStatus::Shipped => 3,
        OrderStatus::Delivered => 4,
        OrderStatus::Completed => 5,
    }
}

// =============================================================================
// SUMMARIES
// =============================================================================

/// Room as shown in listings, relative to one viewer.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: i64,
    pub room_id: String,
    pub customer: i64,
    pub farmer: i64,
    pub customer_name: String,
    pub farmer_name: String,
    pub product: Option<i64>,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub order: Option<i64>,
    pub order_status: OrderStatus,
    pub is_new_order: bool,
    pub has_unread_customer: bool,
    pub has_unread_farmer: bool,
    pub unread_count: i64,
    pub last_message_text: String,
    pub order_timestamp: String,
    pub time_since_order: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Build the listing view of `room` for `viewer_id`.
///
/// # Errors
///
/// Store errors only.
pub async fn summarize(state: &AppState, room: &Room, viewer_id: i64) -> Result<RoomSummary, RoomError> {
    let unread_count = unread::unread_count_for(state, room, viewer_id).await?;
    let last_message_text = state
        .store
        .last_message(room.id)
        .await?
        .map(|m| preview_text(&m.body))
        .unwrap_or_default();
    let customer_name = display_name(state, room.customer_id).await?;
    let farmer_name = display_name(state, room.farmer_id).await?;
    let product_name = match room.product_id {
        Some(id) => state.store.product(id).await?.map(|p| p.name),
        None => None,
    };

    Ok(RoomSummary {
        id: room.id,
        room_id: room.room_key.clone(),
        customer: room.customer_id,
        farmer: room.farmer_id,
        customer_name,
        farmer_name,
        product: room.product_id,
        product_name,
        quantity: room.quantity,
        order: room.order_id,
        order_status: room.order_status,
        is_new_order: room.is_new_order,
        has_unread_customer: room.has_unread_customer,
        has_unread_farmer: room.has_unread_farmer,
        unread_count,
        last_message_text,
        order_timestamp: rfc3339(room.order_timestamp),
        time_since_order: format_elapsed(OffsetDateTime::now_utc() - room.order_timestamp),
        created_at: rfc3339(room.created_at),
        updated_at: rfc3339(room.updated_at),
    })
}

pub(crate) async fn display_name(state: &AppState, user_id: i64) -> Result<String, StoreError> {
    Ok(state
        .store
        .user(user_id)
        .await?
        .map(|u| u.full_name)
        .unwrap_or_default())
}

/// First 50 characters, with `...` when cut.
#[must_use]
pub fn preview_text(body: &str) -> String {
    if body.chars().count() <= PREVIEW_CHARS {
        return body.to_owned();
    }
    let mut out: String = body.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

/// "N minutes/hours/days ago", singular for 1. Negative spans read as 0.
#[must_use]
pub fn format_elapsed(elapsed: time::Duration) -> String {
    let minutes = elapsed.whole_minutes().max(0);
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 { format!("{n} {unit} ago") } else { format!("{n} {unit}s ago") }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
