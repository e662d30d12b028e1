//! Durable chat state: rooms, messages, images, orders, sessions.
//!
//! DESIGN
//! ======
//! Services talk to persistence through the [`ChatStore`] trait so the
//! Postgres implementation can be swapped for an in-memory one in tests.
//! Every method is individually atomic. Multi-row effects (append + unread
//! flags, mark-read + flag clear, order transition + room status) run in a
//! single transaction inside the implementation.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use postgres::PgStore;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

// =============================================================================
// ORDER STATUS
// =============================================================================

/// Closed set of order states shared by rooms and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Pending,
    Active,
    Shipped,
    Delivered,
    Completed,
}

impl OrderStatus {
    pub const ALL: [Self; 6] = [Self::New, Self::Pending, Self::Active, Self::Shipped, Self::Delivered, Self::Completed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
        }
    }

    /// Case-insensitive parse of the wire/database spelling.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw))
    }

    /// Human-readable label used in narrated system messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::New => "New Order",
            Self::Pending => "Pending",
            Self::Active => "Active Order",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Completed => "Completed Order",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// IDENTITIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub farmer_id: Option<i64>,
}

/// Which half of a two-party room a participant occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Customer,
    Farmer,
}

impl Side {
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Customer => Self::Farmer,
            Self::Farmer => Self::Customer,
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Mirrors the `chat_rooms` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: i64,
    pub room_key: String,
    pub customer_id: i64,
    pub farmer_id: i64,
    pub product_id: Option<i64>,
    pub quantity: i32,
    pub order_id: Option<i64>,
    pub order_status: OrderStatus,
    pub is_new_order: bool,
    pub has_unread_customer: bool,
    pub has_unread_farmer: bool,
    pub order_timestamp: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Room {
    /// The side `user_id` occupies, or `None` for outsiders.
    #[must_use]
    pub fn side_of(&self, user_id: i64) -> Option<Side> {
        if user_id == self.customer_id {
            Some(Side::Customer)
        } else if user_id == self.farmer_id {
            Some(Side::Farmer)
        } else {
            None
        }
    }

    #[must_use]
    pub fn participant(&self, side: Side) -> i64 {
        match side {
            Side::Customer => self.customer_id,
            Side::Farmer => self.farmer_id,
        }
    }

    #[must_use]
    pub fn has_unread(&self, side: Side) -> bool {
        match side {
            Side::Customer => self.has_unread_customer,
            Side::Farmer => self.has_unread_farmer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub room_key: String,
    pub customer_id: i64,
    pub farmer_id: i64,
    pub product_id: Option<i64>,
    pub quantity: i32,
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Mirrors the `chat_message_images` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageImage {
    pub id: i64,
    pub message_id: i64,
    pub path: String,
    pub uploaded_at: OffsetDateTime,
}

/// Mirrors the `chat_messages` table plus its attached images.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub image: Option<String>,
    pub images: Vec<MessageImage>,
    pub is_read: bool,
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Primary image first, then extras in upload order.
    #[must_use]
    pub fn image_paths(&self) -> Vec<&str> {
        self.image
            .as_deref()
            .into_iter()
            .chain(self.images.iter().map(|img| img.path.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub sender_id: i64,
    /// Side of the sender; decides which unread flag flips.
    pub sender_side: Side,
    pub body: String,
    pub image: Option<String>,
    pub images: Vec<String>,
}

// =============================================================================
// ORDERS
// =============================================================================

/// Mirrors the `orders` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub farmer_id: i64,
    pub product_id: Option<i64>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub payment_intent_id: String,
    pub status: OrderStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: i64,
    pub farmer_id: i64,
    pub product_id: Option<i64>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub payment_intent_id: String,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn product(&self, product_id: i64) -> Result<Option<Product>, StoreError>;

    async fn create_session(&self, user_id: i64, token: &str, ttl_hours: i64) -> Result<(), StoreError>;

    /// Resolve an unexpired session token to its user id.
    async fn session_user_id(&self, token: &str) -> Result<Option<i64>, StoreError>;

    async fn room_by_key(&self, room_key: &str) -> Result<Option<Room>, StoreError>;

    async fn room_by_id(&self, room_id: i64) -> Result<Option<Room>, StoreError>;

    async fn room_by_order(&self, order_id: i64) -> Result<Option<Room>, StoreError>;

    /// Oldest room between the pair. `product_id = None` matches any product.
    async fn find_room(
        &self,
        customer_id: i64,
        farmer_id: i64,
        product_id: Option<i64>,
    ) -> Result<Option<Room>, StoreError>;

    /// Insert a room. Returns `None` when a room for the same
    /// (customer, farmer, product) already exists; a missing product counts
    /// as one value, so a pair has at most one product-less room.
    async fn insert_room(&self, room: NewRoom) -> Result<Option<Room>, StoreError>;

    async fn set_room_quantity(&self, room_id: i64, quantity: i32) -> Result<Option<Room>, StoreError>;

    /// Rooms where `user_id` is either participant, most recently updated first.
    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError>;

    /// Set the room status. `is_new_order` survives only if the status is `new`.
    async fn update_room_status(&self, room_id: i64, status: OrderStatus) -> Result<Option<Room>, StoreError>;

    /// Reset the room to a fresh `new` order stamped now.
    async fn mark_new_order(&self, room_id: i64) -> Result<Option<Room>, StoreError>;

    /// Point the room at `order_id`. Refused with [`StoreError::Conflict`]
    /// while the room still tracks a different order that is not completed.
    async fn link_room_order(
        &self,
        room_id: i64,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<Option<Room>, StoreError>;

    /// Append a message with its images and flip the room's unread flags:
    /// recipient side set, sender side cleared.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn message(&self, message_id: i64) -> Result<Option<Message>, StoreError>;

    /// All messages of a room, oldest first. Each call is a fresh query.
    async fn messages(&self, room_id: i64) -> Result<Vec<Message>, StoreError>;

    async fn last_message(&self, room_id: i64) -> Result<Option<Message>, StoreError>;

    async fn has_message_containing(&self, room_id: i64, sender_id: i64, needle: &str) -> Result<bool, StoreError>;

    /// Mark every unread message from `sender_id` as read and clear the
    /// reader's unread flag. Returns the number of messages flipped.
    async fn mark_read(&self, room_id: i64, reader: Side, sender_id: i64) -> Result<u64, StoreError>;

    async fn clear_unread(&self, room_id: i64, side: Side) -> Result<(), StoreError>;

    async fn unread_count(&self, room_id: i64, sender_id: i64) -> Result<i64, StoreError>;

    /// Insert an order in status `new`. A duplicate payment intent is a
    /// [`StoreError::Conflict`].
    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn order(&self, order_id: i64) -> Result<Option<Order>, StoreError>;

    /// Compare-and-set `from → to`. Also mirrors the status onto the linked
    /// room. Returns `None` (nothing written) if the order is not in `from`.
    async fn transition_order(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
