//! In-memory [`ChatStore`] used by unit and end-to-end tests.
//!
//! One mutex guards the whole dataset, so every trait method is atomic the
//! same way the Postgres transactions are.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use time::{Duration, OffsetDateTime};

use super::{
    ChatStore, Message, MessageImage, NewMessage, NewOrder, NewRoom, Order, OrderStatus, Product, Room, Side,
    StoreError, User,
};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
    products: HashMap<i64, Product>,
    sessions: HashMap<String, (i64, OffsetDateTime)>,
    rooms: BTreeMap<i64, Room>,
    messages: BTreeMap<i64, Message>,
    orders: BTreeMap<i64, Order>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn seed_user(&self, full_name: &str) -> User {
        let mut inner = self.lock();
        let user = User { id: inner.next_id(), full_name: full_name.to_owned() };
        inner.users.insert(user.id, user.clone());
        user
    }

    pub fn seed_product(&self, name: &str, farmer_id: i64) -> Product {
        let mut inner = self.lock();
        let product = Product { id: inner.next_id(), name: name.to_owned(), farmer_id: Some(farmer_id) };
        inner.products.insert(product.id, product.clone());
        product
    }

    pub fn remove_user(&self, user_id: i64) {
        self.lock().users.remove(&user_id);
    }

    pub fn expire_session(&self, token: &str) {
        if let Some(entry) = self.lock().sessions.get_mut(token) {
            entry.1 = OffsetDateTime::now_utc() - Duration::seconds(1);
        }
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    pub fn message_count(&self, room_id: i64) -> usize {
        self.lock().messages.values().filter(|m| m.room_id == room_id).count()
    }

    /// Overwrite a room's `updated_at`, for ordering tests.
    pub fn touch_room(&self, room_id: i64, at: OffsetDateTime) {
        if let Some(room) = self.lock().rooms.get_mut(&room_id) {
            room.updated_at = at;
        }
    }
}

fn set_unread(room: &mut Room, side: Side, value: bool) {
    match side {
        Side::Customer => room.has_unread_customer = value,
        Side::Farmer => room.has_unread_farmer = value,
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryStore {
    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn product(&self, product_id: i64) -> Result<Option<Product>, StoreError> {
        Ok(self.lock().products.get(&product_id).cloned())
    }

    async fn create_session(&self, user_id: i64, token: &str, ttl_hours: i64) -> Result<(), StoreError> {
        let expires = OffsetDateTime::now_utc() + Duration::hours(ttl_hours);
        self.lock().sessions.insert(token.to_owned(), (user_id, expires));
        Ok(())
    }

    async fn session_user_id(&self, token: &str) -> Result<Option<i64>, StoreError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .lock()
            .sessions
            .get(token)
            .filter(|(_, expires)| *expires > now)
            .map(|(user_id, _)| *user_id))
    }

    async fn room_by_key(&self, room_key: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.lock().rooms.values().find(|r| r.room_key == room_key).cloned())
    }

    async fn room_by_id(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        Ok(self.lock().rooms.get(&room_id).cloned())
    }

    async fn room_by_order(&self, order_id: i64) -> Result<Option<Room>, StoreError> {
        Ok(self.lock().rooms.values().find(|r| r.order_id == Some(order_id)).cloned())
    }

    async fn find_room(
        &self,
        customer_id: i64,
        farmer_id: i64,
        product_id: Option<i64>,
    ) -> Result<Option<Room>, StoreError> {
        Ok(self
            .lock()
            .rooms
            .values()
            .find(|r| {
                r.customer_id == customer_id && r.farmer_id == farmer_id && product_id.is_none_or(|p| r.product_id == Some(p))
            })
            .cloned())
    }

    async fn insert_room(&self, room: NewRoom) -> Result<Option<Room>, StoreError> {
        let mut inner = self.lock();
        let taken = inner.rooms.values().any(|r| {
            (r.customer_id, r.farmer_id, r.product_id) == (room.customer_id, room.farmer_id, room.product_id)
        });
        if taken {
            return Ok(None);
        }
        if inner.rooms.values().any(|r| r.room_key == room.room_key) {
            return Err(StoreError::Conflict(format!("room key {} already exists", room.room_key)));
        }
        let now = OffsetDateTime::now_utc();
        let stored = Room {
            id: inner.next_id(),
            room_key: room.room_key,
            customer_id: room.customer_id,
            farmer_id: room.farmer_id,
            product_id: room.product_id,
            quantity: room.quantity,
            order_id: None,
            order_status: OrderStatus::New,
            is_new_order: true,
            has_unread_customer: false,
            has_unread_farmer: false,
            order_timestamp: now,
            created_at: now,
            updated_at: now,
        };
        inner.rooms.insert(stored.id, stored.clone());
        Ok(Some(stored))
    }

    async fn set_room_quantity(&self, room_id: i64, quantity: i32) -> Result<Option<Room>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.rooms.get_mut(&room_id).map(|room| {
            room.quantity = quantity;
            room.updated_at = OffsetDateTime::now_utc();
            room.clone()
        }))
    }

    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self
            .lock()
            .rooms
            .values()
            .filter(|r| r.customer_id == user_id || r.farmer_id == user_id)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(rooms)
    }

    async fn update_room_status(&self, room_id: i64, status: OrderStatus) -> Result<Option<Room>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.rooms.get_mut(&room_id).map(|room| {
            room.order_status = status;
            room.is_new_order = room.is_new_order && status == OrderStatus::New;
            room.updated_at = OffsetDateTime::now_utc();
            room.clone()
        }))
    }

    async fn mark_new_order(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        let mut inner = self.lock();
        Ok(inner.rooms.get_mut(&room_id).map(|room| {
            let now = OffsetDateTime::now_utc();
            room.order_status = OrderStatus::New;
            room.is_new_order = true;
            room.order_timestamp = now;
            room.updated_at = now;
            room.clone()
        }))
    }

    async fn link_room_order(
        &self,
        room_id: i64,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<Option<Room>, StoreError> {
        let mut inner = self.lock();
        if inner.rooms.values().any(|r| r.order_id == Some(order_id) && r.id != room_id) {
            return Err(StoreError::Conflict(format!("order {order_id} is already linked")));
        }
        let current = inner.rooms.get(&room_id).and_then(|r| r.order_id).filter(|id| *id != order_id);
        if let Some(current) = current {
            let live = inner.orders.get(&current).is_some_and(|o| o.status != OrderStatus::Completed);
            if live {
                return Err(StoreError::Conflict(format!("room {room_id} still tracks order {current}")));
            }
        }
        Ok(inner.rooms.get_mut(&room_id).map(|room| {
            let now = OffsetDateTime::now_utc();
            room.order_id = Some(order_id);
            room.order_status = status;
            room.is_new_order = status == OrderStatus::New;
            room.order_timestamp = now;
            room.updated_at = now;
            room.clone()
        }))
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut inner = self.lock();
        if !inner.rooms.contains_key(&message.room_id) {
            return Err(StoreError::Conflict(format!("room {} does not exist", message.room_id)));
        }
        let now = OffsetDateTime::now_utc();
        let id = inner.next_id();
        let mut images = Vec::with_capacity(message.images.len());
        for path in message.images {
            images.push(MessageImage { id: inner.next_id(), message_id: id, path, uploaded_at: now });
        }
        let stored = Message {
            id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            body: message.body,
            image: message.image,
            images,
            is_read: false,
            created_at: now,
        };
        inner.messages.insert(id, stored.clone());
        if let Some(room) = inner.rooms.get_mut(&message.room_id) {
            set_unread(room, message.sender_side.other(), true);
            set_unread(room, message.sender_side, false);
            room.updated_at = now;
        }
        Ok(stored)
    }

    async fn message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self.lock().messages.get(&message_id).cloned())
    }

    async fn messages(&self, room_id: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .values()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn last_message(&self, room_id: i64) -> Result<Option<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .values()
            .rev()
            .find(|m| m.room_id == room_id)
            .cloned())
    }

    async fn has_message_containing(&self, room_id: i64, sender_id: i64, needle: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .messages
            .values()
            .any(|m| m.room_id == room_id && m.sender_id == sender_id && m.body.contains(needle)))
    }

    async fn mark_read(&self, room_id: i64, reader: Side, sender_id: i64) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut updated = 0;
        for message in inner.messages.values_mut() {
            if message.room_id == room_id && message.sender_id == sender_id && !message.is_read {
                message.is_read = true;
                updated += 1;
            }
        }
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            set_unread(room, reader, false);
        }
        Ok(updated)
    }

    async fn clear_unread(&self, room_id: i64, side: Side) -> Result<(), StoreError> {
        if let Some(room) = self.lock().rooms.get_mut(&room_id) {
            set_unread(room, side, false);
        }
        Ok(())
    }

    async fn unread_count(&self, room_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        let count = self
            .lock()
            .messages
            .values()
            .filter(|m| m.room_id == room_id && m.sender_id == sender_id && !m.is_read)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let mut inner = self.lock();
        if inner.orders.values().any(|o| o.payment_intent_id == order.payment_intent_id) {
            return Err(StoreError::Conflict(format!(
                "payment intent {} already has an order",
                order.payment_intent_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let stored = Order {
            id: inner.next_id(),
            customer_id: order.customer_id,
            farmer_id: order.farmer_id,
            product_id: order.product_id,
            quantity: order.quantity,
            amount_cents: order.amount_cents,
            payment_intent_id: order.payment_intent_id,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn order(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn transition_order(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut inner = self.lock();
        let now = OffsetDateTime::now_utc();
        let Some(order) = inner.orders.get_mut(&order_id).filter(|o| o.status == from) else {
            return Ok(None);
        };
        order.status = to;
        order.updated_at = now;
        let order = order.clone();

        if let Some(room) = inner.rooms.values_mut().find(|r| r.order_id == Some(order_id)) {
            room.order_status = to;
            room.is_new_order = room.is_new_order && to == OrderStatus::New;
            room.updated_at = now;
        }
        Ok(Some(order))
    }
}
