//! Postgres-backed [`ChatStore`].
//!
//! Column lists are kept in constants so every query maps rows through the
//! same helpers. Status columns are TEXT guarded by CHECK constraints; an
//! unknown spelling surfaces as [`StoreError::Corrupt`] rather than a panic.

use std::collections::HashMap;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{
    ChatStore, Message, MessageImage, NewMessage, NewOrder, NewRoom, Order, OrderStatus, Product, Room, Side,
    StoreError, User,
};

const ROOM_COLUMNS: &str = "id, room_key, customer_id, farmer_id, product_id, quantity, order_id, order_status, \
     is_new_order, has_unread_customer, has_unread_farmer, order_timestamp, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, room_id, sender_id, body, image, is_read, created_at";

const ORDER_COLUMNS: &str =
    "id, customer_id, farmer_id, product_id, quantity, amount_cents, payment_intent_id, status, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_room(&self, sql: &str, id: i64) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(room_from_row).transpose()
    }

    /// Load images for a set of messages, grouped by message id in upload order.
    async fn images_for(&self, message_ids: &[i64]) -> Result<HashMap<i64, Vec<MessageImage>>, StoreError> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT id, message_id, path, uploaded_at
             FROM chat_message_images
             WHERE message_id = ANY($1)
             ORDER BY uploaded_at, id",
        )
        .bind(message_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<i64, Vec<MessageImage>> = HashMap::new();
        for row in &rows {
            let image = image_from_row(row)?;
            grouped.entry(image.message_id).or_default().push(image);
        }
        Ok(grouped)
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Message>, StoreError> {
        let mut messages = rows.iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let mut images = self.images_for(&ids).await?;
        for message in &mut messages {
            message.images = images.remove(&message.id).unwrap_or_default();
        }
        Ok(messages)
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn parse_status(raw: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::parse(raw).ok_or_else(|| StoreError::Corrupt(format!("unknown order status {raw:?}")))
}

fn room_from_row(row: &PgRow) -> Result<Room, StoreError> {
    let status: String = row.try_get("order_status")?;
    Ok(Room {
        id: row.try_get("id")?,
        room_key: row.try_get("room_key")?,
        customer_id: row.try_get("customer_id")?,
        farmer_id: row.try_get("farmer_id")?,
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        order_id: row.try_get("order_id")?,
        order_status: parse_status(&status)?,
        is_new_order: row.try_get("is_new_order")?,
        has_unread_customer: row.try_get("has_unread_customer")?,
        has_unread_farmer: row.try_get("has_unread_farmer")?,
        order_timestamp: row.try_get("order_timestamp")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    Ok(Message {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        image: row.try_get("image")?,
        images: Vec::new(),
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn image_from_row(row: &PgRow) -> Result<MessageImage, StoreError> {
    Ok(MessageImage {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        path: row.try_get("path")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        farmer_id: row.try_get("farmer_id")?,
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        amount_cents: row.try_get("amount_cents")?,
        payment_intent_id: row.try_get("payment_intent_id")?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn unread_column(side: Side) -> &'static str {
    match side {
        Side::Customer => "has_unread_customer",
        Side::Farmer => "has_unread_farmer",
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

// =============================================================================
// TRAIT IMPL
// =============================================================================

#[async_trait::async_trait]
impl ChatStore for PgStore {
    async fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, full_name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(User { id: r.try_get("id")?, full_name: r.try_get("full_name")? }))
            .transpose()
    }

    async fn product(&self, product_id: i64) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT id, name, farmer_id FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(Product { id: r.try_get("id")?, name: r.try_get("name")?, farmer_id: r.try_get("farmer_id")? })
        })
        .transpose()
    }

    async fn create_session(&self, user_id: i64, token: &str, ttl_hours: i64) -> Result<(), StoreError> {
        let hours = i32::try_from(ttl_hours).unwrap_or(i32::MAX);
        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at)
             VALUES ($1, $2, now() + make_interval(hours => $3))",
        )
        .bind(token)
        .bind(user_id)
        .bind(hours)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_user_id(&self, token: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE token = $1 AND expires_at > now()")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get("user_id")).transpose()?)
    }

    async fn room_by_key(&self, room_key: &str) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE room_key = $1"))
            .bind(room_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn room_by_id(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        self.fetch_room(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = $1"), room_id)
            .await
    }

    async fn room_by_order(&self, order_id: i64) -> Result<Option<Room>, StoreError> {
        self.fetch_room(&format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE order_id = $1"), order_id)
            .await
    }

    async fn find_room(
        &self,
        customer_id: i64,
        farmer_id: i64,
        product_id: Option<i64>,
    ) -> Result<Option<Room>, StoreError> {
        let row = match product_id {
            Some(product_id) => {
                sqlx::query(&format!(
                    "SELECT {ROOM_COLUMNS} FROM chat_rooms
                     WHERE customer_id = $1 AND farmer_id = $2 AND product_id = $3
                     ORDER BY id LIMIT 1"
                ))
                .bind(customer_id)
                .bind(farmer_id)
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ROOM_COLUMNS} FROM chat_rooms
                     WHERE customer_id = $1 AND farmer_id = $2
                     ORDER BY id LIMIT 1"
                ))
                .bind(customer_id)
                .bind(farmer_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        row.as_ref().map(room_from_row).transpose()
    }

    async fn insert_room(&self, room: NewRoom) -> Result<Option<Room>, StoreError> {
        let conflict_target = if room.product_id.is_some() {
            "(customer_id, farmer_id, product_id)"
        } else {
            "(customer_id, farmer_id) WHERE product_id IS NULL"
        };
        let row = sqlx::query(&format!(
            "INSERT INTO chat_rooms (room_key, customer_id, farmer_id, product_id, quantity)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT {conflict_target} DO NOTHING
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(&room.room_key)
        .bind(room.customer_id)
        .bind(room.farmer_id)
        .bind(room.product_id)
        .bind(room.quantity)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn set_room_quantity(&self, room_id: i64, quantity: i32) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_rooms SET quantity = $2, updated_at = now()
             WHERE id = $1
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(room_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<Room>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms
             WHERE customer_id = $1 OR farmer_id = $1
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(room_from_row).collect()
    }

    async fn update_room_status(&self, room_id: i64, status: OrderStatus) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_rooms
             SET order_status = $2,
                 is_new_order = (is_new_order AND $2 = 'new'),
                 updated_at = now()
             WHERE id = $1
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(room_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn mark_new_order(&self, room_id: i64) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_rooms
             SET order_status = 'new', is_new_order = TRUE, order_timestamp = now(), updated_at = now()
             WHERE id = $1
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn link_room_order(
        &self,
        room_id: i64,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<Option<Room>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(
            "SELECT r.order_id, o.status
             FROM chat_rooms r
             LEFT JOIN orders o ON o.id = r.order_id
             WHERE r.id = $1
             FOR UPDATE OF r",
        )
        .bind(room_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(current) = current else {
            return Ok(None);
        };
        let linked: Option<i64> = current.try_get("order_id")?;
        let linked_status: Option<String> = current.try_get("status")?;
        if let Some(linked) = linked.filter(|id| *id != order_id) {
            if linked_status.as_deref().is_some_and(|s| s != OrderStatus::Completed.as_str()) {
                return Err(StoreError::Conflict(format!("room {room_id} still tracks order {linked}")));
            }
        }

        let row = sqlx::query(&format!(
            "UPDATE chat_rooms
             SET order_id = $2,
                 order_status = $3,
                 is_new_order = ($3 = 'new'),
                 order_timestamp = now(),
                 updated_at = now()
             WHERE id = $1
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(room_id)
        .bind(order_id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO chat_messages (room_id, sender_id, body, image)
             VALUES ($1, $2, $3, $4)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.room_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.image.as_deref())
        .fetch_one(tx.as_mut())
        .await?;
        let mut stored = message_from_row(&row)?;

        for path in &message.images {
            let row = sqlx::query(
                "INSERT INTO chat_message_images (message_id, path)
                 VALUES ($1, $2)
                 RETURNING id, message_id, path, uploaded_at",
            )
            .bind(stored.id)
            .bind(path)
            .fetch_one(tx.as_mut())
            .await?;
            stored.images.push(image_from_row(&row)?);
        }

        let recipient = message.sender_side.other();
        sqlx::query(&format!(
            "UPDATE chat_rooms
             SET {} = TRUE, {} = FALSE, updated_at = now()
             WHERE id = $1",
            unread_column(recipient),
            unread_column(message.sender_side),
        ))
        .bind(message.room_id)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn message(&self, message_id: i64) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn messages(&self, room_id: i64) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages
             WHERE room_id = $1
             ORDER BY created_at, id"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn last_message(&self, room_id: i64) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages
             WHERE room_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT 1"
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(self.hydrate(vec![row]).await?.pop())
    }

    async fn has_message_containing(&self, room_id: i64, sender_id: i64, needle: &str) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM chat_messages
                WHERE room_id = $1 AND sender_id = $2 AND strpos(body, $3) > 0
             )",
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(needle)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn mark_read(&self, room_id: i64, reader: Side, sender_id: i64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE chat_messages SET is_read = TRUE
             WHERE room_id = $1 AND sender_id = $2 AND NOT is_read",
        )
        .bind(room_id)
        .bind(sender_id)
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        sqlx::query(&format!("UPDATE chat_rooms SET {} = FALSE WHERE id = $1", unread_column(reader)))
            .bind(room_id)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn clear_unread(&self, room_id: i64, side: Side) -> Result<(), StoreError> {
        sqlx::query(&format!("UPDATE chat_rooms SET {} = FALSE WHERE id = $1", unread_column(side)))
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unread_count(&self, room_id: i64, sender_id: i64) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM chat_messages
             WHERE room_id = $1 AND sender_id = $2 AND NOT is_read",
        )
        .bind(room_id)
        .bind(sender_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO orders (customer_id, farmer_id, product_id, quantity, amount_cents, payment_intent_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.customer_id)
        .bind(order.farmer_id)
        .bind(order.product_id)
        .bind(order.quantity)
        .bind(order.amount_cents)
        .bind(&order.payment_intent_id)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => order_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "payment intent {} already has an order",
                order.payment_intent_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn order(&self, order_id: i64) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn transition_order(
        &self,
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<Order>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE orders SET status = $3, updated_at = now()
             WHERE id = $1 AND status = $2
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(tx.as_mut())
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let order = order_from_row(&row)?;

        sqlx::query(
            "UPDATE chat_rooms
             SET order_status = $2,
                 is_new_order = (is_new_order AND $2 = 'new'),
                 updated_at = now()
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(to.as_str())
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(Some(order))
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
