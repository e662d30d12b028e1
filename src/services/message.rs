//! Message store operations and the send path shared by HTTP and live callers.
//!
//! DESIGN
//! ======
//! `send` writes images, appends the message, then publishes to the room's
//! subscribers while holding the room's lock, so live delivery follows the
//! order the store accepted messages in. Persistence always completes before
//! fanout; a failed fanout never unwinds the write.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::event::{ChatDraft, Outbound, rfc3339};
use crate::services::media::MediaStore;
use crate::services::room::{RoomError, display_name};
use crate::state::AppState;
use crate::store::{Message, NewMessage, Room, Side, StoreError, User};

/// Phrases that mark a customer message as a post-checkout announcement.
const CHECKOUT_PHRASES: [&str; 2] = ["I've just purchased", "I'd like to discuss delivery options"];

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message must contain text or at least one image")]
    InvalidMessage,
    #[error("message {0} not found")]
    NotFound(i64),
    #[error("user {user_id} is not a participant of room {room_key}")]
    Forbidden { user_id: i64, room_key: String },
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for MessageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "E_INVALID_MESSAGE",
            Self::NotFound(_) => "E_MESSAGE_NOT_FOUND",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::Room(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidMessage => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Room(e) => e.status(),
            Self::Store(e) => e.status(),
        }
    }
}

fn sender_side(room: &Room, sender_id: i64) -> Result<Side, MessageError> {
    room.side_of(sender_id)
        .ok_or_else(|| MessageError::Forbidden { user_id: sender_id, room_key: room.room_key.clone() })
}

// =============================================================================
// APPEND / SEND
// =============================================================================

/// Persist one message. Images are already-stored relative paths.
///
/// # Errors
///
/// `InvalidMessage` when there is no text and no image; `Forbidden` for
/// non-participants; store errors.
pub async fn append(
    state: &AppState,
    room: &Room,
    sender_id: i64,
    text: &str,
    image: Option<String>,
    images: Vec<String>,
) -> Result<Message, MessageError> {
    let side = sender_side(room, sender_id)?;
    if text.trim().is_empty() && image.is_none() && images.is_empty() {
        return Err(MessageError::InvalidMessage);
    }
    Ok(state
        .store
        .append_message(NewMessage {
            room_id: room.id,
            sender_id,
            sender_side: side,
            body: text.to_owned(),
            image,
            images,
        })
        .await?)
}

/// Store images, append, run post-checkout detection, and publish.
///
/// An image that fails to decode or write is logged and skipped.
///
/// # Errors
///
/// As [`append`]; `InvalidMessage` also when every image was rejected and
/// there is no text.
pub async fn send(state: &AppState, room: &Room, sender: &User, draft: ChatDraft) -> Result<Message, MessageError> {
    sender_side(room, sender.id)?;
    if draft.is_empty() {
        return Err(MessageError::InvalidMessage);
    }

    let image = match draft.image {
        Some(raw) => store_image(&state.media, &room.room_key, &raw).await,
        None => None,
    };
    let mut images = Vec::with_capacity(draft.images.len());
    for raw in &draft.images {
        if let Some(path) = store_image(&state.media, &room.room_key, raw).await {
            images.push(path);
        }
    }

    let _guard = state.room_locks.acquire(room.id).await;
    let message = append(state, room, sender.id, &draft.text, image, images).await?;

    if room.order_id.is_none() && is_post_checkout_text(&message.body) {
        if state.store.mark_new_order(room.id).await?.is_some() {
            info!(room_key = %room.room_key, message_id = message.id, "post-checkout message; room marked as new order");
        }
    }

    let event = to_event(&state.media, &message, &sender.full_name);
    state.hub.publish(&room.room_key, &event);
    Ok(message)
}

/// Append a system-authored line on behalf of `actor` and publish it.
///
/// # Errors
///
/// As [`append`].
pub async fn post_system(state: &AppState, room: &Room, actor: &User, text: &str) -> Result<Message, MessageError> {
    let _guard = state.room_locks.acquire(room.id).await;
    let message = append(state, room, actor.id, text, None, Vec::new()).await?;
    state
        .hub
        .publish(&room.room_key, &to_event(&state.media, &message, &actor.full_name));
    Ok(message)
}

async fn store_image(media: &MediaStore, room_key: &str, raw: &str) -> Option<String> {
    match media.save_data_url(raw).await {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(%room_key, error = %e, "dropping undecodable image");
            None
        }
    }
}

#[must_use]
pub fn is_post_checkout_text(text: &str) -> bool {
    CHECKOUT_PHRASES.iter().any(|p| text.contains(p))
}

// =============================================================================
// READ
// =============================================================================

/// All messages of a room, oldest first.
///
/// # Errors
///
/// Store errors only.
pub async fn list_by_room(state: &AppState, room: &Room) -> Result<Vec<Message>, MessageError> {
    Ok(state.store.messages(room.id).await?)
}

/// History as seen by `viewer_id`. Viewing clears the viewer's unread flag;
/// read flags on individual messages are left to `mark_read`.
///
/// # Errors
///
/// `Forbidden` for non-participants; store errors.
pub async fn history_for(state: &AppState, room: &Room, viewer_id: i64) -> Result<Vec<Message>, MessageError> {
    let side = sender_side(room, viewer_id)?;
    state.store.clear_unread(room.id, side).await?;
    list_by_room(state, room).await
}

/// A single message, visible only to participants of its room.
///
/// # Errors
///
/// `NotFound` when absent or when `user_id` is not a participant.
pub async fn get_message_for(state: &AppState, message_id: i64, user_id: i64) -> Result<Message, MessageError> {
    let message = state
        .store
        .message(message_id)
        .await?
        .ok_or(MessageError::NotFound(message_id))?;
    let room = state
        .store
        .room_by_id(message.room_id)
        .await?
        .ok_or(MessageError::NotFound(message_id))?;
    if room.side_of(user_id).is_none() {
        return Err(MessageError::NotFound(message_id));
    }
    Ok(message)
}

// =============================================================================
// VIEWS
// =============================================================================

/// Live event for a stored message, with absolute image URLs.
#[must_use]
pub fn to_event(media: &MediaStore, message: &Message, sender_name: &str) -> Outbound {
    Outbound::Message {
        message_id: message.id,
        message: message.body.clone(),
        sender_id: message.sender_id,
        sender_name: sender_name.to_owned(),
        timestamp: rfc3339(message.created_at),
        image: message.image.as_deref().map(|p| media.url_for(p)),
        all_image_urls: message.image_paths().into_iter().map(|p| media.url_for(p)).collect(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    pub id: i64,
    pub image: String,
    pub uploaded_at: String,
}

/// HTTP representation of a message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub room: i64,
    pub sender: i64,
    pub sender_name: String,
    pub message: String,
    pub image: Option<String>,
    pub images: Vec<ImageView>,
    pub all_image_urls: Vec<String>,
    pub is_read: bool,
    pub timestamp: String,
}

#[must_use]
pub fn view(media: &MediaStore, message: &Message, sender_name: &str) -> MessageView {
    MessageView {
        id: message.id,
        room: message.room_id,
        sender: message.sender_id,
        sender_name: sender_name.to_owned(),
        message: message.body.clone(),
        image: message.image.as_deref().map(|p| media.url_for(p)),
        images: message
            .images
            .iter()
            .map(|img| ImageView { id: img.id, image: media.url_for(&img.path), uploaded_at: rfc3339(img.uploaded_at) })
            .collect(),
        all_image_urls: message.image_paths().into_iter().map(|p| media.url_for(p)).collect(),
        is_read: message.is_read,
        timestamp: rfc3339(message.created_at),
    }
}

/// Views for a room's messages; participant names are looked up once.
///
/// # Errors
///
/// Store errors only.
pub async fn views_for_room(state: &AppState, room: &Room, messages: &[Message]) -> Result<Vec<MessageView>, MessageError> {
    let customer_name = display_name(state, room.customer_id).await?;
    let farmer_name = display_name(state, room.farmer_id).await?;
    Ok(messages
        .iter()
        .map(|m| {
            let name = if m.sender_id == room.customer_id { &customer_name } else { &farmer_name };
            view(&state.media, m, name)
        })
        .collect())
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
