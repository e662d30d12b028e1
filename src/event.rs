//! Live-connection event codec.
//!
//! DESIGN
//! ======
//! Inbound frames are loose JSON objects. A frame is classified by the first
//! key family present, checked in order: `is_typing`, `order_status`, then
//! chat content (`message` / `image` / `images`). Anything else decodes to
//! `None` and is ignored by the connection loop.
//!
//! Outbound events are a tagged enum serialized with a `type` field.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::OrderStatus;

/// ISO-8601 timestamp as sent to clients.
#[must_use]
pub fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

// =============================================================================
// INBOUND
// =============================================================================

/// Chat content as sent by a client. Images are `data:` URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDraft {
    pub text: String,
    pub image: Option<String>,
    pub images: Vec<String>,
}

impl ChatDraft {
    /// True when there is nothing to persist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none() && self.images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Typing(bool),
    StatusChange(OrderStatus),
    Chat(ChatDraft),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid order status: {0:?}")]
    InvalidStatus(String),
}

impl crate::error::ErrorCode for DecodeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Json(_) => "E_MALFORMED_FRAME",
            Self::InvalidStatus(_) => "E_INVALID_STATUS",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::BAD_REQUEST
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawInbound {
    is_typing: Option<bool>,
    order_status: Option<String>,
    message: Option<String>,
    image: Option<String>,
    images: Option<Vec<String>>,
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for frames that carry nothing actionable.
///
/// # Errors
///
/// Fails on non-object JSON and on an `order_status` outside the enum.
pub fn decode(raw: &str) -> Result<Option<Inbound>, DecodeError> {
    let frame: RawInbound = serde_json::from_str(raw)?;

    if let Some(is_typing) = frame.is_typing {
        return Ok(Some(Inbound::Typing(is_typing)));
    }

    if let Some(status) = frame.order_status {
        return OrderStatus::parse(&status)
            .map(|s| Some(Inbound::StatusChange(s)))
            .ok_or(DecodeError::InvalidStatus(status));
    }

    let draft = ChatDraft {
        text: frame.message.unwrap_or_default(),
        image: frame.image.filter(|s| !s.is_empty()),
        images: frame
            .images
            .unwrap_or_default()
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect(),
    };
    if draft.is_empty() {
        return Ok(None);
    }
    Ok(Some(Inbound::Chat(draft)))
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    TypingStatus {
        user_id: i64,
        is_typing: bool,
    },
    Message {
        message_id: i64,
        message: String,
        sender_id: i64,
        sender_name: String,
        /// RFC 3339 / ISO-8601.
        timestamp: String,
        image: Option<String>,
        all_image_urls: Vec<String>,
    },
    OrderStatusUpdate {
        /// Room key, not the numeric id.
        room_id: String,
        status: OrderStatus,
        updated_by: i64,
        updated_by_name: String,
    },
}

impl Outbound {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypingStatus { .. } => "typing_status",
            Self::Message { .. } => "message",
            Self::OrderStatusUpdate { .. } => "order_status_update",
        }
    }
}

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;
