//! Admission control for live connections and HTTP callers.
//!
//! SYSTEM CONTEXT
//! ==============
//! A live connection is admitted only after three checks, in order: the
//! token resolves to a session, the session's user exists, and that user is
//! one of the room's two participants. Each failure maps to its own close
//! code. The websocket route runs this before subscribing, so a refused
//! connection never appears in the hub.

use crate::state::AppState;
use crate::store::{Room, Side, StoreError, User};

use super::session;

pub const CLOSE_INTERNAL: u16 = 4000;
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;
pub const CLOSE_IDENTITY_NOT_FOUND: u16 = 4002;
pub const CLOSE_FORBIDDEN: u16 = 4003;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("missing, invalid or expired credential")]
    Unauthenticated,
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("user {user_id} is not a participant of room {room_key}")]
    Forbidden { user_id: i64, room_key: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GateError {
    /// Websocket close code for this refusal.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => CLOSE_UNAUTHENTICATED,
            Self::UserNotFound(_) => CLOSE_IDENTITY_NOT_FOUND,
            Self::RoomNotFound(_) | Self::Forbidden { .. } => CLOSE_FORBIDDEN,
            Self::Store(_) => CLOSE_INTERNAL,
        }
    }
}

impl crate::error::ErrorCode for GateError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_UNAUTHENTICATED",
            Self::UserNotFound(_) => "E_IDENTITY_NOT_FOUND",
            Self::RoomNotFound(_) => "E_ROOM_NOT_FOUND",
            Self::Forbidden { .. } => "E_FORBIDDEN",
            Self::Store(_) => "E_DATABASE",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Unauthenticated | Self::UserNotFound(_) => StatusCode::UNAUTHORIZED,
            Self::RoomNotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An admitted connection: who it is, where, and on which side.
#[derive(Debug, Clone)]
pub struct Admission {
    pub user: User,
    pub room: Room,
    pub side: Side,
}

/// Resolve a bearer token to a user.
///
/// # Errors
///
/// `Unauthenticated` for a missing, malformed or expired token;
/// `UserNotFound` if the session outlived its user.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Result<User, GateError> {
    let token = token.map(str::trim).filter(|t| !t.is_empty()).ok_or(GateError::Unauthenticated)?;
    if !session::is_well_formed(token) {
        return Err(GateError::Unauthenticated);
    }

    let user_id = state
        .store
        .session_user_id(token)
        .await?
        .ok_or(GateError::Unauthenticated)?;

    state
        .store
        .user(user_id)
        .await?
        .ok_or(GateError::UserNotFound(user_id))
}

/// Authenticate, then authorize against `room_key`.
///
/// # Errors
///
/// See [`GateError::close_code`] for how each failure surfaces.
pub async fn admit(state: &AppState, room_key: &str, token: Option<&str>) -> Result<Admission, GateError> {
    let user = authenticate(state, token).await?;

    let room = state
        .store
        .room_by_key(room_key)
        .await?
        .ok_or_else(|| GateError::RoomNotFound(room_key.to_owned()))?;

    let side = room
        .side_of(user.id)
        .ok_or_else(|| GateError::Forbidden { user_id: user.id, room_key: room_key.to_owned() })?;

    Ok(Admission { user, room, side })
}

#[cfg(test)]
#[path = "gatekeeper_test.rs"]
mod tests;
