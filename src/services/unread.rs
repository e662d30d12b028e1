//! Read receipts and unread counts, always relative to one participant.

use tracing::debug;

use crate::services::room::RoomError;
use crate::state::AppState;
use crate::store::Room;

/// Mark everything the other participant sent as read for `reader_id`.
/// Returns the number of messages flipped; a repeat call returns 0.
///
/// # Errors
///
/// `Forbidden` for non-participants; store errors.
pub async fn mark_read(state: &AppState, room: &Room, reader_id: i64) -> Result<u64, RoomError> {
    let side = room
        .side_of(reader_id)
        .ok_or_else(|| RoomError::Forbidden { user_id: reader_id, room_key: room.room_key.clone() })?;
    let updated = state
        .store
        .mark_read(room.id, side, room.participant(side.other()))
        .await?;
    debug!(room_key = %room.room_key, reader_id, updated, "marked read");
    Ok(updated)
}

/// Unread messages from the other participant, as seen by `viewer_id`.
/// Outsiders see 0.
///
/// # Errors
///
/// Store errors only.
pub async fn unread_count_for(state: &AppState, room: &Room, viewer_id: i64) -> Result<i64, RoomError> {
    let Some(side) = room.side_of(viewer_id) else {
        return Ok(0);
    };
    Ok(state.store.unread_count(room.id, room.participant(side.other())).await?)
}

#[cfg(test)]
#[path = "unread_test.rs"]
mod tests;
