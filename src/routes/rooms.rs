//! Chat room REST routes.
//!
//! Handlers translate HTTP into service calls; every rule lives in
//! `services::{room, message, unread, order}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::event::ChatDraft;
use crate::routes::auth::AuthUser;
use crate::services::message::{self, MessageView};
use crate::services::room::{self, RoomOrigin, RoomRequest, RoomSummary, display_name};
use crate::services::{order, unread};
use crate::state::AppState;
use crate::store::Room;

async fn summaries(state: &AppState, rooms: &[Room], viewer_id: i64) -> Result<Vec<RoomSummary>, ApiError> {
    let mut out = Vec::with_capacity(rooms.len());
    for room in rooms {
        out.push(room::summarize(state, room, viewer_id).await?);
    }
    Ok(out)
}

// =============================================================================
// ROOMS
// =============================================================================

/// `GET /api/chat/rooms`
pub async fn list_rooms(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let rooms = room::list_rooms_for_participant(&state, auth.user.id).await?;
    Ok(Json(summaries(&state, &rooms, auth.user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomBody {
    pub customer: i64,
    pub farmer: i64,
    pub product: Option<i64>,
    pub quantity: Option<i32>,
    #[serde(default)]
    pub is_post_checkout: bool,
}

/// `POST /api/chat/rooms`: find or create. 201 when a room was created.
pub async fn create_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateRoomBody>,
) -> Result<(StatusCode, Json<RoomSummary>), ApiError> {
    if auth.user.id != body.customer && auth.user.id != body.farmer {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "E_FORBIDDEN", "caller must be the customer or the farmer"));
    }
    let origin = match (body.product, body.is_post_checkout) {
        (None, _) => RoomOrigin::Direct,
        (Some(_), true) => RoomOrigin::Checkout,
        (Some(_), false) => RoomOrigin::Inquiry,
    };
    let found = room::find_or_create_room(
        &state,
        RoomRequest {
            customer_id: body.customer,
            farmer_id: body.farmer,
            product_id: body.product,
            quantity: body.quantity.unwrap_or(1),
            origin,
            reuse_any: true,
        },
    )
    .await?;

    let status = if found.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(room::summarize(&state, &found.room, auth.user.id).await?)))
}

/// `GET /api/chat/rooms/{key}`: key or numeric id.
pub async fn get_room(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<RoomSummary>, ApiError> {
    let (room, _) = room::get_room_for(&state, &key, auth.user.id).await?;
    Ok(Json(room::summarize(&state, &room, auth.user.id).await?))
}

/// `GET /api/chat/farmer_orders`
pub async fn farmer_orders(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let rooms = room::farmer_orders(&state, auth.user.id).await?;
    Ok(Json(summaries(&state, &rooms, auth.user.id).await?))
}

// =============================================================================
// MESSAGES
// =============================================================================

/// `GET /api/chat/rooms/{key}/messages`: history; clears the viewer's unread flag.
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let (room, _) = room::get_room_for(&state, &key, auth.user.id).await?;
    let history = message::history_for(&state, &room, auth.user.id).await?;
    Ok(Json(message::views_for_room(&state, &room, &history).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub message: String,
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// `POST /api/chat/rooms/{key}/messages`: same path as a live message.
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<MessageView>), ApiError> {
    let (room, _) = room::get_room_for(&state, &key, auth.user.id).await?;
    let draft = ChatDraft {
        text: body.message,
        image: body.image.filter(|s| !s.is_empty()),
        images: body.images.into_iter().filter(|s| !s.is_empty()).collect(),
    };
    let sent = message::send(&state, &room, &auth.user, draft).await?;
    Ok((StatusCode::CREATED, Json(message::view(&state.media, &sent, &auth.user.full_name))))
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub status: &'static str,
    pub messages_updated: u64,
}

/// `POST /api/chat/rooms/{key}/mark_read`
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let (room, _) = room::get_room_for(&state, &key, auth.user.id).await?;
    let messages_updated = unread::mark_read(&state, &room, auth.user.id).await?;
    Ok(Json(MarkReadResponse { status: "success", messages_updated }))
}

/// `GET /api/chat/messages/{id}`
pub async fn get_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(message_id): Path<i64>,
) -> Result<Json<MessageView>, ApiError> {
    let found = message::get_message_for(&state, message_id, auth.user.id).await?;
    let sender_name = display_name(&state, found.sender_id).await?;
    Ok(Json(message::view(&state.media, &found, &sender_name)))
}

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

/// `POST /api/chat/rooms/{key}/update_order_status`: farmer-only, unlinked rooms.
pub async fn update_order_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<Json<RoomSummary>, ApiError> {
    let (room, _) = room::get_room_for(&state, &key, auth.user.id).await?;
    let status = order::parse_status(&body.status)?;
    let updated = order::update_status(&state, &room, &auth.user, status).await?;
    Ok(Json(room::summarize(&state, &updated, auth.user.id).await?))
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
