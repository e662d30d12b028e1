//! WebSocket handler for one chat room.
//!
//! DESIGN
//! ======
//! The upgrade always succeeds; admission runs on the open socket so a
//! refusal can carry its close code (4001 / 4002 / 4003). An admitted
//! connection subscribes to the room's hub channel and enters a `select!`
//! loop:
//! - Incoming client frames → decode → typing / status / chat
//! - Hub events → forward to client
//!
//! Decode and domain errors are logged and the connection stays open. A
//! store failure closes with 4000. When the hub drops the subscription
//! (overflow or shutdown) the socket closes with 1001.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → admit (gatekeeper) or close with the refusal code
//! 2. Subscribe → mark the other side's messages read
//! 3. Relay until either side goes away
//! 4. Unsubscribe

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::event::{self, Inbound, Outbound};
use crate::hub::Subscription;
use crate::services::gatekeeper::{self, CLOSE_INTERNAL};
use crate::services::{message, order, unread};
use crate::state::AppState;
use crate::store::{Room, User};

const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// What the relay loop should do after one inbound frame.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close(u16),
}

/// Per-connection identity handed to frame handling.
struct Connection {
    user: User,
    room_key: String,
    room_id: i64,
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /ws/chat/{room_key}?token=...`
pub async fn handle_ws(
    State(state): State<AppState>,
    Path(room_key): Path<String>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state, room_key, params.token))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, room_key: String, token: Option<String>) {
    let admission = match gatekeeper::admit(&state, &room_key, token.as_deref()).await {
        Ok(admission) => admission,
        Err(e) => {
            warn!(%room_key, code = e.close_code(), error = %e, "ws: connection refused");
            close(&mut socket, e.close_code(), e.error_code()).await;
            return;
        }
    };

    let Subscription { conn_id, mut rx } = state.hub.subscribe(&room_key, admission.user.id);
    info!(%room_key, %conn_id, user_id = admission.user.id, side = ?admission.side, "ws: client connected");

    if let Err(e) = unread::mark_read(&state, &admission.room, admission.user.id).await {
        warn!(%room_key, error = %e, "ws: mark read on connect failed");
    }

    let conn = Connection { user: admission.user, room_key: room_key.clone(), room_id: admission.room.id };
    let close_code = loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break None };
                match msg {
                    Message::Text(text) => {
                        if let Flow::Close(code) = process_inbound_text(&state, &conn, text.as_str()).await {
                            break Some(code);
                        }
                    }
                    Message::Close(_) => break None,
                    _ => {}
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { break Some(CLOSE_GOING_AWAY) };
                if send_event(&mut socket, &event).await.is_err() {
                    break None;
                }
            }
        }
    };

    state.hub.unsubscribe(&room_key, conn_id);
    if let Some(code) = close_code {
        let reason = if code == CLOSE_INTERNAL { "internal error" } else { "going away" };
        close(&mut socket, code, reason).await;
    }
    info!(%room_key, %conn_id, ?close_code, "ws: client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &Outbound) -> Result<(), axum::Error> {
    let Ok(json) = serde_json::to_string(event) else {
        warn!(kind = event.kind(), "ws: event serialization failed");
        return Ok(());
    };
    socket.send(Message::Text(json.into())).await
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame { code, reason: reason.to_owned().into() };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and act on one inbound text frame.
///
/// Kept apart from the socket so tests can drive frame handling directly.
async fn process_inbound_text(state: &AppState, conn: &Connection, text: &str) -> Flow {
    let inbound = match event::decode(text) {
        Ok(Some(inbound)) => inbound,
        Ok(None) => {
            debug!(room_key = %conn.room_key, "ws: ignoring empty frame");
            return Flow::Continue;
        }
        Err(e) => {
            warn!(room_key = %conn.room_key, code = e.error_code(), error = %e, "ws: invalid inbound frame");
            return Flow::Continue;
        }
    };

    match inbound {
        Inbound::Typing(is_typing) => {
            let typing = Outbound::TypingStatus { user_id: conn.user.id, is_typing };
            state.hub.publish(&conn.room_key, &typing);
            Flow::Continue
        }
        Inbound::StatusChange(status) => {
            let room = match current_room(state, conn).await {
                Ok(room) => room,
                Err(flow) => return flow,
            };
            outcome(conn, "status change", order::update_status(state, &room, &conn.user, status).await)
        }
        Inbound::Chat(draft) => {
            let room = match current_room(state, conn).await {
                Ok(room) => room,
                Err(flow) => return flow,
            };
            outcome(conn, "message", message::send(state, &room, &conn.user, draft).await)
        }
    }
}

/// Fresh room row; status and order linkage may have moved since admission.
async fn current_room(state: &AppState, conn: &Connection) -> Result<Room, Flow> {
    match state.store.room_by_id(conn.room_id).await {
        Ok(Some(room)) => Ok(room),
        Ok(None) => {
            warn!(room_key = %conn.room_key, "ws: room vanished");
            Err(Flow::Close(CLOSE_INTERNAL))
        }
        Err(e) => {
            warn!(room_key = %conn.room_key, error = %e, "ws: room reload failed");
            Err(Flow::Close(CLOSE_INTERNAL))
        }
    }
}

/// Domain refusals are logged; server-side failures end the connection.
fn outcome<T, E: ErrorCode>(conn: &Connection, what: &str, result: Result<T, E>) -> Flow {
    match result {
        Ok(_) => Flow::Continue,
        Err(e) if e.status().is_server_error() => {
            warn!(room_key = %conn.room_key, user_id = conn.user.id, code = e.error_code(), error = %e, "ws: {what} failed");
            Flow::Close(CLOSE_INTERNAL)
        }
        Err(e) => {
            info!(room_key = %conn.room_key, user_id = conn.user.id, code = e.error_code(), error = %e, "ws: {what} rejected");
            Flow::Continue
        }
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
