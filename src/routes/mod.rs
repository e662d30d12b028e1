//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the REST API, the per-room websocket endpoint and the
//! media directory under a single Axum router. Uploaded chat images are
//! served as static files at the configured media prefix.

pub mod auth;
pub mod orders;
pub mod rooms;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let media = ServeDir::new(state.media.root());
    let media_prefix = state.media.url_prefix().to_owned();

    Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/dev/session", post(auth::dev_session))
        .route("/api/chat/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/chat/rooms/{key}", get(rooms::get_room))
        .route(
            "/api/chat/rooms/{key}/messages",
            get(rooms::list_messages).post(rooms::send_message),
        )
        .route("/api/chat/rooms/{key}/mark_read", post(rooms::mark_read))
        .route("/api/chat/rooms/{key}/update_order_status", post(rooms::update_order_status))
        .route("/api/chat/farmer_orders", get(rooms::farmer_orders))
        .route("/api/chat/messages/{id}", get(rooms::get_message))
        .route("/api/orders", post(orders::place_order))
        .route("/api/orders/farmer_dashboard", get(orders::farmer_dashboard))
        .route("/api/orders/{id}", get(orders::get_order))
        .route("/api/orders/{id}/ship", post(orders::ship))
        .route("/api/orders/{id}/confirm_receipt", post(orders::confirm_receipt))
        .route("/api/orders/{id}/confirm_payment", post(orders::confirm_payment))
        .route("/ws/chat/{room_key}", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .nest_service(&media_prefix, media)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
