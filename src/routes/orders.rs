//! Order REST routes: placement and the strict lifecycle actions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::auth::AuthUser;
use crate::services::order::{self, OrderView, PlaceOrder};
use crate::services::room::{self, FarmerDashboard};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PlaceOrderBody {
    pub farmer: i64,
    pub product: i64,
    #[serde(default = "one")]
    pub quantity: i32,
    pub amount_cents: i64,
    pub payment_intent_id: String,
}

fn one() -> i32 {
    1
}

/// `POST /api/orders`: caller is the customer.
pub async fn place_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<PlaceOrderBody>,
) -> Result<(StatusCode, Json<OrderView>), ApiError> {
    let req = PlaceOrder {
        farmer_id: body.farmer,
        product_id: body.product,
        quantity: body.quantity,
        amount_cents: body.amount_cents,
        payment_intent_id: body.payment_intent_id,
    };
    let (placed, _) = order::place_order(&state, &auth.user, req).await?;
    Ok((StatusCode::CREATED, Json(order::view(&state, &placed).await?)))
}

/// `GET /api/orders/farmer_dashboard`: counts and recent rooms where the caller is the farmer.
pub async fn farmer_dashboard(State(state): State<AppState>, auth: AuthUser) -> Result<Json<FarmerDashboard>, ApiError> {
    Ok(Json(room::farmer_dashboard(&state, auth.user.id).await?))
}

/// `GET /api/orders/{id}`
pub async fn get_order(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderView>, ApiError> {
    let found = order::get_order_for(&state, order_id, auth.user.id).await?;
    Ok(Json(order::view(&state, &found).await?))
}

/// `POST /api/orders/{id}/ship`
pub async fn ship(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderView>, ApiError> {
    let updated = order::ship(&state, order_id, &auth.user).await?;
    Ok(Json(order::view(&state, &updated).await?))
}

/// `POST /api/orders/{id}/confirm_receipt`
pub async fn confirm_receipt(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderView>, ApiError> {
    let updated = order::confirm_receipt(&state, order_id, &auth.user).await?;
    Ok(Json(order::view(&state, &updated).await?))
}

/// `POST /api/orders/{id}/confirm_payment`
pub async fn confirm_payment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderView>, ApiError> {
    let updated = order::confirm_payment(&state, order_id, &auth.user).await?;
    Ok(Json(order::view(&state, &updated).await?))
}

#[cfg(test)]
#[path = "orders_test.rs"]
mod tests;
