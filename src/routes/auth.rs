//! Auth routes: bearer/cookie extraction, current user, dev sessions.

use axum::extract::{FromRef, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::info;

use crate::error::ApiError;
use crate::services::{gatekeeper, session};
use crate::state::AppState;
use crate::store::User;

pub const COOKIE_NAME: &str = "session_token";

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated caller. Use as a handler parameter to require a session.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = request_token(&parts.headers).ok_or_else(ApiError::unauthorized)?;
        let app_state = AppState::from_ref(state);
        let user = gatekeeper::authenticate(&app_state, Some(&token)).await?;
        Ok(Self { user, token })
    }
}

/// `Authorization: Bearer` wins over the cookie.
pub(crate) fn request_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_owned());
    }
    CookieJar::from_headers(headers)
        .get(COOKIE_NAME)
        .map(Cookie::value)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Serialize)]
pub struct MeResponse {
    pub id: i64,
    pub full_name: String,
}

/// `GET /api/auth/me`
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse { id: auth.user.id, full_name: auth.user.full_name })
}

#[derive(Deserialize)]
pub struct DevSessionBody {
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct DevSessionResponse {
    pub token: String,
    pub user_id: i64,
    pub full_name: String,
}

/// `POST /api/dev/session`: issue a session for any user. Local development
/// only; answers 404 unless `DEV_AUTH_BYPASS` is on.
pub async fn dev_session(
    State(state): State<AppState>,
    Json(body): Json<DevSessionBody>,
) -> Result<Response, ApiError> {
    if !state.config.dev_auth_bypass {
        return Err(ApiError::not_found("not found"));
    }
    let user = state
        .store
        .user(body.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("user {} not found", body.user_id)))?;
    let token = session::issue(&state, user.id).await?;
    info!(user_id = user.id, "dev session issued");

    let cookie = Cookie::build((COOKIE_NAME, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::hours(state.config.session_ttl_hours));
    let jar = CookieJar::new().add(cookie);
    let body = DevSessionResponse { token, user_id: user.id, full_name: user.full_name };
    Ok((jar, Json(body)).into_response())
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
