//! Bearer session tokens.
//!
//! Tokens are 32 random bytes rendered as 64 lowercase hex characters. HTTP
//! callers present them as `Authorization: Bearer` or a `session_token`
//! cookie; live connections carry them in `?token=`.

use std::fmt::Write;

use rand::Rng;

use crate::state::AppState;
use crate::store::StoreError;

pub const TOKEN_LEN: usize = 64;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Shape check run before any lookup, so garbage never reaches the store.
#[must_use]
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Create a session for `user_id` and return its token.
///
/// # Errors
///
/// Returns a store error if the insert fails.
pub async fn issue(state: &AppState, user_id: i64) -> Result<String, StoreError> {
    let token = generate_token();
    state
        .store
        .create_session(user_id, &token, state.config.session_ttl_hours)
        .await?;
    Ok(token)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
