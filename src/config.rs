//! Process configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! `AppConfig` is built once in `main` and shared through `AppState`.
//! Parsing goes through a lookup closure so tests can feed a map instead of
//! mutating the process environment.

use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_MEDIA_ROOT: &str = "media";
pub const DEFAULT_MEDIA_URL_PREFIX: &str = "/media";
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_WS_CLIENT_BUFFER: usize = 256;
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 168;
/// Upper bound for `SESSION_TTL_HOURS`: one year.
pub const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Payment provider settings. Present only when a secret key is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    /// Prefix used to turn stored media paths into absolute URLs.
    pub public_base_url: String,
    pub media_root: PathBuf,
    pub media_url_prefix: String,
    pub max_image_bytes: usize,
    /// Outbound frames buffered per live connection before it is dropped.
    pub ws_client_buffer: usize,
    pub session_ttl_hours: i64,
    pub dev_auth_bypass: bool,
    pub stripe: Option<StripeConfig>,
}

impl AppConfig {
    /// Build config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        let media_url_prefix = normalize_prefix(
            &lookup("MEDIA_URL_PREFIX").unwrap_or_else(|| DEFAULT_MEDIA_URL_PREFIX.to_owned()),
        );

        let stripe = lookup("STRIPE_SECRET_KEY")
            .filter(|v| !v.trim().is_empty())
            .map(|secret_key| StripeConfig {
                secret_key,
                api_base: lookup("STRIPE_API_BASE")
                    .unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.to_owned())
                    .trim_end_matches('/')
                    .to_owned(),
            });

        Ok(Self {
            database_url,
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            public_base_url,
            media_root: lookup("MEDIA_ROOT").map_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT), PathBuf::from),
            media_url_prefix,
            max_image_bytes: parse_or(&lookup, "MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES),
            ws_client_buffer: parse_or(&lookup, "WS_CLIENT_BUFFER", DEFAULT_WS_CLIENT_BUFFER).max(1),
            session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS)
                .clamp(1, MAX_SESSION_TTL_HOURS),
            dev_auth_bypass: lookup("DEV_AUTH_BYPASS")
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(false),
            stripe,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `media/` → `/media`, `/media/` → `/media`.
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_MEDIA_URL_PREFIX.to_owned();
    }
    format!("/{trimmed}")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
