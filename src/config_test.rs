use std::collections::HashMap;

use super::*;

fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    AppConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn missing_database_url_is_an_error() {
    assert_eq!(config_from(&[]), Err(ConfigError::Missing("DATABASE_URL")));
    assert_eq!(config_from(&[("DATABASE_URL", "  ")]), Err(ConfigError::Missing("DATABASE_URL")));
}

#[test]
fn defaults_apply_when_only_database_url_is_set() {
    let cfg = config_from(&[("DATABASE_URL", "postgres://localhost/agrochat")]).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
    assert_eq!(cfg.public_base_url, DEFAULT_PUBLIC_BASE_URL);
    assert_eq!(cfg.media_root, PathBuf::from(DEFAULT_MEDIA_ROOT));
    assert_eq!(cfg.media_url_prefix, DEFAULT_MEDIA_URL_PREFIX);
    assert_eq!(cfg.max_image_bytes, DEFAULT_MAX_IMAGE_BYTES);
    assert_eq!(cfg.ws_client_buffer, DEFAULT_WS_CLIENT_BUFFER);
    assert_eq!(cfg.session_ttl_hours, DEFAULT_SESSION_TTL_HOURS);
    assert!(!cfg.dev_auth_bypass);
    assert!(cfg.stripe.is_none());
}

#[test]
fn overrides_are_parsed_and_trimmed() {
    let cfg = config_from(&[
        ("DATABASE_URL", "postgres://db/agrochat"),
        ("PORT", "9100"),
        ("PUBLIC_BASE_URL", "https://market.example/"),
        ("MEDIA_URL_PREFIX", "uploads/"),
        ("WS_CLIENT_BUFFER", "16"),
        ("DEV_AUTH_BYPASS", "Yes"),
        ("STRIPE_SECRET_KEY", "sk_test_123"),
        ("STRIPE_API_BASE", "http://127.0.0.1:12111/"),
    ])
    .unwrap();

    assert_eq!(cfg.port, 9100);
    assert_eq!(cfg.public_base_url, "https://market.example");
    assert_eq!(cfg.media_url_prefix, "/uploads");
    assert_eq!(cfg.ws_client_buffer, 16);
    assert!(cfg.dev_auth_bypass);
    assert_eq!(
        cfg.stripe,
        Some(StripeConfig { secret_key: "sk_test_123".into(), api_base: "http://127.0.0.1:12111".into() })
    );
}

#[test]
fn invalid_numbers_fall_back_to_defaults() {
    let cfg = config_from(&[("DATABASE_URL", "postgres://db"), ("PORT", "eighty"), ("MAX_IMAGE_BYTES", "-1")]).unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.max_image_bytes, DEFAULT_MAX_IMAGE_BYTES);
}

#[test]
fn zero_client_buffer_is_clamped() {
    let cfg = config_from(&[("DATABASE_URL", "postgres://db"), ("WS_CLIENT_BUFFER", "0")]).unwrap();
    assert_eq!(cfg.ws_client_buffer, 1);
}

#[test]
fn parse_bool_variants() {
    for raw in ["1", "true", "YES", " on "] {
        assert_eq!(parse_bool(raw), Some(true), "{raw:?}");
    }
    for raw in ["0", "False", "no", "off"] {
        assert_eq!(parse_bool(raw), Some(false), "{raw:?}");
    }
    assert_eq!(parse_bool("maybe"), None);
    assert_eq!(parse_bool(""), None);
}

#[test]
fn empty_media_prefix_uses_default() {
    assert_eq!(normalize_prefix("/"), DEFAULT_MEDIA_URL_PREFIX);
    assert_eq!(normalize_prefix("/static/media/"), "/static/media");
}

#[test]
fn session_ttl_is_clamped_to_a_year() {
    let huge = config_from(&[("DATABASE_URL", "postgres://db"), ("SESSION_TTL_HOURS", "9223372036854775807")]).unwrap();
    assert_eq!(huge.session_ttl_hours, MAX_SESSION_TTL_HOURS);
    // Would panic for an unclamped value.
    let _ = time::Duration::hours(huge.session_ttl_hours);

    let negative = config_from(&[("DATABASE_URL", "postgres://db"), ("SESSION_TTL_HOURS", "-3")]).unwrap();
    assert_eq!(negative.session_ttl_hours, 1);
}
