//! Chat image intake and URL resolution.
//!
//! Clients send images inline as `data:<mime>;base64,<payload>`. Each one is
//! decoded, written under `<media_root>/chat_images/<uuid>.<ext>` and
//! referenced by that relative path. URLs handed to clients are absolute.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use uuid::Uuid;

use crate::config::AppConfig;

pub const CHAT_IMAGE_DIR: &str = "chat_images";

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("not a base64 data URL")]
    NotDataUrl,
    #[error("unsupported media type: {0}")]
    UnsupportedType(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image exceeds {max} bytes")]
    TooLarge { max: usize },
    #[error("media write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl crate::error::ErrorCode for MediaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotDataUrl => "E_IMAGE_NOT_DATA_URL",
            Self::UnsupportedType(_) => "E_IMAGE_TYPE",
            Self::Base64(_) => "E_IMAGE_ENCODING",
            Self::TooLarge { .. } => "E_IMAGE_TOO_LARGE",
            Self::Io(_) => "E_MEDIA_IO",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        match self {
            Self::Io(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::TooLarge { .. } => axum::http::StatusCode::PAYLOAD_TOO_LARGE,
            _ => axum::http::StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Parse and decode a `data:image/*;base64,...` URL.
///
/// # Errors
///
/// Rejects non-data URLs, non-image types, bad base64, and payloads over `max_bytes`.
pub fn decode_data_url(raw: &str, max_bytes: usize) -> Result<DecodedImage, MediaError> {
    let (header, payload) = raw.split_once(',').ok_or(MediaError::NotDataUrl)?;
    let mime = header
        .strip_prefix("data:")
        .and_then(|h| h.strip_suffix(";base64"))
        .ok_or(MediaError::NotDataUrl)?;

    let subtype = mime
        .strip_prefix("image/")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MediaError::UnsupportedType(mime.to_owned()))?;

    // Cheap bound before allocating.
    if payload.len() / 4 * 3 > max_bytes + 3 {
        return Err(MediaError::TooLarge { max: max_bytes });
    }
    let bytes = STANDARD.decode(payload.trim())?;
    if bytes.len() > max_bytes {
        return Err(MediaError::TooLarge { max: max_bytes });
    }

    Ok(DecodedImage { extension: extension_for(subtype), bytes })
}

fn extension_for(subtype: &str) -> String {
    match subtype.to_ascii_lowercase().as_str() {
        "jpeg" | "pjpeg" => "jpg".to_owned(),
        "svg+xml" => "svg".to_owned(),
        other => {
            let clean: String = other.chars().filter(char::is_ascii_alphanumeric).collect();
            if clean.is_empty() { "bin".to_owned() } else { clean }
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
    public_base_url: String,
    max_bytes: usize,
}

impl MediaStore {
    #[must_use]
    pub fn new(root: PathBuf, url_prefix: String, public_base_url: String, max_bytes: usize) -> Self {
        Self { root, url_prefix, public_base_url, max_bytes }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.media_root.clone(),
            config.media_url_prefix.clone(),
            config.public_base_url.clone(),
            config.max_image_bytes,
        )
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Decode and persist one data URL, returning its relative media path.
    ///
    /// # Errors
    ///
    /// See [`decode_data_url`]; also fails if the file cannot be written.
    pub async fn save_data_url(&self, raw: &str) -> Result<String, MediaError> {
        let image = decode_data_url(raw, self.max_bytes)?;
        let dir = self.root.join(CHAT_IMAGE_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.{}", Uuid::new_v4(), image.extension);
        tokio::fs::write(dir.join(&file_name), &image.bytes).await?;
        Ok(format!("{CHAT_IMAGE_DIR}/{file_name}"))
    }

    /// Absolute URL for a stored path. Already-absolute URLs pass through.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            return format!("{}{path}", self.public_base_url);
        }
        format!("{}{}/{path}", self.public_base_url, self.url_prefix)
    }
}

#[cfg(test)]
#[path = "media_test.rs"]
mod tests;
