//! Payment capture for completed orders.
//!
//! Only capture is needed here; intent creation and webhooks live with the
//! storefront. The gateway is a trait so order tests can inject a mock.

use std::time::Duration;

use serde::Deserialize;

use crate::config::StripeConfig;
use crate::error::ErrorCode;

const REQUEST_TIMEOUT_SECS: u64 = 20;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment provider not configured")]
    NotConfigured,
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
    #[error("payment request failed: {0}")]
    Request(String),
    #[error("payment provider rejected capture (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ErrorCode for PaymentError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "E_PAYMENT_NOT_CONFIGURED",
            Self::HttpClientBuild(_) => "E_PAYMENT_CLIENT",
            Self::Request(_) => "E_PAYMENT_REQUEST",
            Self::Rejected { .. } => "E_PAYMENT_REJECTED",
        }
    }

    fn status(&self) -> axum::http::StatusCode {
        match self {
            Self::NotConfigured => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Self::HttpClientBuild(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::Request(_) | Self::Rejected { .. } => axum::http::StatusCode::BAD_GATEWAY,
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Capture a previously authorized payment intent.
    async fn capture(&self, payment_intent_id: &str) -> Result<(), PaymentError>;
}

// =============================================================================
// STRIPE
// =============================================================================

pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| PaymentError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, secret_key: config.secret_key.clone(), api_base: config.api_base.clone() })
    }

    fn capture_url(&self, payment_intent_id: &str) -> String {
        format!("{}/v1/payment_intents/{payment_intent_id}/capture", self.api_base)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    async fn capture(&self, payment_intent_id: &str) -> Result<(), PaymentError> {
        let response = self
            .http
            .post(self.capture_url(payment_intent_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            tracing::info!(%payment_intent_id, "payment captured");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Request(e.to_string()))?;
        Err(PaymentError::Rejected { status, message: error_message(&body) })
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Pull `error.message` out of a provider error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
#[path = "payment_test.rs"]
mod tests;
