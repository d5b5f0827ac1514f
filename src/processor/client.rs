//! Stripe API client
//!
//! Transport only: one attempt per call, errors mapped into the
//! [`ProcessorError`] union. Retry scheduling belongs to the settlement
//! layer's retry executor, not the client.

use crate::config::StripeConfig;
use crate::processor::error::{ProcessorError, ProcessorResult};
use crate::processor::types::{ApiErrorEnvelope, PaymentIntent};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Read access to the processor's view of a payment
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetch the current state of a payment intent
    async fn retrieve_intent(&self, intent_id: &str) -> ProcessorResult<PaymentIntent>;
}

pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> ProcessorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| ProcessorError::Connection {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn map_error_response(status: StatusCode, body: &str, retry_after: Option<u64>) -> ProcessorError {
        let parsed: Option<ApiErrorEnvelope> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|e| e.error.message.clone())
            .unwrap_or_else(|| format!("HTTP {}", status));

        match status {
            StatusCode::TOO_MANY_REQUESTS => ProcessorError::RateLimit { retry_after },
            StatusCode::UNAUTHORIZED => ProcessorError::Authentication { message },
            StatusCode::FORBIDDEN => ProcessorError::Permission { message },
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                ProcessorError::InvalidRequest { message }
            }
            _ => ProcessorError::Api {
                error_type: parsed
                    .as_ref()
                    .and_then(|e| e.error.error_type.clone())
                    .unwrap_or_else(|| "api_error".to_string()),
                code: parsed.and_then(|e| e.error.code),
                message,
                http_status: status.as_u16(),
            },
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn retrieve_intent(&self, intent_id: &str) -> ProcessorResult<PaymentIntent> {
        let url = format!("{}/v1/payment_intents/{}", self.base_url, intent_id);
        debug!(intent_id = %intent_id, "retrieving payment intent");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    format!("request timed out: {}", e)
                } else {
                    format!("request failed: {}", e)
                };
                ProcessorError::Connection { message }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Connection {
                message: format!("failed to read response body: {}", e),
            })?;

        if status.is_success() {
            return serde_json::from_str::<PaymentIntent>(&body).map_err(|e| {
                ProcessorError::Connection {
                    message: format!("invalid intent JSON: {}", e),
                }
            });
        }

        warn!(
            intent_id = %intent_id,
            status = %status,
            "processor returned error response"
        );
        Err(Self::map_error_response(status, &body, retry_after))
    }
}
