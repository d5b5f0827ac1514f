//! Payment processor error taxonomy
//!
//! A closed union of everything the Stripe client can report. Callers match
//! on the variant instead of inspecting strings; the classifier maps each
//! variant to a retry decision and an operator-facing message.

use thiserror::Error;

/// Error from the payment processor or the transport underneath it
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// Transport failure before a usable response arrived (DNS, TCP, TLS,
    /// timeout, malformed body)
    #[error("processor connection error: {message}")]
    Connection { message: String },

    /// The processor returned a structured API error
    #[error("processor API error ({error_type}): {message}")]
    Api {
        /// Processor error type, e.g. `card_error` or `api_error`
        error_type: String,
        /// Processor error code, e.g. `resource_missing`
        code: Option<String>,
        message: String,
        http_status: u16,
    },

    /// HTTP 429 from the processor
    #[error("processor rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    /// The request we built was rejected as malformed (HTTP 400/404)
    #[error("invalid processor request: {message}")]
    InvalidRequest { message: String },

    /// API key rejected (HTTP 401)
    #[error("processor authentication failed: {message}")]
    Authentication { message: String },

    /// API key valid but not allowed to perform the call (HTTP 403)
    #[error("processor permission denied: {message}")]
    Permission { message: String },
}

impl ProcessorError {
    /// Whether retrying the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessorError::Connection { .. } | ProcessorError::RateLimit { .. } => true,
            ProcessorError::Api { http_status, .. } => *http_status >= 500,
            ProcessorError::InvalidRequest { .. }
            | ProcessorError::Authentication { .. }
            | ProcessorError::Permission { .. } => false,
        }
    }

    /// Short stable tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorError::Connection { .. } => "connection",
            ProcessorError::Api { .. } => "api",
            ProcessorError::RateLimit { .. } => "rate_limit",
            ProcessorError::InvalidRequest { .. } => "invalid_request",
            ProcessorError::Authentication { .. } => "authentication",
            ProcessorError::Permission { .. } => "permission",
        }
    }
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;
