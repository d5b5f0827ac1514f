//! Comprehensive error handling for the settlement service
//!
//! This module provides a unified error system with proper HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "PAYMENT_ALREADY_FAILED")]
    PaymentAlreadyFailed,
    #[serde(rename = "PAYMENT_ALREADY_SETTLED")]
    PaymentAlreadySettled,
    #[serde(rename = "SETTLEMENT_IN_PROGRESS")]
    SettlementInProgress,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_NOT_LINKED")]
    OrderNotLinked,
    #[serde(rename = "AMOUNT_MISMATCH")]
    AmountMismatch,
    #[serde(rename = "INVALID_ORDER_STATE")]
    InvalidOrderState,
    #[serde(rename = "RETRY_NOT_ALLOWED")]
    RetryNotAllowed,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROCESSOR_ERROR")]
    PaymentProcessorError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No pending payment exists for the given intent id
    PaymentNotFound { intent_id: String },
    /// The ledger row is terminally failed
    PaymentAlreadyFailed { intent_id: String },
    /// Settlement is terminal; settled rows cannot be canceled
    PaymentAlreadySettled { intent_id: String },
    /// Another caller holds the settlement claim for this intent
    SettlementInProgress { intent_id: String },
    /// Order referenced by the ledger row does not exist
    OrderNotFound { order_code: String },
    /// Processor metadata is missing or names a different order
    OrderNotLinked {
        intent_id: String,
        expected_order_code: String,
    },
    /// Processor amount disagrees with the ledger beyond tolerance
    AmountMismatch { processor_amount: i64, ledger_amount: i64 },
    /// Order lifecycle state does not allow the requested transition
    InvalidOrderState { current: String, target: String },
    /// Retry requested for a payment that is not in a retryable failure
    RetryNotAllowed { intent_id: String, reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors (payment processor, order ledger service)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Payment processor (Stripe) error
    PaymentProcessor {
        message: String,
        is_retryable: bool,
    },
    /// Order/payment ledger service reported a domain failure
    OrderService { message: String },
    /// Rate limit exceeded
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Required field missing
    MissingField { field: String },
    /// Field value is malformed or out of range
    InvalidValue { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::PaymentAlreadyFailed { .. } => 409, // Conflict
                DomainError::PaymentAlreadySettled { .. } => 409,
                DomainError::SettlementInProgress { .. } => 409,
                DomainError::OrderNotFound { .. } => 404,
                DomainError::OrderNotLinked { .. } => 422, // Unprocessable Entity
                DomainError::AmountMismatch { .. } => 422,
                DomainError::InvalidOrderState { .. } => 422,
                DomainError::RetryNotAllowed { .. } => 409,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => 500,
                InfrastructureError::Configuration { .. } => 500,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { .. } => 502, // Bad Gateway
                ExternalError::OrderService { .. } => 502,
                ExternalError::RateLimit { .. } => 429, // Too Many Requests
                ExternalError::Timeout { .. } => 504,   // Gateway Timeout
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::PaymentAlreadyFailed { .. } => ErrorCode::PaymentAlreadyFailed,
                DomainError::PaymentAlreadySettled { .. } => ErrorCode::PaymentAlreadySettled,
                DomainError::SettlementInProgress { .. } => ErrorCode::SettlementInProgress,
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::OrderNotLinked { .. } => ErrorCode::OrderNotLinked,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::InvalidOrderState { .. } => ErrorCode::InvalidOrderState,
                DomainError::RetryNotAllowed { .. } => ErrorCode::RetryNotAllowed,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { .. } => ErrorCode::PaymentProcessorError,
                ExternalError::OrderService { .. } => ErrorCode::PaymentProcessorError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => "Payment not found".to_string(),
                DomainError::PaymentAlreadyFailed { .. } => {
                    "Payment has failed and cannot be settled".to_string()
                }
                DomainError::PaymentAlreadySettled { .. } => {
                    "Payment has already been settled and cannot be canceled".to_string()
                }
                DomainError::SettlementInProgress { .. } => {
                    "Payment settlement is already in progress. Please try again shortly"
                        .to_string()
                }
                DomainError::OrderNotFound { .. } => "Order not found".to_string(),
                DomainError::OrderNotLinked { .. } => {
                    "Payment is not properly linked to an order".to_string()
                }
                DomainError::AmountMismatch {
                    processor_amount,
                    ledger_amount,
                } => {
                    format!(
                        "Payment amount ({}) does not match order total ({})",
                        processor_amount, ledger_amount
                    )
                }
                DomainError::InvalidOrderState { current, target } => {
                    format!("Order cannot move from '{}' to '{}'", current, target)
                }
                DomainError::RetryNotAllowed { reason, .. } => {
                    format!("Payment cannot be retried: {}", reason)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment processor is temporarily unavailable. Please try again"
                            .to_string()
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::OrderService { .. } => {
                    "Payment settlement failed. Please contact support.".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => {
                    if let Some(secs) = retry_after {
                        format!(
                            "Rate limit exceeded for {}. Please try again in {} seconds",
                            service, secs
                        )
                    } else {
                        format!("Rate limit exceeded for {}. Please try again later", service)
                    }
                }
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => {
                    format!(
                        "{} request timed out after {} seconds. Please try again",
                        service, timeout_secs
                    )
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidValue { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(err) => {
                matches!(err, DomainError::SettlementInProgress { .. })
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProcessor { is_retryable, .. } => *is_retryable,
                ExternalError::OrderService { .. } => false,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// Conversions from specific error types
// Note: From<DatabaseError> is implemented in database/error.rs to avoid circular dependency

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
