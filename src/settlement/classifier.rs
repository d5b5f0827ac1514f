//! Error classifier
//!
//! Single source of truth for retryability and for every piece of
//! user-facing error copy. Nothing else in the settlement core is allowed
//! to invent customer-visible messages.
//!
//! Classification is composed from three layers consulted in order: the
//! processor-specific classifier, settlement-domain heuristics, and a
//! generic system fallback.

use crate::processor::error::ProcessorError;
use crate::processor::types::IntentStatus;
use crate::settlement::store::FailureType;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Processor,
    Validation,
    System,
    User,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Typed classification of a raw failure
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub user_message: String,
    pub admin_message: String,
    pub is_retryable: bool,
    pub retry_delay: Option<Duration>,
    pub error_code: &'static str,
    pub category: ErrorCategory,
    pub severity: Severity,
}

impl ClassifiedError {
    fn new(
        error_code: &'static str,
        category: ErrorCategory,
        severity: Severity,
        is_retryable: bool,
        user_message: impl Into<String>,
        admin_message: impl Into<String>,
    ) -> Self {
        Self {
            user_message: user_message.into(),
            admin_message: admin_message.into(),
            is_retryable,
            retry_delay: None,
            error_code,
            category,
            severity,
        }
    }

    /// Ledger failure taxonomy this classification persists as
    pub fn failure_type(&self) -> FailureType {
        match self.category {
            ErrorCategory::Network | ErrorCategory::Processor => FailureType::StripeError,
            ErrorCategory::Validation => FailureType::ValidationError,
            ErrorCategory::System => FailureType::SystemError,
            ErrorCategory::User => FailureType::UserError,
        }
    }
}

/// Which part of the system the failure came out of; selects the
/// domain-heuristics layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationContext {
    Settlement,
    General,
}

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a typed processor error. Always conclusive: every variant of
    /// the closed union has a mapping.
    pub fn classify_processor(err: &ProcessorError) -> ClassifiedError {
        match err {
            ProcessorError::Connection { message } => ClassifiedError::new(
                "PROCESSOR_UNAVAILABLE",
                ErrorCategory::Network,
                Severity::Medium,
                true,
                "Payment service is temporarily unavailable. Please try again.",
                format!("processor connection error: {}", message),
            ),
            ProcessorError::RateLimit { retry_after } => {
                let mut classified = ClassifiedError::new(
                    "PROCESSOR_RATE_LIMITED",
                    ErrorCategory::Processor,
                    Severity::Medium,
                    true,
                    "Payment service is busy. Please try again shortly.",
                    "processor rate limit exceeded",
                );
                classified.retry_delay = retry_after.map(Duration::from_secs);
                classified
            }
            ProcessorError::Api {
                error_type,
                code,
                message,
                http_status,
            } => {
                let retryable = *http_status >= 500;
                ClassifiedError::new(
                    "PROCESSOR_API_ERROR",
                    ErrorCategory::Processor,
                    Severity::Medium,
                    retryable,
                    if retryable {
                        "Payment service reported a temporary problem. Please try again."
                    } else {
                        "Payment could not be processed."
                    },
                    format!(
                        "processor API error: type={} code={:?} status={} message={}",
                        error_type, code, http_status, message
                    ),
                )
            }
            ProcessorError::InvalidRequest { message } => Self::classify_invalid_request(message),
            ProcessorError::Authentication { message } => ClassifiedError::new(
                "PROCESSOR_AUTHENTICATION",
                ErrorCategory::System,
                Severity::Critical,
                false,
                "Payment settlement failed. Please contact support.",
                format!("processor authentication failed: {}", message),
            ),
            ProcessorError::Permission { message } => ClassifiedError::new(
                "PROCESSOR_PERMISSION",
                ErrorCategory::System,
                Severity::High,
                false,
                "Payment settlement failed. Please contact support.",
                format!("processor permission denied: {}", message),
            ),
        }
    }

    /// Sub-pattern dispatch for processor invalid-request messages
    fn classify_invalid_request(message: &str) -> ClassifiedError {
        let lower = message.to_lowercase();
        if lower.contains("no such") || lower.contains("not found") {
            ClassifiedError::new(
                "INTENT_NOT_FOUND",
                ErrorCategory::Validation,
                Severity::High,
                false,
                "Payment record could not be found with the payment service.",
                format!("intent lookup failed: {}", message),
            )
        } else if lower.contains("already succeeded") || lower.contains("already been captured") {
            ClassifiedError::new(
                "INTENT_ALREADY_SUCCEEDED",
                ErrorCategory::Validation,
                Severity::Medium,
                false,
                "This payment has already been completed.",
                format!("intent already succeeded: {}", message),
            )
        } else if lower.contains("canceled") || lower.contains("cancelled") {
            ClassifiedError::new(
                "PAYMENT_CANCELED",
                ErrorCategory::User,
                Severity::Low,
                false,
                "Payment was canceled and cannot be settled.",
                format!("intent canceled: {}", message),
            )
        } else if lower.contains("amount") {
            ClassifiedError::new(
                "AMOUNT_INVALID",
                ErrorCategory::Validation,
                Severity::High,
                false,
                "Payment amount could not be verified.",
                format!("amount problem reported by processor: {}", message),
            )
        } else {
            ClassifiedError::new(
                "PROCESSOR_INVALID_REQUEST",
                ErrorCategory::Validation,
                Severity::Medium,
                false,
                "Payment could not be processed.",
                format!("invalid processor request: {}", message),
            )
        }
    }

    /// Settlement-domain heuristics over untyped message text. Returns None
    /// when no domain pattern matches.
    fn classify_settlement_message(message: &str) -> Option<ClassifiedError> {
        let lower = message.to_lowercase();
        if lower.contains("order not found") {
            Some(ClassifiedError::new(
                "ORDER_NOT_FOUND",
                ErrorCategory::Validation,
                Severity::High,
                false,
                "Order not found",
                format!("order lookup failed during settlement: {}", message),
            ))
        } else if lower.contains("already settled") {
            Some(ClassifiedError::new(
                "ALREADY_SETTLED",
                ErrorCategory::Validation,
                Severity::Low,
                false,
                "This payment has already been settled.",
                format!("duplicate settlement attempt: {}", message),
            ))
        } else if lower.contains("payment failed") {
            Some(ClassifiedError::new(
                "PAYMENT_FAILED",
                ErrorCategory::User,
                Severity::Medium,
                false,
                "Payment has failed and cannot be settled",
                format!("settlement of a failed payment attempted: {}", message),
            ))
        } else if lower.contains("database") || lower.contains("transaction") {
            Some(ClassifiedError::new(
                "DATABASE_ERROR",
                ErrorCategory::System,
                Severity::High,
                true,
                "Payment settlement failed. Please try again.",
                format!("storage failure during settlement: {}", message),
            ))
        } else {
            None
        }
    }

    /// Classify an untyped failure message: domain heuristics first (when
    /// the context is settlement), generic system fallback otherwise.
    pub fn classify_message(message: &str, ctx: ClassificationContext) -> ClassifiedError {
        if ctx == ClassificationContext::Settlement {
            if let Some(classified) = Self::classify_settlement_message(message) {
                return classified;
            }
        }
        ClassifiedError::new(
            "SYSTEM_ERROR",
            ErrorCategory::System,
            Severity::Medium,
            true,
            "An unexpected error occurred. Please try again.",
            format!("unclassified failure: {}", message),
        )
    }

    // Validation failures raised by the orchestrator itself. Centralized here
    // so all customer copy lives in one module.

    pub fn payment_not_found() -> ClassifiedError {
        ClassifiedError::new(
            "PAYMENT_NOT_FOUND",
            ErrorCategory::Validation,
            Severity::Medium,
            false,
            "Payment not found",
            "no pending payment row for intent",
        )
    }

    pub fn payment_already_failed() -> ClassifiedError {
        ClassifiedError::new(
            "PAYMENT_ALREADY_FAILED",
            ErrorCategory::Validation,
            Severity::Low,
            false,
            "Payment has failed and cannot be settled",
            "settlement attempted on a failed payment",
        )
    }

    pub fn settlement_in_progress() -> ClassifiedError {
        ClassifiedError::new(
            "SETTLEMENT_IN_PROGRESS",
            ErrorCategory::System,
            Severity::Low,
            true,
            "Payment settlement is already in progress. Please try again.",
            "lost the claim race for the pending payment",
        )
    }

    /// An intent that is still in flight can reach `succeeded` on its own, so
    /// those statuses classify as retryable processor-side failures; the rest
    /// need new customer input and are final.
    pub fn intent_not_succeeded(status: IntentStatus) -> ClassifiedError {
        let in_flight = status.is_in_flight();
        let (code, user_message): (&'static str, String) = match status {
            IntentStatus::RequiresAction => (
                "INTENT_REQUIRES_ACTION",
                "Payment requires additional authentication and was not completed.".to_string(),
            ),
            IntentStatus::Processing | IntentStatus::RequiresCapture => (
                "INTENT_PROCESSING",
                "Payment is still being processed and cannot be settled yet.".to_string(),
            ),
            IntentStatus::RequiresPaymentMethod => (
                "INTENT_REQUIRES_PAYMENT_METHOD",
                "Payment was not completed. Please try again with a valid payment method."
                    .to_string(),
            ),
            IntentStatus::Canceled => (
                "PAYMENT_CANCELED",
                "Payment was canceled and cannot be settled.".to_string(),
            ),
            other => (
                "INTENT_NOT_COMPLETED",
                format!("Payment has not completed (status: {}) and cannot be settled.", other),
            ),
        };
        let category = match status {
            IntentStatus::Canceled => ErrorCategory::User,
            _ if in_flight => ErrorCategory::Processor,
            _ => ErrorCategory::Validation,
        };
        ClassifiedError::new(
            code,
            category,
            Severity::Medium,
            in_flight,
            user_message,
            format!("processor reports intent status '{}'", status),
        )
    }

    pub fn order_not_linked() -> ClassifiedError {
        ClassifiedError::new(
            "ORDER_NOT_LINKED",
            ErrorCategory::Validation,
            Severity::High,
            false,
            "Payment is not properly linked to an order",
            "intent metadata carries no order reference",
        )
    }

    pub fn order_mismatch(expected: &str, actual: &str) -> ClassifiedError {
        ClassifiedError::new(
            "ORDER_MISMATCH",
            ErrorCategory::Validation,
            Severity::High,
            false,
            "Payment does not belong to the expected order",
            format!(
                "intent metadata order reference '{}' does not match order code '{}'",
                actual, expected
            ),
        )
    }

    pub fn amount_mismatch(processor_amount: i64, ledger_amount: i64) -> ClassifiedError {
        ClassifiedError::new(
            "AMOUNT_MISMATCH",
            ErrorCategory::Validation,
            Severity::High,
            false,
            format!(
                "Payment amount ({}) does not match order total ({})",
                processor_amount, ledger_amount
            ),
            format!(
                "amount mismatch beyond tolerance: processor={} ledger={}",
                processor_amount, ledger_amount
            ),
        )
    }

    pub fn order_not_found(order_code: &str) -> ClassifiedError {
        ClassifiedError::new(
            "ORDER_NOT_FOUND",
            ErrorCategory::Validation,
            Severity::High,
            false,
            "Order not found",
            format!("order '{}' not found during settlement", order_code),
        )
    }

    pub fn order_rejected(detail: &str) -> ClassifiedError {
        ClassifiedError::new(
            "ORDER_REJECTED_PAYMENT",
            ErrorCategory::System,
            Severity::High,
            false,
            "Payment settlement failed. Please contact support.",
            format!("order service rejected the payment: {}", detail),
        )
    }

    pub fn verification_timeout() -> ClassifiedError {
        ClassifiedError::new(
            "VERIFICATION_TIMEOUT",
            ErrorCategory::Network,
            Severity::Medium,
            true,
            "Payment verification timed out. Please try again.",
            "verification phase exceeded its deadline",
        )
    }

    pub fn unexpected(detail: &str) -> ClassifiedError {
        ClassifiedError::new(
            "SYSTEM_ERROR",
            ErrorCategory::System,
            Severity::High,
            true,
            "Payment settlement failed. Please try again or contact support.",
            format!("unexpected settlement failure: {}", detail),
        )
    }
}
