//! Pending-payment ledger store seam
//!
//! The orchestrator and recovery manager talk to the durable ledger through
//! this trait; the Postgres implementation lives in
//! `database::pending_payment_repository`.

use crate::database::error::DatabaseError;
use crate::database::pending_payment_repository::PendingPayment;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending-payment lifecycle status
///
/// `Settling` is the transient claim state: the `pending -> settling`
/// conditional update serializes concurrent first-settlements. `Settled` is
/// terminal; only an explicit reset-for-retry moves `failed -> pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settling,
    Settled,
    Failed,
}

impl PaymentStatus {
    /// Convert from database status string
    pub fn from_db_status(status: &str) -> Option<Self> {
        match status.to_lowercase().as_str() {
            "pending" => Some(PaymentStatus::Pending),
            "settling" => Some(PaymentStatus::Settling),
            "settled" => Some(PaymentStatus::Settled),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    /// Convert to database status string
    pub fn to_db_status(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Settling => "settling",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Settled | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_db_status())
    }
}

/// Failure taxonomy persisted alongside a failed payment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    StripeError,
    ValidationError,
    SystemError,
    UserError,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::StripeError => "stripe_error",
            FailureType::ValidationError => "validation_error",
            FailureType::SystemError => "system_error",
            FailureType::UserError => "user_error",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "stripe_error" => Some(FailureType::StripeError),
            "validation_error" => Some(FailureType::ValidationError),
            "system_error" => Some(FailureType::SystemError),
            "user_error" => Some(FailureType::UserError),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure metadata written to the ledger when settlement fails
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub reason: String,
    pub failure_type: FailureType,
    pub is_retryable: bool,
}

/// Admin search filter over the ledger
#[derive(Debug, Clone, Default)]
pub struct PaymentSearchFilter {
    pub status: Option<PaymentStatus>,
    /// Substring match against the order code
    pub order_code: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub is_retryable: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

impl PaymentSearchFilter {
    pub fn with_pagination(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.clamp(1, 500);
        self.offset = offset.max(0);
        self
    }
}

/// One page of search results
#[derive(Debug, Clone)]
pub struct PaymentPage {
    pub items: Vec<PendingPayment>,
    pub total: i64,
}

/// Aggregate ledger statistics for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatistics {
    pub total: i64,
    pub pending: i64,
    pub settled: i64,
    pub failed: i64,
    pub retryable_failed: i64,
    pub average_amount: Option<f64>,
}

/// Pending-work snapshot consumed by the alert evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct PendingBacklog {
    pub pending_count: i64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

/// Durable ledger operations used by the settlement core
#[async_trait]
pub trait PendingPaymentStore: Send + Sync {
    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError>;

    /// Conditional `pending -> settling` update; the serialization point for
    /// concurrent settlement of the same intent. Returns false when the row
    /// was not in `pending` (someone else claimed, settled, or failed it).
    async fn claim_for_settlement(&self, intent_id: &str) -> Result<bool, DatabaseError>;

    /// Conditional `settling -> pending` release, used when settlement backs
    /// out without recording a failure (the amount-discrepancy path, where
    /// the row stays open for operator review).
    async fn release_claim(&self, intent_id: &str) -> Result<bool, DatabaseError>;

    /// Age-based `settling -> pending` release for claims orphaned by a
    /// process that died between claim and commit. Returns the number of
    /// rows released.
    async fn release_stale_claims(&self, older_than_secs: i64) -> Result<u64, DatabaseError>;

    /// Conditional `settling -> settled` commit. Returns false if the claim
    /// was lost, which the caller must treat as a failed settlement.
    async fn mark_settled(
        &self,
        intent_id: &str,
        settled_by: Option<&str>,
        manual: bool,
    ) -> Result<bool, DatabaseError>;

    /// Record a failure with its classification. Applies to rows in
    /// `pending` or `settling`; settled rows are never demoted.
    async fn mark_failed(
        &self,
        intent_id: &str,
        failure: &FailureRecord,
    ) -> Result<bool, DatabaseError>;

    /// Record an operator cancellation. Persisted as a non-retryable
    /// user-error failure with the acting identity in `canceled_by`.
    async fn mark_canceled(
        &self,
        intent_id: &str,
        reason: &str,
        canceled_by: &str,
    ) -> Result<bool, DatabaseError>;

    /// `failed -> pending` reset: clears failure fields and increments
    /// `retry_count`. Returns the refreshed row, or None if the row was not
    /// in `failed`.
    async fn reset_for_retry(
        &self,
        intent_id: &str,
    ) -> Result<Option<PendingPayment>, DatabaseError>;

    async fn search(&self, filter: &PaymentSearchFilter) -> Result<PaymentPage, DatabaseError>;

    async fn statistics(&self) -> Result<PaymentStatistics, DatabaseError>;

    async fn backlog(&self) -> Result<PendingBacklog, DatabaseError>;

    /// Retention sweep: delete failed, non-retryable rows older than the
    /// threshold. Returns the number of rows removed.
    async fn cleanup_old_failed(&self, older_than_days: i64) -> Result<u64, DatabaseError>;
}
