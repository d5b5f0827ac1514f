//! Order service seam
//!
//! Settlement never mutates orders directly; it goes through [`OrderService`],
//! which the storefront backend implements. The state machine here mirrors
//! the payment-related slice of the order lifecycle.

pub mod pg;

use crate::processor::types::IntentStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment-related slice of the order lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Checkout in progress, payment not yet settled
    ArrangingPayment,
    /// Settlement hit a retryable failure; order parked pending retry
    PaymentHold,
    /// Settlement failed permanently
    Declined,
    /// Payment settled and applied to the order
    PaymentSettled,
    Completed,
    Canceled,
}

impl OrderState {
    /// Valid state transitions for the payment slice of an order
    pub fn valid_transitions(&self) -> Vec<OrderState> {
        match self {
            OrderState::ArrangingPayment => vec![
                OrderState::PaymentSettled,
                OrderState::PaymentHold,
                OrderState::Declined,
                OrderState::Canceled,
            ],
            OrderState::PaymentHold => vec![
                OrderState::ArrangingPayment,
                OrderState::PaymentSettled,
                OrderState::Declined,
                OrderState::Canceled,
            ],
            OrderState::Declined => vec![OrderState::ArrangingPayment, OrderState::Canceled],
            OrderState::PaymentSettled => vec![OrderState::Completed, OrderState::Canceled],
            OrderState::Completed => vec![],
            OrderState::Canceled => vec![],
        }
    }

    pub fn can_transition_to(&self, target: OrderState) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Completed | OrderState::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::ArrangingPayment => "arranging_payment",
            OrderState::PaymentHold => "payment_hold",
            OrderState::Declined => "declined",
            OrderState::PaymentSettled => "payment_settled",
            OrderState::Completed => "completed",
            OrderState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order snapshot as the order service reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub code: String,
    pub state: OrderState,
    /// Order total in the currency's minor unit
    pub total_with_tax: i64,
    pub currency: String,
    pub customer_email: Option<String>,
}

/// Verified payment snapshot handed to the order service when settling
#[derive(Debug, Clone, Serialize)]
pub struct PaymentApplication {
    pub intent_id: String,
    pub intent_status: IntentStatus,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Error)]
pub enum OrderServiceError {
    #[error("order '{code}' not found")]
    NotFound { code: String },

    /// The order service refused the operation for a business reason. Not a
    /// transport failure; the payment must be marked failed, not retried.
    #[error("order service rejected the operation: {message}")]
    DomainFailure { message: String },

    #[error("invalid order state transition: {from} -> {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    #[error("order service unavailable: {message}")]
    Unavailable { message: String },
}

impl OrderServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderServiceError::Unavailable { .. })
    }
}

/// Operations settlement needs from the order side
#[async_trait]
pub trait OrderService: Send + Sync {
    async fn find_order_by_code(&self, code: &str) -> Result<Option<Order>, OrderServiceError>;

    /// Apply a verified payment to the order, moving it to `PaymentSettled`.
    /// A `DomainFailure` means the order rejected the payment.
    async fn apply_payment(
        &self,
        order_id: &str,
        application: PaymentApplication,
    ) -> Result<Order, OrderServiceError>;

    /// States the order can move to from its current state
    async fn next_states(&self, order_id: &str) -> Result<Vec<OrderState>, OrderServiceError>;

    async fn transition_to(
        &self,
        order_id: &str,
        state: OrderState,
    ) -> Result<Order, OrderServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arranging_payment_allows_settlement_and_failure_paths() {
        let from = OrderState::ArrangingPayment;
        assert!(from.can_transition_to(OrderState::PaymentSettled));
        assert!(from.can_transition_to(OrderState::PaymentHold));
        assert!(from.can_transition_to(OrderState::Declined));
        assert!(!from.can_transition_to(OrderState::Completed));
    }

    #[test]
    fn payment_hold_can_return_to_arranging_payment() {
        assert!(OrderState::PaymentHold.can_transition_to(OrderState::ArrangingPayment));
        assert!(OrderState::PaymentHold.can_transition_to(OrderState::PaymentSettled));
    }

    #[test]
    fn settled_orders_never_revert() {
        let from = OrderState::PaymentSettled;
        assert!(!from.can_transition_to(OrderState::ArrangingPayment));
        assert!(!from.can_transition_to(OrderState::PaymentHold));
        assert!(!from.can_transition_to(OrderState::Declined));
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        assert!(OrderState::Completed.valid_transitions().is_empty());
        assert!(OrderState::Canceled.valid_transitions().is_empty());
        assert!(OrderState::Completed.is_terminal());
    }

    #[test]
    fn unavailable_is_the_only_retryable_error() {
        assert!(OrderServiceError::Unavailable {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!OrderServiceError::DomainFailure {
            message: "order locked".to_string()
        }
        .is_retryable());
    }
}
