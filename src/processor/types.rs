//! Wire types for the payment processor API

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key the checkout flow stamps onto every intent it creates
pub const ORDER_CODE_METADATA_KEY: &str = "order_code";

/// Payment intent lifecycle status as reported by the processor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Succeeded => "succeeded",
        }
    }

    /// Statuses that can still become `succeeded` without new customer input
    pub fn is_in_flight(&self) -> bool {
        matches!(self, IntentStatus::Processing | IntentStatus::RequiresCapture)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment intent as returned by the processor API
///
/// `amount` is in the currency's minor unit (cents).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub latest_charge: Option<String>,
}

impl PaymentIntent {
    /// Order code the intent was created for, if the checkout flow stamped one
    pub fn order_reference(&self) -> Option<&str> {
        self.metadata
            .get(ORDER_CODE_METADATA_KEY)
            .map(String::as_str)
    }
}

/// Error envelope the processor wraps API failures in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_intent_with_metadata() {
        let json = r#"{
            "id": "pi_test123",
            "status": "succeeded",
            "amount": 1000,
            "currency": "usd",
            "metadata": {"order_code": "ORDER-001"},
            "latest_charge": "ch_abc"
        }"#;
        let intent: PaymentIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.status, IntentStatus::Succeeded);
        assert_eq!(intent.order_reference(), Some("ORDER-001"));
        assert_eq!(intent.amount, 1000);
    }

    #[test]
    fn missing_metadata_defaults_to_empty() {
        let json = r#"{"id": "pi_x", "status": "processing", "amount": 50, "currency": "usd"}"#;
        let intent: PaymentIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.order_reference(), None);
        assert!(intent.status.is_in_flight());
    }

    #[test]
    fn deserializes_error_envelope() {
        let json = r#"{"error": {"type": "invalid_request_error", "code": "resource_missing", "message": "No such payment_intent"}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            envelope.error.error_type.as_deref(),
            Some("invalid_request_error")
        );
    }
}
