//! Structured settlement event stream
//!
//! Every phase of a settlement emits one event to an [`EventSink`]. The
//! default sink writes structured tracing records; audit infrastructure can
//! plug in its own.

use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    AttemptStarted {
        intent_id: String,
        channel: String,
    },
    /// Settle called on an already-settled payment; nothing was mutated
    IdempotentReplay {
        intent_id: String,
    },
    VerificationSucceeded {
        intent_id: String,
        attempts: u32,
    },
    VerificationFailed {
        intent_id: String,
        attempts: u32,
        error_code: String,
        retryable: bool,
    },
    /// Processor record failed a local cross-check (status, linkage, amount)
    ValidationFailed {
        intent_id: String,
        error_code: String,
        detail: String,
    },
    Settled {
        intent_id: String,
        payment_id: String,
        order_code: String,
        manual: bool,
    },
    SettlementFailed {
        intent_id: String,
        error_code: String,
        failure_type: String,
        admin_message: String,
    },
    OrderStateChanged {
        order_id: String,
        from: String,
        to: String,
    },
    /// Order state could not be recovered after a settlement failure
    RecoveryPartialFailure {
        intent_id: String,
        detail: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SettlementEvent);
}

/// Default sink: structured tracing records, one per event
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SettlementEvent) {
        match &event {
            SettlementEvent::AttemptStarted { intent_id, channel } => {
                info!(intent_id, channel, "settlement attempt started");
            }
            SettlementEvent::IdempotentReplay { intent_id } => {
                info!(intent_id, "settlement replayed idempotently");
            }
            SettlementEvent::VerificationSucceeded {
                intent_id,
                attempts,
            } => {
                info!(intent_id, attempts, "processor verification succeeded");
            }
            SettlementEvent::VerificationFailed {
                intent_id,
                attempts,
                error_code,
                retryable,
            } => {
                warn!(
                    intent_id,
                    attempts, error_code, retryable, "processor verification failed"
                );
            }
            SettlementEvent::ValidationFailed {
                intent_id,
                error_code,
                detail,
            } => {
                warn!(intent_id, error_code, detail, "settlement validation failed");
            }
            SettlementEvent::Settled {
                intent_id,
                payment_id,
                order_code,
                manual,
            } => {
                info!(intent_id, payment_id, order_code, manual, "payment settled");
            }
            SettlementEvent::SettlementFailed {
                intent_id,
                error_code,
                failure_type,
                admin_message,
            } => {
                warn!(
                    intent_id,
                    error_code, failure_type, admin_message, "settlement failed"
                );
            }
            SettlementEvent::OrderStateChanged { order_id, from, to } => {
                info!(order_id, from, to, "order state changed");
            }
            SettlementEvent::RecoveryPartialFailure { intent_id, detail } => {
                error!(intent_id, detail, "order state recovery partially failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_tag() {
        let event = SettlementEvent::Settled {
            intent_id: "pi_test123".to_string(),
            payment_id: "p_1".to_string(),
            order_code: "ORDER-001".to_string(),
            manual: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "settled");
        assert_eq!(json["intent_id"], "pi_test123");
    }
}
