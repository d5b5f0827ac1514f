//! Order state recovery
//!
//! After a settlement failure the order must land in a state that matches
//! the failure: parked for retry, or declined. Also owns the explicit
//! failed-to-pending reset and the retention sweep.

use crate::database::pending_payment_repository::PendingPayment;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError};
use crate::orders::{OrderService, OrderServiceError, OrderState};
use crate::settlement::events::{EventSink, SettlementEvent};
use crate::settlement::store::{FailureRecord, FailureType, PendingPaymentStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a recovery pass over the order
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub previous_state: OrderState,
    pub new_state: OrderState,
    /// Set when the payment was marked failed but the order transition could
    /// not be performed; the operation as a whole still counts as handled.
    pub partial_failure: Option<String>,
}

pub struct OrderRecoveryManager {
    store: Arc<dyn PendingPaymentStore>,
    orders: Arc<dyn OrderService>,
    events: Arc<dyn EventSink>,
}

impl OrderRecoveryManager {
    pub fn new(
        store: Arc<dyn PendingPaymentStore>,
        orders: Arc<dyn OrderService>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            orders,
            events,
        }
    }

    /// Target order state for a failure classification
    fn target_state(failure: &FailureRecord) -> OrderState {
        let transient = matches!(
            failure.failure_type,
            FailureType::StripeError | FailureType::SystemError
        );
        if failure.is_retryable && transient {
            OrderState::PaymentHold
        } else {
            OrderState::Declined
        }
    }

    /// Move the order to the state the failure calls for. An unreachable
    /// transition is reported through `partial_failure`, never an abort.
    pub async fn handle_failure(
        &self,
        intent_id: &str,
        failure: &FailureRecord,
    ) -> Result<RecoveryOutcome, AppError> {
        let payment = self
            .store
            .find_by_intent_id(intent_id)
            .await?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                    intent_id: intent_id.to_string(),
                }))
            })?;

        let order = self
            .orders
            .find_order_by_code(&payment.order_code)
            .await
            .map_err(order_service_error)?
            .ok_or_else(|| {
                AppError::new(AppErrorKind::Domain(DomainError::OrderNotFound {
                    order_code: payment.order_code.clone(),
                }))
            })?;

        let target = Self::target_state(failure);
        if order.state == target {
            return Ok(RecoveryOutcome {
                previous_state: order.state,
                new_state: order.state,
                partial_failure: None,
            });
        }

        let reachable = self
            .orders
            .next_states(&order.id)
            .await
            .map_err(order_service_error)?
            .contains(&target);
        if !reachable {
            let detail = format!(
                "order {} cannot move from '{}' to '{}'",
                order.code, order.state, target
            );
            warn!(intent_id, detail, "order recovery transition unreachable");
            self.events.emit(SettlementEvent::RecoveryPartialFailure {
                intent_id: intent_id.to_string(),
                detail: detail.clone(),
            });
            return Ok(RecoveryOutcome {
                previous_state: order.state,
                new_state: order.state,
                partial_failure: Some(detail),
            });
        }

        match self.orders.transition_to(&order.id, target).await {
            Ok(updated) => {
                self.events.emit(SettlementEvent::OrderStateChanged {
                    order_id: order.id.clone(),
                    from: order.state.to_string(),
                    to: updated.state.to_string(),
                });
                Ok(RecoveryOutcome {
                    previous_state: order.state,
                    new_state: updated.state,
                    partial_failure: None,
                })
            }
            Err(err) => {
                let detail = format!("order state transition failed: {}", err);
                warn!(intent_id, detail, "order recovery transition failed");
                self.events.emit(SettlementEvent::RecoveryPartialFailure {
                    intent_id: intent_id.to_string(),
                    detail: detail.clone(),
                });
                Ok(RecoveryOutcome {
                    previous_state: order.state,
                    new_state: order.state,
                    partial_failure: Some(detail),
                })
            }
        }
    }

    /// Reset a failed payment for a fresh settlement attempt and move the
    /// order back to `ArrangingPayment` when it is not already there.
    pub async fn reset_for_retry(
        &self,
        intent_id: &str,
        actor: Option<&str>,
    ) -> Result<PendingPayment, AppError> {
        if self.store.find_by_intent_id(intent_id).await?.is_none() {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentNotFound {
                    intent_id: intent_id.to_string(),
                },
            )));
        }

        let payment = self.store.reset_for_retry(intent_id).await?.ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::RetryNotAllowed {
                intent_id: intent_id.to_string(),
                reason: "payment is not in a failed state".to_string(),
            }))
        })?;

        info!(
            intent_id,
            retry_count = payment.retry_count,
            actor = actor.unwrap_or("system"),
            "payment reset for retry"
        );

        if let Some(order) = self
            .orders
            .find_order_by_code(&payment.order_code)
            .await
            .map_err(order_service_error)?
        {
            if order.state != OrderState::ArrangingPayment {
                if order.state.can_transition_to(OrderState::ArrangingPayment) {
                    let updated = self
                        .orders
                        .transition_to(&order.id, OrderState::ArrangingPayment)
                        .await
                        .map_err(order_service_error)?;
                    self.events.emit(SettlementEvent::OrderStateChanged {
                        order_id: order.id.clone(),
                        from: order.state.to_string(),
                        to: updated.state.to_string(),
                    });
                } else {
                    warn!(
                        intent_id,
                        order_code = %order.code,
                        state = %order.state,
                        "order cannot return to arranging_payment"
                    );
                }
            }
        }

        Ok(payment)
    }

    /// Release settlement claims whose holder died between claim and commit,
    /// so the rows become settleable again instead of wedging in `settling`.
    pub async fn reclaim_stale_claims(&self, older_than_secs: i64) -> Result<u64, AppError> {
        let released = self.store.release_stale_claims(older_than_secs).await?;
        if released > 0 {
            warn!(released, older_than_secs, "released stale settlement claims");
        }
        Ok(released)
    }

    /// Retention sweep over old, non-retryable failed rows
    pub async fn cleanup_old_failed_payments(&self, older_than_days: i64) -> Result<u64, AppError> {
        let removed = self.store.cleanup_old_failed(older_than_days).await?;
        if removed > 0 {
            info!(removed, older_than_days, "removed old failed payments");
        }
        Ok(removed)
    }
}

fn order_service_error(err: OrderServiceError) -> AppError {
    AppError::new(AppErrorKind::External(ExternalError::OrderService {
        message: err.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::events::TracingEventSink;
    use crate::settlement::testing::{MockOrderService, MockStore};
    use crate::settlement::store::PaymentStatus;
    use crate::orders::Order;

    fn manager(store: Arc<MockStore>, orders: Arc<MockOrderService>) -> OrderRecoveryManager {
        OrderRecoveryManager::new(store, orders, Arc::new(TracingEventSink))
    }

    fn order(state: OrderState) -> Order {
        Order {
            id: "order-1".to_string(),
            code: "ORDER-001".to_string(),
            state,
            total_with_tax: 1000,
            currency: "usd".to_string(),
            customer_email: None,
        }
    }

    #[tokio::test]
    async fn retryable_processor_failure_parks_the_order() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        let orders = Arc::new(MockOrderService::with_order(order(
            OrderState::ArrangingPayment,
        )));
        let failure = FailureRecord {
            reason: "connection refused".to_string(),
            failure_type: FailureType::StripeError,
            is_retryable: true,
        };

        let outcome = manager(store, orders.clone())
            .handle_failure("pi_1", &failure)
            .await
            .unwrap();
        assert_eq!(outcome.previous_state, OrderState::ArrangingPayment);
        assert_eq!(outcome.new_state, OrderState::PaymentHold);
        assert!(outcome.partial_failure.is_none());
    }

    #[tokio::test]
    async fn non_retryable_failure_declines_the_order() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        let orders = Arc::new(MockOrderService::with_order(order(
            OrderState::ArrangingPayment,
        )));
        let failure = FailureRecord {
            reason: "amount mismatch".to_string(),
            failure_type: FailureType::ValidationError,
            is_retryable: false,
        };

        let outcome = manager(store, orders)
            .handle_failure("pi_1", &failure)
            .await
            .unwrap();
        assert_eq!(outcome.new_state, OrderState::Declined);
    }

    #[tokio::test]
    async fn unreachable_transition_is_a_partial_failure() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        // Completed orders accept no transitions at all
        let orders = Arc::new(MockOrderService::with_order(order(OrderState::Completed)));
        let failure = FailureRecord {
            reason: "boom".to_string(),
            failure_type: FailureType::SystemError,
            is_retryable: true,
        };

        let outcome = manager(store, orders)
            .handle_failure("pi_1", &failure)
            .await
            .unwrap();
        assert_eq!(outcome.new_state, OrderState::Completed);
        assert!(outcome.partial_failure.is_some());
    }

    #[tokio::test]
    async fn reset_for_retry_requires_failed_state() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        let orders = Arc::new(MockOrderService::with_order(order(
            OrderState::ArrangingPayment,
        )));

        // Row is pending, not failed
        let err = manager(store, orders)
            .reset_for_retry("pi_1", Some("ops@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            AppErrorKind::Domain(DomainError::RetryNotAllowed { .. })
        ));
    }

    #[tokio::test]
    async fn stale_settling_claims_are_released() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        let orders = Arc::new(MockOrderService::with_order(order(
            OrderState::ArrangingPayment,
        )));
        store.set_status("pi_1", PaymentStatus::Settling);
        store.backdate_claim("pi_1", 600);

        let released = manager(store.clone(), orders)
            .reclaim_stale_claims(300)
            .await
            .unwrap();
        assert_eq!(released, 1);
        assert_eq!(store.get("pi_1").unwrap().status, "pending");
    }

    #[tokio::test]
    async fn fresh_settling_claims_are_left_alone() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        let orders = Arc::new(MockOrderService::with_order(order(
            OrderState::ArrangingPayment,
        )));
        store.set_status("pi_1", PaymentStatus::Settling);

        let released = manager(store.clone(), orders)
            .reclaim_stale_claims(300)
            .await
            .unwrap();
        assert_eq!(released, 0);
        assert_eq!(store.get("pi_1").unwrap().status, "settling");
    }

    #[tokio::test]
    async fn reset_for_retry_clears_failure_and_moves_order_back() {
        let store = Arc::new(MockStore::with_payment("pi_1", "ORDER-001", 1000));
        store.set_status("pi_1", PaymentStatus::Failed);
        let orders = Arc::new(MockOrderService::with_order(order(OrderState::Declined)));

        let payment = manager(store.clone(), orders.clone())
            .reset_for_retry("pi_1", Some("ops@example.com"))
            .await
            .unwrap();
        assert_eq!(payment.status, "pending");
        assert_eq!(payment.retry_count, 1);
        assert!(payment.failure_reason.is_none());
        assert_eq!(
            orders.current_state("order-1"),
            Some(OrderState::ArrangingPayment)
        );
    }
}
