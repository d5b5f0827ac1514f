//! Settlement orchestrator
//!
//! Drives a payment intent from `pending` to `settled` exactly once:
//! terminal-state guard, idempotency check, claim, remote verification with
//! bounded retries, order application, conditional commit. Verification runs
//! outside any database transaction; the conditional claim and commit
//! updates are the serialization points.

use crate::config::SettlementConfig;
use crate::database::pending_payment_repository::PendingPayment;
use crate::error::AppResult;
use crate::orders::{Order, OrderService, OrderServiceError, PaymentApplication};
use crate::processor::client::PaymentProcessor;
use crate::processor::types::{IntentStatus, PaymentIntent};
use crate::settlement::classifier::{ClassificationContext, ClassifiedError, ErrorClassifier};
use crate::settlement::events::{EventSink, SettlementEvent};
use crate::settlement::metrics::SettlementMetrics;
use crate::settlement::recovery::OrderRecoveryManager;
use crate::settlement::retry::{with_retry, RetryPolicy};
use crate::settlement::store::{FailureRecord, PaymentStatus, PendingPaymentStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementChannel {
    Checkout,
    Admin,
}

impl SettlementChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementChannel::Checkout => "checkout",
            SettlementChannel::Admin => "admin",
        }
    }
}

/// Who is asking for the settlement and how long they are willing to wait
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub channel: SettlementChannel,
    pub actor: Option<String>,
    /// Bounds the remote-verification phase; the configured verification
    /// timeout applies when absent
    pub deadline: Option<Duration>,
}

impl CallerContext {
    pub fn checkout() -> Self {
        Self {
            channel: SettlementChannel::Checkout,
            actor: None,
            deadline: None,
        }
    }

    pub fn admin(actor: impl Into<String>) -> Self {
        Self {
            channel: SettlementChannel::Admin,
            actor: Some(actor.into()),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementResult {
    pub success: bool,
    pub payment_id: Option<String>,
    pub transaction_id: Option<String>,
    pub error: Option<String>,
}

impl SettlementResult {
    fn settled(payment_id: String, intent_id: &str) -> Self {
        Self {
            success: true,
            payment_id: Some(payment_id),
            transaction_id: Some(intent_id.to_string()),
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payment_id: None,
            transaction_id: None,
            error: Some(message.into()),
        }
    }
}

/// Manual settlement result with the warnings collected along the way
#[derive(Debug, Clone, Serialize)]
pub struct ManualSettlementOutcome {
    #[serde(flatten)]
    pub result: SettlementResult,
    pub warnings: Vec<String>,
}

pub struct SettlementOrchestrator {
    store: Arc<dyn PendingPaymentStore>,
    processor: Arc<dyn PaymentProcessor>,
    orders: Arc<dyn OrderService>,
    recovery: Arc<OrderRecoveryManager>,
    metrics: Arc<SettlementMetrics>,
    events: Arc<dyn EventSink>,
    retry_policy: RetryPolicy,
    amount_tolerance: i64,
    verification_timeout: Duration,
}

impl SettlementOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PendingPaymentStore>,
        processor: Arc<dyn PaymentProcessor>,
        orders: Arc<dyn OrderService>,
        recovery: Arc<OrderRecoveryManager>,
        metrics: Arc<SettlementMetrics>,
        events: Arc<dyn EventSink>,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            store,
            processor,
            orders,
            recovery,
            metrics,
            events,
            retry_policy: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
                backoff_multiplier: config.backoff_multiplier,
            },
            amount_tolerance: config.amount_tolerance,
            verification_timeout: config.verification_timeout(),
        }
    }

    /// Settle a payment intent. Unconditionally safe to call twice: a second
    /// call on a settled intent replays the success without touching
    /// anything.
    pub async fn settle(&self, intent_id: &str, ctx: &CallerContext) -> SettlementResult {
        self.events.emit(SettlementEvent::AttemptStarted {
            intent_id: intent_id.to_string(),
            channel: ctx.channel.as_str().to_string(),
        });
        self.metrics.record_attempt();
        let started = Instant::now();

        let result = match self.settle_inner(intent_id, ctx).await {
            Ok(result) => result,
            Err(err) => self.handle_unexpected(intent_id, &err.to_string()).await,
        };

        if result.success {
            self.metrics.record_success(started.elapsed());
        } else {
            self.metrics.record_failure(started.elapsed());
        }
        result
    }

    async fn settle_inner(
        &self,
        intent_id: &str,
        ctx: &CallerContext,
    ) -> AppResult<SettlementResult> {
        let Some(payment) = self.store.find_by_intent_id(intent_id).await? else {
            let classified = ErrorClassifier::payment_not_found();
            self.emit_validation_failure(intent_id, &classified);
            return Ok(SettlementResult::failed(&classified.user_message));
        };

        match PaymentStatus::from_db_status(&payment.status) {
            Some(PaymentStatus::Failed) => {
                // Terminal guard: no processor call, no mutation
                let classified = ErrorClassifier::payment_already_failed();
                self.emit_validation_failure(intent_id, &classified);
                return Ok(SettlementResult::failed(&classified.user_message));
            }
            Some(PaymentStatus::Settled) => {
                return Ok(self.idempotent_replay(&payment));
            }
            _ => {}
        }

        if !self.store.claim_for_settlement(intent_id).await? {
            // Lost the race. Re-read: the winner may already have settled.
            if let Some(current) = self.store.find_by_intent_id(intent_id).await? {
                if PaymentStatus::from_db_status(&current.status) == Some(PaymentStatus::Settled) {
                    return Ok(self.idempotent_replay(&current));
                }
            }
            let classified = ErrorClassifier::settlement_in_progress();
            return Ok(SettlementResult::failed(&classified.user_message));
        }

        // Claim held from here on; every exit must settle, fail, or release.
        let intent = match self.verify(intent_id, &payment, ctx).await {
            Ok(intent) => intent,
            Err(VerificationFailure::AmountDiscrepancy(classified)) => {
                // The payment did succeed at the processor; the row stays
                // open for operator review instead of being failed.
                if !self.store.release_claim(intent_id).await? {
                    warn!(intent_id, "claim not released after amount discrepancy");
                }
                self.emit_validation_failure(intent_id, &classified);
                return Ok(SettlementResult::failed(&classified.user_message));
            }
            Err(VerificationFailure::Failed(classified)) => {
                return Ok(self.fail_settlement(intent_id, &classified).await);
            }
        };

        let order = match self.orders.find_order_by_code(&payment.order_code).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                let classified = ErrorClassifier::order_not_found(&payment.order_code);
                return Ok(self.fail_settlement(intent_id, &classified).await);
            }
            Err(err) => {
                return Ok(self
                    .handle_unexpected(intent_id, &format!("order lookup failed: {}", err))
                    .await);
            }
        };

        self.apply_and_commit(intent_id, &payment, &order, &intent, ctx, false)
            .await
    }

    /// Apply the verified payment to the order and commit the claim
    async fn apply_and_commit(
        &self,
        intent_id: &str,
        payment: &PendingPayment,
        order: &Order,
        intent: &PaymentIntent,
        ctx: &CallerContext,
        manual: bool,
    ) -> AppResult<SettlementResult> {
        let application = PaymentApplication {
            intent_id: intent_id.to_string(),
            intent_status: intent.status,
            amount: intent.amount,
            currency: intent.currency.clone(),
        };

        match self.orders.apply_payment(&order.id, application).await {
            Ok(_) => {
                let committed = self
                    .store
                    .mark_settled(intent_id, ctx.actor.as_deref(), manual)
                    .await?;
                if !committed {
                    // Order paid but the row moved under us. Needs an
                    // operator; never report success on an uncommitted row.
                    error!(
                        intent_id,
                        order_code = %payment.order_code,
                        "settlement claim lost after payment was applied to the order"
                    );
                    let classified =
                        ErrorClassifier::unexpected("settlement commit lost its claim");
                    return Ok(SettlementResult::failed(&classified.user_message));
                }
                self.events.emit(SettlementEvent::Settled {
                    intent_id: intent_id.to_string(),
                    payment_id: payment.id.to_string(),
                    order_code: payment.order_code.clone(),
                    manual,
                });
                info!(
                    intent_id,
                    order_code = %payment.order_code,
                    manual,
                    "payment settled"
                );
                Ok(SettlementResult::settled(payment.id.to_string(), intent_id))
            }
            Err(OrderServiceError::Unavailable { message }) => Ok(self
                .handle_unexpected(intent_id, &format!("order service unavailable: {}", message))
                .await),
            Err(err) => {
                // Domain rejection from the order side: vague to the
                // customer, detail kept for operators.
                let classified = ErrorClassifier::order_rejected(&err.to_string());
                Ok(self.fail_settlement(intent_id, &classified).await)
            }
        }
    }

    fn idempotent_replay(&self, payment: &PendingPayment) -> SettlementResult {
        self.events.emit(SettlementEvent::IdempotentReplay {
            intent_id: payment.intent_id.clone(),
        });
        SettlementResult::settled(payment.id.to_string(), &payment.intent_id)
    }

    /// Remote verification: retrieve the intent under the retry policy and
    /// cross-check status, order linkage, and amount against the ledger.
    async fn verify(
        &self,
        intent_id: &str,
        payment: &PendingPayment,
        ctx: &CallerContext,
    ) -> Result<PaymentIntent, VerificationFailure> {
        let budget = ctx.deadline.unwrap_or(self.verification_timeout);
        let retried = tokio::time::timeout(
            budget,
            with_retry(&self.retry_policy, "retrieve_intent", || {
                self.processor.retrieve_intent(intent_id)
            }),
        )
        .await;

        let outcome = match retried {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(intent_id, budget_secs = budget.as_secs(), "verification timed out");
                return Err(VerificationFailure::Failed(
                    ErrorClassifier::verification_timeout(),
                ));
            }
        };

        let intent = match outcome.outcome {
            Ok(intent) => {
                self.events.emit(SettlementEvent::VerificationSucceeded {
                    intent_id: intent_id.to_string(),
                    attempts: outcome.attempts,
                });
                intent
            }
            Err(failure) => {
                warn!(
                    intent_id,
                    attempts = outcome.attempts,
                    exhausted = failure.exhausted,
                    error = %failure.error,
                    "intent verification failed"
                );
                self.events.emit(SettlementEvent::VerificationFailed {
                    intent_id: intent_id.to_string(),
                    attempts: outcome.attempts,
                    error_code: failure.classified.error_code.to_string(),
                    retryable: failure.classified.is_retryable,
                });
                return Err(VerificationFailure::Failed(failure.classified));
            }
        };

        if intent.status != IntentStatus::Succeeded {
            return Err(VerificationFailure::Failed(
                ErrorClassifier::intent_not_succeeded(intent.status),
            ));
        }

        match intent.order_reference() {
            None => {
                return Err(VerificationFailure::Failed(
                    ErrorClassifier::order_not_linked(),
                ))
            }
            Some(reference) if reference != payment.order_code => {
                return Err(VerificationFailure::Failed(ErrorClassifier::order_mismatch(
                    &payment.order_code,
                    reference,
                )));
            }
            Some(_) => {}
        }

        if (intent.amount - payment.amount).abs() > self.amount_tolerance {
            return Err(VerificationFailure::AmountDiscrepancy(
                ErrorClassifier::amount_mismatch(intent.amount, payment.amount),
            ));
        }

        Ok(intent)
    }

    /// Persist the failure, recover the order state, and surface only the
    /// classified user message.
    async fn fail_settlement(&self, intent_id: &str, classified: &ClassifiedError) -> SettlementResult {
        let failure = FailureRecord {
            reason: classified.admin_message.clone(),
            failure_type: classified.failure_type(),
            is_retryable: classified.is_retryable,
        };

        if let Err(err) = self.store.mark_failed(intent_id, &failure).await {
            error!(intent_id, error = %err, "failed to record settlement failure");
        }
        self.events.emit(SettlementEvent::SettlementFailed {
            intent_id: intent_id.to_string(),
            error_code: classified.error_code.to_string(),
            failure_type: failure.failure_type.as_str().to_string(),
            admin_message: classified.admin_message.clone(),
        });

        if let Err(err) = self.recovery.handle_failure(intent_id, &failure).await {
            warn!(intent_id, error = %err, "order state recovery failed");
        }

        SettlementResult::failed(&classified.user_message)
    }

    /// Last-resort path: classify the untyped detail through the settlement
    /// heuristics, then a best-effort failure write. A failing secondary
    /// write is logged and swallowed.
    async fn handle_unexpected(&self, intent_id: &str, detail: &str) -> SettlementResult {
        error!(intent_id, detail, "unexpected settlement failure");
        let classified =
            ErrorClassifier::classify_message(detail, ClassificationContext::Settlement);
        let failure = FailureRecord {
            reason: classified.admin_message.clone(),
            failure_type: classified.failure_type(),
            is_retryable: classified.is_retryable,
        };
        if let Err(err) = self.store.mark_failed(intent_id, &failure).await {
            error!(intent_id, error = %err, "secondary failure write also failed");
        }
        SettlementResult::failed(&classified.user_message)
    }

    fn emit_validation_failure(&self, intent_id: &str, classified: &ClassifiedError) {
        self.events.emit(SettlementEvent::ValidationFailed {
            intent_id: intent_id.to_string(),
            error_code: classified.error_code.to_string(),
            detail: classified.admin_message.clone(),
        });
    }

    /// Operator-driven settlement. Verification failures become hard stops
    /// unless `bypass_verification` is set, in which case discrepancies are
    /// collected as warnings and settlement proceeds on the ledger's own
    /// numbers.
    pub async fn manual_settle(
        &self,
        intent_id: &str,
        ctx: &CallerContext,
        bypass_verification: bool,
    ) -> ManualSettlementOutcome {
        let mut warnings = Vec::new();
        self.metrics.record_attempt();
        let started = Instant::now();

        let result = self
            .manual_settle_inner(intent_id, ctx, bypass_verification, &mut warnings)
            .await
            .unwrap_or_else(|err| {
                SettlementResult::failed(
                    ErrorClassifier::classify_message(
                        &err.to_string(),
                        ClassificationContext::Settlement,
                    )
                    .user_message,
                )
            });

        if result.success {
            self.metrics.record_success(started.elapsed());
        } else {
            self.metrics.record_failure(started.elapsed());
        }
        ManualSettlementOutcome { result, warnings }
    }

    async fn manual_settle_inner(
        &self,
        intent_id: &str,
        ctx: &CallerContext,
        bypass_verification: bool,
        warnings: &mut Vec<String>,
    ) -> AppResult<SettlementResult> {
        let Some(payment) = self.store.find_by_intent_id(intent_id).await? else {
            return Ok(SettlementResult::failed(
                ErrorClassifier::payment_not_found().user_message,
            ));
        };

        match PaymentStatus::from_db_status(&payment.status) {
            Some(PaymentStatus::Settled) => {
                warnings.push("Payment was already settled".to_string());
                return Ok(self.idempotent_replay(&payment));
            }
            Some(PaymentStatus::Failed) => {
                if self.store.reset_for_retry(intent_id).await?.is_none() {
                    return Ok(SettlementResult::failed(
                        ErrorClassifier::payment_already_failed().user_message,
                    ));
                }
                warnings.push(
                    "Payment was in a failed state and was reset for manual settlement"
                        .to_string(),
                );
            }
            _ => {}
        }

        if !self.store.claim_for_settlement(intent_id).await? {
            let classified = ErrorClassifier::settlement_in_progress();
            return Ok(SettlementResult::failed(&classified.user_message));
        }

        let intent = if bypass_verification {
            warnings.push(format!(
                "Processor verification bypassed by {}",
                ctx.actor.as_deref().unwrap_or("unknown operator")
            ));
            match self.processor.retrieve_intent(intent_id).await {
                Ok(intent) => {
                    if intent.status != IntentStatus::Succeeded {
                        warnings.push(format!(
                            "Processor reports status '{}', not 'succeeded'",
                            intent.status
                        ));
                    }
                    match intent.order_reference() {
                        None => warnings
                            .push("Intent metadata carries no order reference".to_string()),
                        Some(reference) if reference != payment.order_code => warnings.push(
                            format!(
                                "Intent order reference '{}' does not match order code '{}'",
                                reference, payment.order_code
                            ),
                        ),
                        Some(_) => {}
                    }
                    if (intent.amount - payment.amount).abs() > self.amount_tolerance {
                        warnings.push(format!(
                            "Processor amount {} differs from ledger amount {}",
                            intent.amount, payment.amount
                        ));
                    }
                    intent
                }
                Err(err) => {
                    warnings.push(format!("Processor could not be reached: {}", err));
                    // Settle on the ledger's own numbers
                    PaymentIntent {
                        id: intent_id.to_string(),
                        status: IntentStatus::Succeeded,
                        amount: payment.amount,
                        currency: payment.currency.clone(),
                        metadata: Default::default(),
                        latest_charge: None,
                    }
                }
            }
        } else {
            match self.verify(intent_id, &payment, ctx).await {
                Ok(intent) => intent,
                Err(VerificationFailure::AmountDiscrepancy(classified)) => {
                    if !self.store.release_claim(intent_id).await? {
                        warn!(intent_id, "claim not released after amount discrepancy");
                    }
                    self.emit_validation_failure(intent_id, &classified);
                    return Ok(SettlementResult::failed(&classified.user_message));
                }
                Err(VerificationFailure::Failed(classified)) => {
                    return Ok(self.fail_settlement(intent_id, &classified).await);
                }
            }
        };

        let order = match self.orders.find_order_by_code(&payment.order_code).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                let classified = ErrorClassifier::order_not_found(&payment.order_code);
                return Ok(self.fail_settlement(intent_id, &classified).await);
            }
            Err(err) => {
                return Ok(self
                    .handle_unexpected(intent_id, &format!("order lookup failed: {}", err))
                    .await);
            }
        };

        self.apply_and_commit(intent_id, &payment, &order, &intent, ctx, true)
            .await
    }

    /// Operator cancellation: records a non-retryable user-error failure
    /// with the acting identity and moves the order to canceled when the
    /// lifecycle allows it.
    pub async fn cancel(&self, intent_id: &str, reason: &str, ctx: &CallerContext) -> AppResult<()> {
        use crate::error::{AppError, AppErrorKind, DomainError};
        use crate::orders::OrderState;

        let actor = ctx.actor.as_deref().unwrap_or("unknown");
        let Some(payment) = self.store.find_by_intent_id(intent_id).await? else {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentNotFound {
                    intent_id: intent_id.to_string(),
                },
            )));
        };

        if !self.store.mark_canceled(intent_id, reason, actor).await? {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::PaymentAlreadySettled {
                    intent_id: intent_id.to_string(),
                },
            )));
        }
        info!(intent_id, actor, reason, "payment canceled");

        // Best effort: cancellation of the payment stands even if the order
        // cannot move.
        if let Ok(Some(order)) = self.orders.find_order_by_code(&payment.order_code).await {
            if order.state.can_transition_to(OrderState::Canceled) {
                match self.orders.transition_to(&order.id, OrderState::Canceled).await {
                    Ok(updated) => self.events.emit(SettlementEvent::OrderStateChanged {
                        order_id: order.id.clone(),
                        from: order.state.to_string(),
                        to: updated.state.to_string(),
                    }),
                    Err(err) => {
                        warn!(intent_id, error = %err, "order could not be canceled")
                    }
                }
            }
        }

        Ok(())
    }
}

/// Verification failures split by how the ledger row must be left behind
enum VerificationFailure {
    /// Mark the row failed and run order recovery
    Failed(ClassifiedError),
    /// Release the claim; the row stays pending for operator review
    AmountDiscrepancy(ClassifiedError),
}
