//! End-to-end settlement flows over in-memory seams

use std::sync::Arc;

use settleflow::config::SettlementConfig;
use settleflow::orders::{Order, OrderServiceError, OrderState};
use settleflow::processor::error::ProcessorError;
use settleflow::processor::types::IntentStatus;
use settleflow::settlement::events::TracingEventSink;
use settleflow::settlement::metrics::SettlementMetrics;
use settleflow::settlement::orchestrator::{CallerContext, SettlementOrchestrator};
use settleflow::settlement::recovery::OrderRecoveryManager;
use settleflow::settlement::store::PaymentStatus;
use settleflow::settlement::testing::{succeeded_intent, MockOrderService, MockProcessor, MockStore};

const INTENT: &str = "pi_test123";
const ORDER_CODE: &str = "ORDER-001";
const AMOUNT: i64 = 1000;

fn test_config() -> SettlementConfig {
    SettlementConfig {
        max_retries: 3,
        base_delay_ms: 1000,
        max_delay_ms: 10_000,
        backoff_multiplier: 2,
        amount_tolerance: 1,
        verification_timeout_secs: 60,
        stale_claim_timeout_secs: 300,
        cleanup_after_days: 90,
        cleanup_interval_secs: 86_400,
    }
}

fn test_order() -> Order {
    Order {
        id: "order-1".to_string(),
        code: ORDER_CODE.to_string(),
        state: OrderState::ArrangingPayment,
        total_with_tax: AMOUNT,
        currency: "usd".to_string(),
        customer_email: Some("customer@example.com".to_string()),
    }
}

struct Harness {
    store: Arc<MockStore>,
    orders: Arc<MockOrderService>,
    processor: Arc<MockProcessor>,
    metrics: Arc<SettlementMetrics>,
    recovery: Arc<OrderRecoveryManager>,
    orchestrator: SettlementOrchestrator,
}

fn harness(processor: MockProcessor) -> Harness {
    let store = Arc::new(MockStore::with_payment(INTENT, ORDER_CODE, AMOUNT));
    let orders = Arc::new(MockOrderService::with_order(test_order()));
    let processor = Arc::new(processor);
    let metrics = Arc::new(SettlementMetrics::new());
    let events = Arc::new(TracingEventSink);
    let recovery = Arc::new(OrderRecoveryManager::new(
        store.clone(),
        orders.clone(),
        events.clone(),
    ));
    let orchestrator = SettlementOrchestrator::new(
        store.clone(),
        processor.clone(),
        orders.clone(),
        recovery.clone(),
        metrics.clone(),
        events,
        &test_config(),
    );
    Harness {
        store,
        orders,
        processor,
        metrics,
        recovery,
        orchestrator,
    }
}

#[tokio::test]
async fn settles_pending_payment_end_to_end() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(result.success);
    assert_eq!(result.transaction_id.as_deref(), Some(INTENT));
    assert!(result.payment_id.is_some());
    assert!(result.error.is_none());

    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "settled");
    assert!(row.settled_at.is_some());
    assert!(!row.manual_settlement);
    assert_eq!(h.orders.apply_calls(), 1);
    assert_eq!(
        h.orders.current_state("order-1"),
        Some(OrderState::PaymentSettled)
    );
}

#[tokio::test]
async fn second_settle_replays_without_touching_anything() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    let ctx = CallerContext::checkout();

    let first = h.orchestrator.settle(INTENT, &ctx).await;
    let second = h.orchestrator.settle(INTENT, &ctx).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.transaction_id.as_deref(), Some(INTENT));
    // The replay never verifies again or re-applies the payment
    assert_eq!(h.orders.apply_calls(), 1);
    assert_eq!(h.processor.calls(), 1);
}

#[tokio::test]
async fn amount_within_tolerance_settles() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT,
        ORDER_CODE,
        AMOUNT + 1,
    )));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(result.success);
    assert_eq!(h.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn amount_mismatch_leaves_row_pending_and_order_untouched() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, 2000,
    )));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    let message = result.error.unwrap();
    assert!(message.contains("2000"), "message was: {}", message);
    assert!(message.contains("1000"), "message was: {}", message);

    // The row stays open for operator review; no failure fields are written
    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "pending");
    assert!(row.failure_reason.is_none());
    assert_eq!(h.orders.apply_calls(), 0);
    assert_eq!(
        h.orders.current_state("order-1"),
        Some(OrderState::ArrangingPayment)
    );
}

#[tokio::test]
async fn missing_order_reference_fails_settlement() {
    let mut intent = succeeded_intent(INTENT, ORDER_CODE, AMOUNT);
    intent.metadata.clear();
    let h = harness(MockProcessor::with_intent(intent));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Payment is not properly linked to an order")
    );
    assert_eq!(h.store.get(INTENT).unwrap().status, "failed");
    assert_eq!(h.orders.apply_calls(), 0);
}

#[tokio::test]
async fn wrong_order_reference_fails_settlement() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT,
        "OTHER-999",
        AMOUNT,
    )));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Payment does not belong to the expected order")
    );
}

#[tokio::test(start_paused = true)]
async fn transient_verification_errors_retry_to_success() {
    let h = harness(MockProcessor::with_responses(vec![
        Err(ProcessorError::Connection {
            message: "connection reset".to_string(),
        }),
        Err(ProcessorError::Connection {
            message: "connection reset".to_string(),
        }),
        Ok(succeeded_intent(INTENT, ORDER_CODE, AMOUNT)),
    ]));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(result.success);
    assert_eq!(h.processor.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_exhausts_into_retryable_failure() {
    let connection_error = || {
        Err(ProcessorError::Connection {
            message: "connection reset".to_string(),
        })
    };
    let h = harness(MockProcessor::with_responses(vec![
        connection_error(),
        connection_error(),
        connection_error(),
    ]));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(h.processor.calls(), 3);

    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.is_retryable, Some(true));
    // Retryable transient failure parks the order for a later retry
    assert_eq!(
        h.orders.current_state("order-1"),
        Some(OrderState::PaymentHold)
    );
}

#[tokio::test]
async fn non_retryable_errors_short_circuit_the_retry_loop() {
    let h = harness(MockProcessor::with_responses(vec![Err(
        ProcessorError::Authentication {
            message: "invalid api key".to_string(),
        },
    )]));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(h.processor.calls(), 1);

    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.is_retryable, Some(false));
    assert_eq!(h.orders.current_state("order-1"), Some(OrderState::Declined));
}

#[tokio::test]
async fn still_processing_intent_parks_the_order_for_retry() {
    let mut intent = succeeded_intent(INTENT, ORDER_CODE, AMOUNT);
    intent.status = IntentStatus::Processing;
    let h = harness(MockProcessor::with_intent(intent));

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Payment is still being processed and cannot be settled yet.")
    );
    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.is_retryable, Some(true));
    assert_eq!(
        h.orders.current_state("order-1"),
        Some(OrderState::PaymentHold)
    );
}

#[tokio::test]
async fn untyped_storage_failures_classify_as_retryable_database_errors() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    h.orders.reject_find_with(OrderServiceError::Unavailable {
        message: "database connection pool exhausted".to_string(),
    });

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.is_retryable, Some(true));
    assert_eq!(row.failure_type.as_deref(), Some("system_error"));
    assert!(row.failure_reason.unwrap().contains("storage failure"));
}

#[tokio::test]
async fn settle_recovers_after_a_crashed_claim_goes_stale() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    // A claim taken by a process that died before committing
    h.store.set_status(INTENT, PaymentStatus::Settling);
    h.store.backdate_claim(INTENT, 600);

    let blocked = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;
    assert!(!blocked.success);
    assert!(blocked.error.unwrap().contains("in progress"));

    assert_eq!(h.recovery.reclaim_stale_claims(300).await.unwrap(), 1);

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;
    assert!(result.success);
    assert_eq!(h.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn failed_payment_is_a_terminal_guard() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    h.store.set_status(INTENT, PaymentStatus::Failed);

    let result = h.orchestrator.settle(INTENT, &CallerContext::checkout()).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Payment has failed and cannot be settled")
    );
    // Guard fires before any processor traffic
    assert_eq!(h.processor.calls(), 0);
}

#[tokio::test]
async fn unknown_intent_reports_payment_not_found() {
    let h = harness(MockProcessor::new());

    let result = h
        .orchestrator
        .settle("pi_does_not_exist", &CallerContext::checkout())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Payment not found"));
}

#[tokio::test]
async fn metrics_track_successes_and_failure_streaks() {
    let h = harness(MockProcessor::with_responses(vec![
        Ok(succeeded_intent(INTENT, ORDER_CODE, AMOUNT)),
        Err(ProcessorError::Authentication {
            message: "invalid api key".to_string(),
        }),
    ]));
    h.store.insert_pending("pi_other", "ORDER-002", 500);

    let ctx = CallerContext::checkout();
    assert!(h.orchestrator.settle(INTENT, &ctx).await.success);
    assert!(!h.orchestrator.settle("pi_other", &ctx).await.success);

    let summary = h.metrics.snapshot();
    assert_eq!(summary.attempts, 2);
    assert_eq!(summary.successes, 1);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.consecutive_failures, 1);
    assert!(summary.error_rate > 0.0);
}

#[tokio::test]
async fn manual_settle_with_bypass_survives_unreachable_processor() {
    // No scripted responses and no fallback: every retrieve fails
    let h = harness(MockProcessor::new());
    let ctx = CallerContext::admin("ops@example.com");

    let outcome = h.orchestrator.manual_settle(INTENT, &ctx, true).await;

    assert!(outcome.result.success);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("could not be reached")));

    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "settled");
    assert!(row.manual_settlement);
    assert_eq!(row.settled_by.as_deref(), Some("ops@example.com"));
}

#[tokio::test]
async fn manual_settle_with_bypass_collects_discrepancies_as_warnings() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT,
        "OTHER-999",
        5000,
    )));
    let ctx = CallerContext::admin("ops@example.com");

    let outcome = h.orchestrator.manual_settle(INTENT, &ctx, true).await;

    assert!(outcome.result.success);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("does not match order code")));
    assert!(outcome.warnings.iter().any(|w| w.contains("differs from")));
    assert_eq!(h.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn manual_settle_resets_a_failed_payment_first() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    h.store.set_status(INTENT, PaymentStatus::Failed);

    let ctx = CallerContext::admin("ops@example.com");
    let outcome = h.orchestrator.manual_settle(INTENT, &ctx, false).await;

    assert!(outcome.result.success);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("reset for manual settlement")));
    assert_eq!(h.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn cancel_records_operator_and_moves_the_order() {
    let h = harness(MockProcessor::new());
    let ctx = CallerContext::admin("ops@example.com");

    h.orchestrator
        .cancel(INTENT, "customer request", &ctx)
        .await
        .unwrap();

    let row = h.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.failure_reason.as_deref(), Some("customer request"));
    assert_eq!(row.is_retryable, Some(false));
    assert_eq!(row.canceled_by.as_deref(), Some("ops@example.com"));
    assert_eq!(h.orders.current_state("order-1"), Some(OrderState::Canceled));
}

#[tokio::test]
async fn cancel_refuses_settled_payments() {
    let h = harness(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    assert!(h
        .orchestrator
        .settle(INTENT, &CallerContext::checkout())
        .await
        .success);

    let err = h
        .orchestrator
        .cancel(INTENT, "too late", &CallerContext::admin("ops@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert_eq!(h.store.get(INTENT).unwrap().status, "settled");
}
