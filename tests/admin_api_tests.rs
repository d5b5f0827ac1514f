//! Admin HTTP surface over in-memory seams

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{header, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use settleflow::api::{self, AppState};
use settleflow::config::{AlertConfig, SettlementConfig};
use settleflow::orders::{Order, OrderState};
use settleflow::settlement::events::TracingEventSink;
use settleflow::settlement::metrics::SettlementMetrics;
use settleflow::settlement::orchestrator::SettlementOrchestrator;
use settleflow::settlement::recovery::OrderRecoveryManager;
use settleflow::settlement::store::{PaymentStatus, PendingPaymentStore};
use settleflow::settlement::testing::{succeeded_intent, MockOrderService, MockProcessor, MockStore};

const INTENT: &str = "pi_test123";
const ORDER_CODE: &str = "ORDER-001";
const AMOUNT: i64 = 1000;

fn test_config() -> SettlementConfig {
    SettlementConfig {
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2,
        amount_tolerance: 1,
        verification_timeout_secs: 5,
        stale_claim_timeout_secs: 300,
        cleanup_after_days: 90,
        cleanup_interval_secs: 86_400,
    }
}

struct TestApp {
    router: Router,
    store: Arc<MockStore>,
}

fn test_app(processor: MockProcessor) -> TestApp {
    let store = Arc::new(MockStore::with_payment(INTENT, ORDER_CODE, AMOUNT));
    let orders = Arc::new(MockOrderService::with_order(Order {
        id: "order-1".to_string(),
        code: ORDER_CODE.to_string(),
        state: OrderState::ArrangingPayment,
        total_with_tax: AMOUNT,
        currency: "usd".to_string(),
        customer_email: Some("customer@example.com".to_string()),
    }));
    let events = Arc::new(TracingEventSink);
    let metrics = Arc::new(SettlementMetrics::new());
    let recovery = Arc::new(OrderRecoveryManager::new(
        store.clone(),
        orders.clone(),
        events.clone(),
    ));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        Arc::new(processor),
        orders.clone(),
        recovery.clone(),
        metrics.clone(),
        events,
        &test_config(),
    ));
    let state = Arc::new(AppState {
        store: store.clone() as Arc<dyn PendingPaymentStore>,
        orchestrator,
        recovery,
        metrics,
        alert_config: AlertConfig::default(),
    });
    TestApp {
        router: api::router(state),
        store,
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_as_admin(uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-admin-user", "ops@example.com");
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn search_returns_a_page_with_pagination_echo() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(app.router, get("/admin/payments")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["limit"], 50);
    assert_eq!(json["offset"], 0);
    assert_eq!(json["items"][0]["intent_id"], INTENT);
    assert_eq!(json["items"][0]["status"], "pending");
}

#[tokio::test]
async fn search_rejects_unknown_status_filter() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(app.router, get("/admin/payments?status=exploded")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn detail_of_unknown_intent_is_a_structured_404() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(app.router, get("/admin/payments/pi_missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "PAYMENT_NOT_FOUND");
    assert_eq!(json["message"], "Payment not found");
    assert_eq!(json["retryable"], false);
}

#[tokio::test]
async fn mutating_endpoints_require_the_admin_identity_header() {
    let app = test_app(MockProcessor::new());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/payments/{INTENT}/settle"))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "VALIDATION_ERROR");
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("x-admin-user"));
}

#[tokio::test]
async fn manual_settle_flattens_result_and_carries_warnings() {
    // Processor unreachable; bypass settles on the ledger's own numbers
    let app = test_app(MockProcessor::new());

    let (status, json) = send(
        app.router,
        post_as_admin(
            &format!("/admin/payments/{INTENT}/settle"),
            Some(serde_json::json!({ "bypass_verification": true })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["transaction_id"], INTENT);
    assert!(!json["warnings"].as_array().unwrap().is_empty());

    let row = app.store.get(INTENT).unwrap();
    assert_eq!(row.status, "settled");
    assert!(row.manual_settlement);
    assert_eq!(row.settled_by.as_deref(), Some("ops@example.com"));
}

#[tokio::test]
async fn manual_settle_without_body_verifies_normally() {
    let app = test_app(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));

    let (status, json) = send(
        app.router,
        post_as_admin(&format!("/admin/payments/{INTENT}/settle"), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["warnings"], serde_json::json!([]));
    assert_eq!(app.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn retry_resets_the_failed_row_and_settles_again() {
    let app = test_app(MockProcessor::with_intent(succeeded_intent(
        INTENT, ORDER_CODE, AMOUNT,
    )));
    app.store.set_status(INTENT, PaymentStatus::Failed);

    let (status, json) = send(
        app.router,
        post_as_admin(&format!("/admin/payments/{INTENT}/retry"), None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let row = app.store.get(INTENT).unwrap();
    assert_eq!(row.status, "settled");
    assert_eq!(row.retry_count, 1);
}

#[tokio::test]
async fn retry_of_a_pending_row_is_a_conflict() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(
        app.router,
        post_as_admin(&format!("/admin/payments/{INTENT}/retry"), None),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "RETRY_NOT_ALLOWED");
}

#[tokio::test]
async fn cancel_rejects_a_blank_reason() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(
        app.router,
        post_as_admin(
            &format!("/admin/payments/{INTENT}/cancel"),
            Some(serde_json::json!({ "reason": "   " })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn cancel_records_the_reason_and_operator() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(
        app.router,
        post_as_admin(
            &format!("/admin/payments/{INTENT}/cancel"),
            Some(serde_json::json!({ "reason": "customer request" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["canceled"], true);
    assert_eq!(json["intent_id"], INTENT);

    let row = app.store.get(INTENT).unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.failure_reason.as_deref(), Some("customer request"));
    assert_eq!(row.canceled_by.as_deref(), Some("ops@example.com"));
}

#[tokio::test]
async fn cancel_of_a_settled_payment_is_a_conflict() {
    let app = test_app(MockProcessor::new());
    app.store.set_status(INTENT, PaymentStatus::Settled);

    let (status, json) = send(
        app.router,
        post_as_admin(
            &format!("/admin/payments/{INTENT}/cancel"),
            Some(serde_json::json!({ "reason": "too late" })),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "PAYMENT_ALREADY_SETTLED");
    assert_eq!(app.store.get(INTENT).unwrap().status, "settled");
}

#[tokio::test]
async fn statistics_count_by_status() {
    let app = test_app(MockProcessor::new());
    app.store.insert_pending("pi_other", "ORDER-002", 500);
    app.store.set_status("pi_other", PaymentStatus::Failed);

    let (status, json) = send(app.router, get("/admin/payments/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["pending"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["retryable_failed"], 1);
}

#[tokio::test]
async fn metrics_endpoint_exposes_the_snapshot() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(app.router, get("/admin/metrics")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["attempts"], 0);
    assert_eq!(json["successes"], 0);
    assert_eq!(json["error_rate"], 0.0);
}

#[tokio::test]
async fn health_reports_healthy_with_no_traffic_and_echoes_the_backlog() {
    let app = test_app(MockProcessor::new());

    let (status, json) = send(app.router, get("/admin/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["pending_count"], 1);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app(MockProcessor::new());

    let response = app.router.oneshot(get("/admin/payments")).await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}
