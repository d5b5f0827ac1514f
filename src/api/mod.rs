pub mod admin;

use crate::config::AlertConfig;
use crate::settlement::metrics::SettlementMetrics;
use crate::settlement::orchestrator::SettlementOrchestrator;
use crate::settlement::recovery::OrderRecoveryManager;
use crate::settlement::store::PendingPaymentStore;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};

/// Shared handler state
pub struct AppState {
    pub store: Arc<dyn PendingPaymentStore>,
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub recovery: Arc<OrderRecoveryManager>,
    pub metrics: Arc<SettlementMetrics>,
    pub alert_config: AlertConfig,
}

/// Build the HTTP router with request-id and logging layers applied
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/admin", admin::router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
