use std::sync::Arc;

use settleflow::api::{self, AppState};
use settleflow::config::AppConfig;
use settleflow::database::init_pool_from_config;
use settleflow::database::pending_payment_repository::PendingPaymentRepository;
use settleflow::logging::init_tracing;
use settleflow::orders::pg::PgOrderService;
use settleflow::orders::OrderService;
use settleflow::processor::{PaymentProcessor, StripeClient};
use settleflow::settlement::alerts::{AlertEvaluator, TracingAlertSink};
use settleflow::settlement::events::TracingEventSink;
use settleflow::settlement::metrics::SettlementMetrics;
use settleflow::settlement::orchestrator::SettlementOrchestrator;
use settleflow::settlement::recovery::OrderRecoveryManager;
use settleflow::settlement::store::PendingPaymentStore;
use settleflow::workers::{AlertSchedulerWorker, RetentionSweepWorker};
use tokio::signal;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting settlement service"
    );

    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        e
    })?;

    let store: Arc<dyn PendingPaymentStore> =
        Arc::new(PendingPaymentRepository::new(pool.clone()));
    let orders: Arc<dyn OrderService> = Arc::new(PgOrderService::new(pool.clone()));
    let processor: Arc<dyn PaymentProcessor> = Arc::new(StripeClient::new(&config.stripe)?);

    let events = Arc::new(TracingEventSink);
    let metrics = Arc::new(SettlementMetrics::new());
    let recovery = Arc::new(OrderRecoveryManager::new(
        store.clone(),
        orders.clone(),
        events.clone(),
    ));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        processor,
        orders.clone(),
        recovery.clone(),
        metrics.clone(),
        events,
        &config.settlement,
    ));

    let alert_worker = AlertSchedulerWorker::new(
        metrics.clone(),
        store.clone(),
        Arc::new(TracingAlertSink),
        AlertEvaluator::new(config.alerts.clone()),
        config.alerts.evaluation_interval_secs,
    );
    tokio::spawn(alert_worker.run());

    let sweep_worker = RetentionSweepWorker::new(
        recovery.clone(),
        config.settlement.cleanup_after_days,
        config.settlement.cleanup_interval_secs,
        config.settlement.stale_claim_timeout_secs,
    );
    tokio::spawn(async move { sweep_worker.run().await });

    let state = Arc::new(AppState {
        store,
        orchestrator,
        recovery,
        metrics,
        alert_config: config.alerts.clone(),
    });
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind listener");
        e
    })?;

    info!(address = %addr, "Settlement service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
