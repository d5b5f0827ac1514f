use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::settlement::alerts::{AlertEvaluator, AlertSink};
use crate::settlement::metrics::SettlementMetrics;
use crate::settlement::store::PendingPaymentStore;

/// External scheduler for the alert evaluator: ticks, gathers a metrics
/// snapshot and the pending backlog, and forwards notifications to the sink.
pub struct AlertSchedulerWorker {
    metrics: Arc<SettlementMetrics>,
    store: Arc<dyn PendingPaymentStore>,
    sink: Arc<dyn AlertSink>,
    evaluator: AlertEvaluator,
    interval_secs: u64,
}

impl AlertSchedulerWorker {
    pub fn new(
        metrics: Arc<SettlementMetrics>,
        store: Arc<dyn PendingPaymentStore>,
        sink: Arc<dyn AlertSink>,
        evaluator: AlertEvaluator,
        interval_secs: u64,
    ) -> Self {
        Self {
            metrics,
            store,
            sink,
            evaluator,
            interval_secs,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        info!(
            interval_secs = self.interval_secs,
            "Alert scheduler worker started"
        );

        loop {
            ticker.tick().await;

            let backlog = match self.store.backlog().await {
                Ok(backlog) => backlog,
                Err(e) => {
                    error!(error = %e, "Failed to load pending backlog for alerting");
                    continue;
                }
            };

            let summary = self.metrics.snapshot();
            let notifications = self
                .evaluator
                .evaluate(chrono::Utc::now(), &summary, &backlog);
            for notification in &notifications {
                self.sink.notify(notification);
            }
        }
    }
}
