use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

use crate::settlement::recovery::OrderRecoveryManager;

/// Periodic ledger maintenance: releases settlement claims orphaned by a
/// crashed process, and removes old non-retryable failed payments.
pub struct RetentionSweepWorker {
    recovery: Arc<OrderRecoveryManager>,
    older_than_days: i64,
    interval_secs: u64,
    stale_claim_timeout_secs: i64,
}

impl RetentionSweepWorker {
    pub fn new(
        recovery: Arc<OrderRecoveryManager>,
        older_than_days: i64,
        interval_secs: u64,
        stale_claim_timeout_secs: i64,
    ) -> Self {
        Self {
            recovery,
            older_than_days,
            interval_secs,
            stale_claim_timeout_secs,
        }
    }

    pub async fn run(&self) {
        let mut cleanup = interval(Duration::from_secs(self.interval_secs));
        let mut reclaim = interval(Duration::from_secs(
            self.stale_claim_timeout_secs.max(1) as u64
        ));
        info!(
            interval_secs = self.interval_secs,
            older_than_days = self.older_than_days,
            stale_claim_timeout_secs = self.stale_claim_timeout_secs,
            "Retention sweep worker started"
        );

        loop {
            tokio::select! {
                _ = cleanup.tick() => {
                    match self
                        .recovery
                        .cleanup_old_failed_payments(self.older_than_days)
                        .await
                    {
                        Ok(removed) => {
                            if removed > 0 {
                                info!(removed, "Retention sweep removed old failed payments");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
                _ = reclaim.tick() => {
                    if let Err(e) = self
                        .recovery
                        .reclaim_stale_claims(self.stale_claim_timeout_secs)
                        .await
                    {
                        error!(error = %e, "Stale claim sweep failed");
                    }
                }
            }
        }
    }
}
