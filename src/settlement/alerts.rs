//! Threshold alerting over settlement metrics
//!
//! The evaluator holds no timers. An external scheduler (a worker task in
//! main) calls [`AlertEvaluator::evaluate`] with the current time, a metrics
//! snapshot, and the pending backlog; the evaluator applies thresholds and
//! per-condition cooldowns and returns what should be emitted.

use crate::config::AlertConfig;
use crate::settlement::metrics::MetricsSummary;
use crate::settlement::store::PendingBacklog;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    ConsecutiveFailures,
    ErrorRate,
    SlowSettlement,
    OldestPending,
    PendingVolume,
}

impl AlertCondition {
    /// Minimum gap between two alerts for the same condition
    pub fn cooldown(&self) -> ChronoDuration {
        match self {
            AlertCondition::ConsecutiveFailures => ChronoDuration::minutes(5),
            AlertCondition::ErrorRate => ChronoDuration::minutes(15),
            AlertCondition::SlowSettlement => ChronoDuration::minutes(15),
            AlertCondition::OldestPending => ChronoDuration::minutes(60),
            AlertCondition::PendingVolume => ChronoDuration::minutes(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::ConsecutiveFailures => "consecutive_failures",
            AlertCondition::ErrorRate => "error_rate",
            AlertCondition::SlowSettlement => "slow_settlement",
            AlertCondition::OldestPending => "oldest_pending",
            AlertCondition::PendingVolume => "pending_volume",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub condition: AlertCondition,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// One emission decided by the evaluator
#[derive(Debug, Clone)]
pub enum AlertNotification {
    Triggered(Alert),
    Recovered {
        condition: AlertCondition,
        at: DateTime<Utc>,
    },
}

pub trait AlertSink: Send + Sync {
    fn notify(&self, notification: &AlertNotification);
}

/// Default sink: warn-level records for alerts, info for recoveries
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, notification: &AlertNotification) {
        match notification {
            AlertNotification::Triggered(alert) => {
                warn!(
                    condition = alert.condition.as_str(),
                    message = %alert.message,
                    "settlement alert triggered"
                );
            }
            AlertNotification::Recovered { condition, .. } => {
                info!(condition = condition.as_str(), "settlement alert recovered");
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ConditionState {
    active: bool,
    last_alert_at: Option<DateTime<Utc>>,
}

pub struct AlertEvaluator {
    config: AlertConfig,
    state: HashMap<AlertCondition, ConditionState>,
}

impl AlertEvaluator {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        summary: &MetricsSummary,
        backlog: &PendingBacklog,
    ) -> Vec<AlertNotification> {
        let checks = self.run_checks(summary, backlog, now);
        let mut notifications = Vec::new();

        for (condition, breach) in checks {
            let state = self.state.entry(condition).or_default();
            match breach {
                Some(message) => {
                    let in_cooldown = state
                        .last_alert_at
                        .is_some_and(|last| now - last < condition.cooldown());
                    if !in_cooldown {
                        state.last_alert_at = Some(now);
                        notifications.push(AlertNotification::Triggered(Alert {
                            condition,
                            message,
                            triggered_at: now,
                        }));
                    }
                    state.active = true;
                }
                None => {
                    if state.active {
                        state.active = false;
                        notifications.push(AlertNotification::Recovered { condition, at: now });
                    }
                }
            }
        }

        notifications
    }

    /// Threshold checks: Some(message) when breached, None when clear
    fn run_checks(
        &self,
        summary: &MetricsSummary,
        backlog: &PendingBacklog,
        now: DateTime<Utc>,
    ) -> Vec<(AlertCondition, Option<String>)> {
        let consecutive =
            (summary.consecutive_failures >= self.config.consecutive_failure_threshold).then(
                || {
                    format!(
                        "{} consecutive settlement failures (threshold {})",
                        summary.consecutive_failures, self.config.consecutive_failure_threshold
                    )
                },
            );

        let error_rate = (summary.samples >= self.config.error_rate_min_samples
            && summary.error_rate > self.config.error_rate_threshold)
            .then(|| {
                format!(
                    "settlement error rate {:.1}% over {} samples (threshold {:.1}%)",
                    summary.error_rate * 100.0,
                    summary.samples,
                    self.config.error_rate_threshold * 100.0
                )
            });

        let slow = summary
            .average_duration_ms
            .filter(|avg| *avg > self.config.slow_settlement_threshold_ms as f64)
            .map(|avg| {
                format!(
                    "average settlement time {:.0} ms (threshold {} ms)",
                    avg, self.config.slow_settlement_threshold_ms
                )
            });

        let oldest = backlog
            .oldest_pending_at
            .map(|t| (now - t).num_hours())
            .filter(|age| *age > self.config.oldest_pending_threshold_hours)
            .map(|age| {
                format!(
                    "oldest pending payment is {} hours old (threshold {} h)",
                    age, self.config.oldest_pending_threshold_hours
                )
            });

        let volume = (backlog.pending_count > self.config.pending_volume_threshold).then(|| {
            format!(
                "{} payments pending (threshold {})",
                backlog.pending_count, self.config.pending_volume_threshold
            )
        });

        vec![
            (AlertCondition::ConsecutiveFailures, consecutive),
            (AlertCondition::ErrorRate, error_rate),
            (AlertCondition::SlowSettlement, slow),
            (AlertCondition::OldestPending, oldest),
            (AlertCondition::PendingVolume, volume),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn summary(consecutive: u64, failures: u64, samples: u64, avg_ms: Option<f64>) -> MetricsSummary {
        MetricsSummary {
            attempts: samples,
            successes: samples - failures,
            failures,
            consecutive_failures: consecutive,
            error_rate: if samples > 0 {
                failures as f64 / samples as f64
            } else {
                0.0
            },
            samples,
            average_duration_ms: avg_ms,
            daily: BTreeMap::new(),
        }
    }

    #[test]
    fn triggers_on_consecutive_failures_and_respects_cooldown() {
        let mut evaluator = AlertEvaluator::new(AlertConfig::default());
        let now = Utc::now();
        let breached = summary(3, 3, 3, None);

        let first = evaluator.evaluate(now, &breached, &PendingBacklog::default());
        assert!(matches!(
            first.as_slice(),
            [AlertNotification::Triggered(alert)]
                if alert.condition == AlertCondition::ConsecutiveFailures
        ));

        // Within cooldown: condition still breached, no new alert
        let again = evaluator.evaluate(
            now + ChronoDuration::minutes(1),
            &breached,
            &PendingBacklog::default(),
        );
        assert!(again.is_empty());

        // After cooldown: alert again
        let later = evaluator.evaluate(
            now + ChronoDuration::minutes(6),
            &breached,
            &PendingBacklog::default(),
        );
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn emits_recovery_when_condition_clears() {
        let mut evaluator = AlertEvaluator::new(AlertConfig::default());
        let now = Utc::now();
        evaluator.evaluate(now, &summary(5, 5, 5, None), &PendingBacklog::default());

        let recovered = evaluator.evaluate(
            now + ChronoDuration::minutes(1),
            &summary(0, 5, 20, None),
            &PendingBacklog::default(),
        );
        assert!(matches!(
            recovered.as_slice(),
            [AlertNotification::Recovered {
                condition: AlertCondition::ConsecutiveFailures,
                ..
            }]
        ));
    }

    #[test]
    fn error_rate_needs_minimum_samples() {
        let mut evaluator = AlertEvaluator::new(AlertConfig::default());
        let now = Utc::now();
        // 50% error rate but only 4 samples
        let few = evaluator.evaluate(now, &summary(1, 2, 4, None), &PendingBacklog::default());
        assert!(few.is_empty());

        // Same rate over enough samples triggers
        let enough = evaluator.evaluate(
            now + ChronoDuration::minutes(1),
            &summary(1, 6, 12, None),
            &PendingBacklog::default(),
        );
        assert!(enough
            .iter()
            .any(|n| matches!(n, AlertNotification::Triggered(a) if a.condition == AlertCondition::ErrorRate)));
    }

    #[test]
    fn backlog_conditions_trigger() {
        let mut evaluator = AlertEvaluator::new(AlertConfig::default());
        let now = Utc::now();
        let backlog = PendingBacklog {
            pending_count: 150,
            oldest_pending_at: Some(now - ChronoDuration::hours(30)),
        };
        let notifications = evaluator.evaluate(now, &summary(0, 0, 0, None), &backlog);
        let conditions: Vec<_> = notifications
            .iter()
            .filter_map(|n| match n {
                AlertNotification::Triggered(a) => Some(a.condition),
                _ => None,
            })
            .collect();
        assert!(conditions.contains(&AlertCondition::OldestPending));
        assert!(conditions.contains(&AlertCondition::PendingVolume));
    }
}
