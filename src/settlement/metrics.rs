//! Settlement metrics sink
//!
//! Injectable, thread-safe, advisory only. Counters never influence
//! settlement behavior and carry no persistence guarantee.

use crate::config::AlertConfig;
use crate::settlement::store::PendingBacklog;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const DAILY_BUCKET_RETENTION: usize = 7;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DayBucket {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct DurationStats {
    total_ms: u64,
    count: u64,
}

/// Shared metrics sink updated on every orchestrator outcome
#[derive(Default)]
pub struct SettlementMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    duration: Mutex<DurationStats>,
    daily: Mutex<BTreeMap<NaiveDate, DayBucket>>,
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.bump_day(|bucket| bucket.attempts += 1);
    }

    pub fn record_success(&self, duration: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.record_duration(duration);
        self.bump_day(|bucket| bucket.successes += 1);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
        self.bump_day(|bucket| bucket.failures += 1);
    }

    fn record_duration(&self, duration: Duration) {
        if let Ok(mut stats) = self.duration.lock() {
            stats.total_ms = stats.total_ms.saturating_add(duration.as_millis() as u64);
            stats.count += 1;
        }
    }

    fn bump_day(&self, update: impl FnOnce(&mut DayBucket)) {
        let today = Utc::now().date_naive();
        if let Ok(mut daily) = self.daily.lock() {
            update(daily.entry(today).or_default());
            while daily.len() > DAILY_BUCKET_RETENTION {
                let oldest = match daily.keys().next() {
                    Some(date) => *date,
                    None => break,
                };
                daily.remove(&oldest);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSummary {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let (average_duration_ms, completed) = match self.duration.lock() {
            Ok(stats) if stats.count > 0 => {
                (Some(stats.total_ms as f64 / stats.count as f64), stats.count)
            }
            _ => (None, 0),
        };
        let daily = self
            .daily
            .lock()
            .map(|d| d.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();

        MetricsSummary {
            attempts,
            successes,
            failures,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            error_rate: if completed > 0 {
                failures as f64 / completed as f64
            } else {
                0.0
            },
            samples: completed,
            average_duration_ms,
            daily,
        }
    }
}

/// Point-in-time view of the metrics sink
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    /// Failures over completed settlements
    pub error_rate: f64,
    /// Completed settlements the error rate is computed over
    pub samples: u64,
    pub average_duration_ms: Option<f64>,
    pub daily: BTreeMap<String, DayBucket>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub metrics: MetricsSummary,
    pub pending_count: i64,
    pub oldest_pending_age_hours: Option<i64>,
}

/// Evaluate the current snapshot against the alert thresholds and produce a
/// read-only health report for the admin surface.
pub fn health_report(
    summary: MetricsSummary,
    backlog: &PendingBacklog,
    config: &AlertConfig,
) -> HealthReport {
    let mut issues = Vec::new();
    let mut unhealthy = false;

    if summary.consecutive_failures >= config.consecutive_failure_threshold {
        issues.push(format!(
            "{} consecutive settlement failures",
            summary.consecutive_failures
        ));
        unhealthy = true;
    }
    if summary.samples >= config.error_rate_min_samples
        && summary.error_rate > config.error_rate_threshold
    {
        issues.push(format!(
            "error rate {:.1}% over {} settlements",
            summary.error_rate * 100.0,
            summary.samples
        ));
        unhealthy = true;
    }
    if let Some(avg) = summary.average_duration_ms {
        if avg > config.slow_settlement_threshold_ms as f64 {
            issues.push(format!("average settlement time {:.0} ms", avg));
        }
    }
    let oldest_pending_age_hours = backlog
        .oldest_pending_at
        .map(|t| (Utc::now() - t).num_hours());
    if let Some(age) = oldest_pending_age_hours {
        if age > config.oldest_pending_threshold_hours {
            issues.push(format!("oldest pending payment is {} hours old", age));
        }
    }
    if backlog.pending_count > config.pending_volume_threshold {
        issues.push(format!("{} payments pending", backlog.pending_count));
    }

    let status = if unhealthy {
        HealthStatus::Unhealthy
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        issues,
        metrics: summary,
        pending_count: backlog.pending_count,
        oldest_pending_age_hours,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_consecutive_failures() {
        let metrics = SettlementMetrics::new();
        metrics.record_attempt();
        metrics.record_failure(Duration::from_millis(100));
        metrics.record_attempt();
        metrics.record_failure(Duration::from_millis(100));
        assert_eq!(metrics.snapshot().consecutive_failures, 2);

        metrics.record_attempt();
        metrics.record_success(Duration::from_millis(100));
        let summary = metrics.snapshot();
        assert_eq!(summary.consecutive_failures, 0);
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.successes, 1);
    }

    #[test]
    fn error_rate_computed_over_completed_settlements() {
        let metrics = SettlementMetrics::new();
        for _ in 0..9 {
            metrics.record_attempt();
            metrics.record_success(Duration::from_millis(50));
        }
        metrics.record_attempt();
        metrics.record_failure(Duration::from_millis(50));
        let summary = metrics.snapshot();
        assert_eq!(summary.samples, 10);
        assert!((summary.error_rate - 0.1).abs() < f64::EPSILON);
        assert_eq!(summary.average_duration_ms, Some(50.0));
    }

    #[test]
    fn health_report_flags_consecutive_failures() {
        let metrics = SettlementMetrics::new();
        for _ in 0..3 {
            metrics.record_attempt();
            metrics.record_failure(Duration::from_millis(10));
        }
        let config = AlertConfig::default();
        let report = health_report(metrics.snapshot(), &PendingBacklog::default(), &config);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.issues.is_empty());
    }

    #[test]
    fn quiet_system_is_healthy() {
        let metrics = SettlementMetrics::new();
        let config = AlertConfig::default();
        let report = health_report(metrics.snapshot(), &PendingBacklog::default(), &config);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
    }
}
