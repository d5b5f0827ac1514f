//! Bounded retry with exponential backoff
//!
//! Wraps any fallible processor call. Retryability comes from the
//! classifier; the backoff sleep never holds a lock or a transaction.

use crate::processor::error::ProcessorError;
use crate::settlement::classifier::{ClassifiedError, ErrorClassifier};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based):
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Terminal failure of a retried operation
#[derive(Debug)]
pub struct RetryFailure {
    pub error: ProcessorError,
    pub classified: ClassifiedError,
    /// True when attempts ran out on a retryable error
    pub exhausted: bool,
}

/// Result of a retried operation with the attempt count that produced it
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub outcome: Result<T, RetryFailure>,
    pub attempts: u32,
}

/// Run `op` under `policy`, classifying each failure and backing off
/// between retryable attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProcessorError>>,
{
    let max_attempts = policy.max_retries.max(1);
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "operation succeeded after retry");
                }
                return RetryOutcome {
                    outcome: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => {
                let classified = ErrorClassifier::classify_processor(&err);
                let exhausted = attempt == max_attempts;
                if !classified.is_retryable || exhausted {
                    warn!(
                        operation,
                        attempt,
                        error_code = classified.error_code,
                        retryable = classified.is_retryable,
                        "operation failed, not retrying"
                    );
                    let exhausted = exhausted && classified.is_retryable;
                    return RetryOutcome {
                        outcome: Err(RetryFailure {
                            error: err,
                            classified,
                            exhausted,
                        }),
                        attempts: attempt,
                    };
                }

                // The classifier can demand a longer wait, e.g. Retry-After.
                let delay = classified
                    .retry_delay
                    .map(|d| d.max(policy.delay_for_attempt(attempt)))
                    .unwrap_or_else(|| policy.delay_for_attempt(attempt));
                warn!(
                    operation,
                    attempt,
                    error_code = classified.error_code,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns from within");
}
