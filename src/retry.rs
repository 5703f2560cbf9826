// =============================================================================
// Retry Executor — resilient execution with capped exponential backoff
// =============================================================================
//
// Every fallible external step in the engine (scan acquisition, per-item
// pipeline processing, sink writes) runs through `execute`. The executor
// never panics and never propagates an error past its boundary: callers get
// a `RetryOutcome` and branch on `success`.
//
// Delay between attempts:
//   delay = min(max_delay, base_delay * multiplier^(attempt - 1))
// optionally scaled by a uniform factor in [0.5, 1.0] when jitter is on.
// =============================================================================

use std::future::Future;
use std::time::Instant;

use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::error::EngineError;

/// Tuning for one class of retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Decides whether a given failure is worth another attempt.
    pub retryable: fn(&EngineError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: EngineError::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Policy used around whole scan-cycle acquisition.
    pub fn for_scans() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: EngineError::is_retryable,
        }
    }

    /// Policy used per observation inside a batch. Tighter, so one noisy
    /// item cannot stall its siblings for long.
    pub fn for_pipeline_items() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter: false,
            retryable: EngineError::is_retryable,
        }
    }

    /// Backoff delay before retrying after the given failed attempt
    /// (1-based), without jitter applied.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let raw = (self.base_delay_ms as f64 * exp).round() as u64;
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

/// Result record of a retried operation. Exactly one of `value` / `error`
/// is populated, matching the `success` flag.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<EngineError>,
    pub attempts_used: u32,
    pub total_duration_ms: u64,
}

impl<T> RetryOutcome<T> {
    /// Consume the outcome, returning the value or the terminal error.
    pub fn into_result(self) -> Result<T, EngineError> {
        match self.value {
            Some(v) => Ok(v),
            None => Err(self
                .error
                .unwrap_or_else(|| EngineError::Internal("retry outcome carried no error".into()))),
        }
    }
}

/// Execute `op` under `policy`, retrying retryable failures with backoff.
///
/// `op` is called up to `policy.max_attempts` times. A non-retryable error
/// stops immediately with no sleep.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<EngineError> = None;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return RetryOutcome {
                    success: true,
                    value: Some(value),
                    error: None,
                    attempts_used: attempt,
                    total_duration_ms: started.elapsed().as_millis() as u64,
                };
            }
            Err(err) => {
                let retryable = (policy.retryable)(&err);
                if !retryable || attempt == max_attempts {
                    if retryable {
                        warn!(
                            attempts = attempt,
                            class = err.class(),
                            error = %err,
                            "retry budget exhausted"
                        );
                    } else {
                        debug!(
                            attempt,
                            class = err.class(),
                            error = %err,
                            "non-retryable failure — stopping immediately"
                        );
                    }
                    return RetryOutcome {
                        success: false,
                        value: None,
                        error: Some(err),
                        attempts_used: attempt,
                        total_duration_ms: started.elapsed().as_millis() as u64,
                    };
                }

                let mut delay = policy.delay_for_attempt(attempt);
                if policy.jitter {
                    // Uniform scale in [0.5, 1.0] to de-synchronise
                    // concurrent retries across locations.
                    let factor: f64 = 0.5 + rand::random::<f64>() * 0.5;
                    delay = delay.mul_f64(factor);
                }

                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    class = err.class(),
                    error = %err,
                    "retryable failure — backing off"
                );
                last_error = Some(err);
                sleep(delay).await;
            }
        }
    }

    // Unreachable: the loop always returns from its final iteration. Kept
    // so the compiler sees a terminal value.
    RetryOutcome {
        success: false,
        value: None,
        error: last_error,
        attempts_used: max_attempts,
        total_duration_ms: started.elapsed().as_millis() as u64,
    }
}
