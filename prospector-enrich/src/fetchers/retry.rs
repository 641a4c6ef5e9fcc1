//! Source Retry Logic
//!
//! Exponential backoff for transient source failures.
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, back off, retry
//! 4. Otherwise return the error with the attempt count
//!
//! **Backoff Strategy:**
//! - Initial delay: `base_delay_ms`
//! - Multiplier: 2.0 (exponential)
//! - Capped at `max_delay_ms`
//! - A server-suggested wait (`Retry-After`) replaces the computed delay when
//!   longer, but never exceeds `max_delay_ms`

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Bounded exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt (ms)
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (ms)
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay after failed attempt `attempt`, honouring a server hint up to the cap
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let backoff = self.delay_after(attempt);
        match hint {
            Some(hint) => hint.max(backoff).min(Duration::from_millis(self.max_delay_ms)),
            None => backoff,
        }
    }
}

/// Final result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Last result
    pub result: Result<T, E>,
    /// Attempts made
    pub attempts: u32,
}

/// Retry an async operation with exponential backoff
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "performance fetch")
/// * `policy` - Attempt bound and delays
/// * `is_retryable` - Which errors warrant another attempt
/// * `retry_after` - Server-suggested wait carried by an error, if any
/// * `operation` - Async closure receiving the 1-based attempt number
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    retry_after: impl Fn(&E) -> Option<Duration>,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying source call");
        }

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Source call succeeded after retry"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }

                if attempt >= max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Source call failed: retries exhausted"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts: attempt,
                    };
                }

                let delay = policy.delay_with_hint(attempt, retry_after(&err));

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient source failure, retrying after backoff"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay_ms: 100,
            max_delay_ms: 500,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(60), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        };

        let outcome = retry_with_backoff(
            "test",
            &policy,
            |_: &String| true,
            |_| None,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("timeout {}", n))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), String> = retry_with_backoff(
            "test",
            &RetryPolicy::default(),
            |_: &String| false,
            |_| None,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("not found".to_string()) }
            },
        )
        .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_delay() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 5_000,
        };
        let start = Instant::now();

        let outcome: RetryOutcome<(), String> = retry_with_backoff(
            "test",
            &policy,
            |_: &String| true,
            |_| Some(Duration::from_secs(2)),
            |_| async { Err("throttled".to_string()) },
        )
        .await;

        assert_eq!(outcome.attempts, 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn test_hint_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 40,
        };
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_millis(25))),
            Duration::from_millis(25)
        );
        assert_eq!(
            policy.delay_with_hint(1, Some(Duration::from_secs(86_400))),
            Duration::from_millis(40)
        );
        // A hint shorter than the backoff does not shorten it
        assert_eq!(
            policy.delay_with_hint(3, Some(Duration::from_millis(1))),
            Duration::from_millis(40)
        );
        assert_eq!(policy.delay_with_hint(2, None), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_day_long_retry_after_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 10,
            max_delay_ms: 40,
        };
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let outcome = retry_with_backoff(
            "test",
            &policy,
            |_: &String| true,
            |_| Some(Duration::from_secs(86_400)),
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 2 {
                        Err("throttled".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome.result.unwrap(), 2);
        assert_eq!(outcome.attempts, 2);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
