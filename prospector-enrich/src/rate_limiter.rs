//! Per-source rate budget
//!
//! Token bucket (GCRA) from `governor`: `requests_per_interval` tokens per
//! `interval_ms`, with `burst` tokens available at once. Callers wait for a
//! token; waits are served in arrival order, so no caller starves.
//!
//! The budget is shared by every concurrent record using the source.

use crate::config::SourceConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::types::SourceKind;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate budget for one source
pub struct SourceRateLimiter {
    source: SourceKind,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    /// Serialises waiters so tokens are granted first come, first served
    queue: Mutex<()>,
    acquired: AtomicU64,
    waited_ms: AtomicU64,
}

impl SourceRateLimiter {
    /// Build from source settings
    pub fn new(source: SourceKind, config: &SourceConfig) -> PipelineResult<Self> {
        let tokens = NonZeroU32::new(config.requests_per_interval).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "{}: requests_per_interval must be at least 1",
                source
            ))
        })?;
        let burst = NonZeroU32::new(config.burst).ok_or_else(|| {
            PipelineError::Configuration(format!("{}: burst must be at least 1", source))
        })?;

        let period = token_period(config.interval_ms, tokens);
        let quota = Quota::with_period(period)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "{}: interval_ms / requests_per_interval must be non-zero",
                    source
                ))
            })?
            .allow_burst(burst);

        Ok(Self {
            source,
            limiter: RateLimiter::direct(quota),
            queue: Mutex::new(()),
            acquired: AtomicU64::new(0),
            waited_ms: AtomicU64::new(0),
        })
    }

    /// Source this budget belongs to
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Wait until a token is available, then take it
    pub async fn acquire(&self) {
        let start = Instant::now();
        {
            let _turn = self.queue.lock().await;
            self.limiter.until_ready().await;
        }
        let waited = start.elapsed();

        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.waited_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);

        if waited >= Duration::from_millis(100) {
            tracing::debug!(
                source = %self.source,
                waited_ms = waited.as_millis() as u64,
                "Waited for rate budget"
            );
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        let granted = self.limiter.check().is_ok();
        if granted {
            self.acquired.fetch_add(1, Ordering::Relaxed);
        }
        granted
    }

    /// Tokens granted so far
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Total time spent waiting for tokens (ms)
    pub fn waited_ms(&self) -> u64 {
        self.waited_ms.load(Ordering::Relaxed)
    }
}

/// Spacing between tokens, rounded up to the next nanosecond
///
/// Truncating would let `requests_per_interval + 1` grants fit inside one
/// interval whenever the interval does not divide evenly.
fn token_period(interval_ms: u64, tokens: NonZeroU32) -> Duration {
    let interval_ns = u128::from(interval_ms) * 1_000_000;
    let period_ns = interval_ns.div_ceil(u128::from(tokens.get()));
    Duration::from_nanos(u64::try_from(period_ns).unwrap_or(u64::MAX))
}

impl std::fmt::Debug for SourceRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRateLimiter")
            .field("source", &self.source)
            .field("acquired", &self.acquired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(requests_per_interval: u32, interval_ms: u64, burst: u32) -> SourceConfig {
        SourceConfig {
            requests_per_interval,
            interval_ms,
            burst,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn test_burst_then_denied() {
        let limiter =
            SourceRateLimiter::new(SourceKind::Performance, &budget(60, 60_000, 3)).unwrap();
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire(), "burst of 3 must be exhausted");
        assert_eq!(limiter.acquired(), 3);
    }

    #[test]
    fn test_period_rounds_up_so_interval_never_overflows() {
        let tokens = NonZeroU32::new(7).unwrap();
        let period = token_period(1_000, tokens);
        assert_eq!(period, Duration::from_nanos(142_857_143));
        assert!(period * 7 >= Duration::from_millis(1_000));

        let even = token_period(1_000, NonZeroU32::new(10).unwrap());
        assert_eq!(even, Duration::from_millis(100));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let err = SourceRateLimiter::new(SourceKind::Registry, &budget(0, 60_000, 1));
        assert!(matches!(err, Err(PipelineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_acquire_spaces_calls() {
        // 20 tokens per second, burst 1 → one token every 50ms
        let limiter =
            SourceRateLimiter::new(SourceKind::TechStack, &budget(20, 1_000, 1)).unwrap();
        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // First token immediate, four more at 50ms spacing
        assert!(start.elapsed() >= Duration::from_millis(190));
        assert_eq!(limiter.acquired(), 5);
    }
}
