//! Source fetchers
//!
//! A fetcher wraps one [`SourceClient`] with the source's cache, rate budget
//! and retry policy, and turns every call into an [`Outcome`]:
//!
//! 1. Derive the lookup key (malformed → permanent failure, no external call)
//! 2. Cache hit → Success without touching the budget
//! 3. Acquire a rate token (bounded wait), call the source (bounded wait)
//! 4. Transient errors back off and retry up to the policy's attempt bound
//! 5. Success is cached; failures never are
//! 6. Exhausted retries degrade to the source's default payload when one
//!    exists, else fail non-retriably
//!
//! Only fetchers perform external I/O. Stage logic stays pure.

pub mod retry;
mod set;

pub use set::{FetchedSources, SourceClients, SourceFetchers};

use crate::cache::{BoundedCache, CacheStats};
use crate::config::SourceConfig;
use crate::error::PipelineResult;
use crate::rate_limiter::SourceRateLimiter;
use crate::sources::{LookupKey, SourceClient, SourceError};
use crate::types::{ErrorKind, Failure, Outcome, Record, SourceKind};
use retry::{retry_with_backoff, RetryPolicy};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of one fetch for one record
#[derive(Debug, Clone)]
pub struct FetchReport<P> {
    /// Fetch outcome
    pub outcome: Outcome<P>,
    /// Call attempts made (0 for cache hits and malformed keys)
    pub attempts: u32,
    /// Served from cache
    pub cache_hit: bool,
}

#[derive(Debug, Default)]
struct FetchCounters {
    fetches: AtomicU64,
    external_calls: AtomicU64,
    retries: AtomicU64,
    successes: AtomicU64,
    degraded: AtomicU64,
    failures: AtomicU64,
}

/// Per-source counters for the Batch Result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    /// Source
    pub source: SourceKind,
    /// Fetch requests (including cache hits)
    pub fetches: u64,
    /// External calls made
    pub external_calls: u64,
    /// Calls that were retries
    pub retries: u64,
    /// Fetches answered by a fresh call
    pub successes: u64,
    /// Fetches answered with the default payload
    pub degraded: u64,
    /// Fetches that failed
    pub failures: u64,
    /// Rate tokens granted
    pub rate_tokens: u64,
    /// Time spent waiting on the rate budget (ms)
    pub rate_waited_ms: u64,
    /// Cache counters
    pub cache: CacheStats,
}

/// Cached, rate-limited, retrying access to one source
pub struct SourceFetcher<P> {
    source: SourceKind,
    client: Arc<dyn SourceClient<P>>,
    limiter: SourceRateLimiter,
    cache: BoundedCache<P>,
    ttl: Duration,
    request_timeout: Duration,
    acquire_timeout: Duration,
    retry: RetryPolicy,
    fallback: Option<P>,
    counters: FetchCounters,
}

impl<P> SourceFetcher<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Build a fetcher
    ///
    /// `fallback` is returned as a PartialSuccess once transient retries are
    /// exhausted; pass None to fail instead.
    pub fn new(
        source: SourceKind,
        config: &SourceConfig,
        client: Arc<dyn SourceClient<P>>,
        fallback: Option<P>,
    ) -> PipelineResult<Self> {
        Ok(Self {
            source,
            client,
            limiter: SourceRateLimiter::new(source, config)?,
            cache: BoundedCache::new(config.cache_capacity),
            ttl: Duration::from_secs(config.cache_ttl_secs),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            retry: config.retry.clone(),
            fallback,
            counters: FetchCounters::default(),
        })
    }

    /// Source served by this fetcher
    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// The fetcher's cache
    pub fn cache(&self) -> &BoundedCache<P> {
        &self.cache
    }

    /// Fetch this source's payload for `record`
    pub async fn fetch(&self, record: &Record) -> FetchReport<P> {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let key = match LookupKey::for_source(self.source, record) {
            Ok(key) => key,
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %self.source,
                    record = %record.key,
                    error = %err,
                    "Cannot fetch: no usable lookup key"
                );
                return FetchReport {
                    outcome: Outcome::Failure(Failure::terminal(err.kind(), err.to_string())),
                    attempts: 0,
                    cache_hit: false,
                };
            }
        };

        if let Some(value) = self.cache.get(key.as_str()) {
            debug!(source = %self.source, key = %key, "Cache hit");
            return FetchReport {
                outcome: Outcome::Success(value),
                attempts: 0,
                cache_hit: true,
            };
        }

        let operation = format!("{} fetch", self.source);
        let retried = retry_with_backoff(
            &operation,
            &self.retry,
            SourceError::should_retry,
            SourceError::retry_after,
            |_attempt| self.call_once(&key),
        )
        .await;

        let attempts = retried.attempts;
        self.counters
            .retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);

        let outcome = match retried.result {
            Ok(value) => {
                self.cache.put(key.as_str(), value.clone(), self.ttl);
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                debug!(source = %self.source, key = %key, attempts, "Fetched from source");
                Outcome::Success(value)
            }
            Err(err) => self.classify_failure(&key, err, attempts),
        };

        FetchReport {
            outcome,
            attempts,
            cache_hit: false,
        }
    }

    /// One budgeted, time-bounded call
    async fn call_once(&self, key: &LookupKey) -> Result<P, SourceError> {
        if timeout(self.acquire_timeout, self.limiter.acquire())
            .await
            .is_err()
        {
            return Err(SourceError::BudgetWait(
                self.acquire_timeout.as_millis() as u64,
            ));
        }

        self.counters.external_calls.fetch_add(1, Ordering::Relaxed);

        match timeout(self.request_timeout, self.client.call(key)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }

    fn classify_failure(&self, key: &LookupKey, err: SourceError, attempts: u32) -> Outcome<P> {
        if let SourceError::BudgetWait(_) = err {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            warn!(source = %self.source, key = %key, error = %err, "Rate budget wait exceeded");
            return Outcome::Failure(Failure::retriable(ErrorKind::Transient, err.to_string()));
        }

        if err.should_retry() {
            if let Some(fallback) = &self.fallback {
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %self.source,
                    key = %key,
                    attempts,
                    error = %err,
                    "Source unavailable, using default payload"
                );
                return Outcome::PartialSuccess {
                    value: fallback.clone(),
                    reason: format!(
                        "{} unavailable after {} attempts ({}), default assumed",
                        self.source, attempts, err
                    ),
                };
            }
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            source = %self.source,
            key = %key,
            attempts,
            kind = %err.kind(),
            error = %err,
            "Fetch failed"
        );
        Outcome::Failure(Failure::terminal(
            err.kind(),
            format!("{} failed after {} attempts: {}", self.source, attempts, err),
        ))
    }

    /// Counter snapshot
    pub fn stats(&self) -> SourceStats {
        SourceStats {
            source: self.source,
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            external_calls: self.counters.external_calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rate_tokens: self.limiter.acquired(),
            rate_waited_ms: self.limiter.waited_ms(),
            cache: self.cache.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordFields;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted results, then succeeds with `value`
    struct Scripted {
        script: Mutex<VecDeque<Result<u32, SourceError>>>,
        value: u32,
        calls: AtomicU64,
    }

    impl Scripted {
        fn new(script: Vec<Result<u32, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                value: 7,
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceClient<u32> for Scripted {
        async fn call(&self, _key: &LookupKey) -> Result<u32, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(self.value))
        }
    }

    fn fast_config() -> SourceConfig {
        SourceConfig {
            requests_per_interval: 1_000,
            interval_ms: 1_000,
            burst: 1_000,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 40,
            },
            ..SourceConfig::default()
        }
    }

    fn record(domain: Option<&str>) -> Record {
        Record::new(
            0,
            RecordFields {
                company_name: Some("Acme".to_string()),
                domain: domain.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_success_is_cached() {
        let client = Scripted::new(vec![
            Err(SourceError::Timeout(100)),
            Err(SourceError::Timeout(100)),
        ]);
        let fetcher =
            SourceFetcher::new(SourceKind::Performance, &fast_config(), client.clone(), None)
                .unwrap();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        assert_eq!(report.outcome, Outcome::Success(7));
        assert_eq!(report.attempts, 3);
        assert_eq!(fetcher.cache().len(), 1);

        let again = fetcher.fetch(&record(Some("acme.com"))).await;
        assert!(again.cache_hit);
        assert_eq!(again.attempts, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let stats = fetcher.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.external_calls, 3);
        assert_eq!(stats.cache.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_hint_is_capped_by_policy() {
        let client = Scripted::new(vec![Err(SourceError::Throttled {
            retry_after: Some(Duration::from_secs(86_400)),
        })]);
        let fetcher =
            SourceFetcher::new(SourceKind::TechStack, &fast_config(), client.clone(), None)
                .unwrap();
        let start = tokio::time::Instant::now();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        assert_eq!(report.outcome, Outcome::Success(7));
        assert_eq!(report.attempts, 2);
        // fast_config caps any single delay at 40ms
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried_or_cached() {
        let client = Scripted::new(vec![Err(SourceError::NotFound("acme.com".into()))]);
        let fetcher =
            SourceFetcher::new(SourceKind::TechStack, &fast_config(), client.clone(), Some(0))
                .unwrap();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Permanent);
        assert!(!failure.retriable);
        assert_eq!(report.attempts, 1);
        assert!(fetcher.cache().is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_uses_fallback() {
        let client = Scripted::new(vec![
            Err(SourceError::Unavailable("503".into())),
            Err(SourceError::Unavailable("503".into())),
            Err(SourceError::Unavailable("503".into())),
        ]);
        let fetcher = SourceFetcher::new(
            SourceKind::AdIntelligence,
            &fast_config(),
            client.clone(),
            Some(0),
        )
        .unwrap();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        match report.outcome {
            Outcome::PartialSuccess { value, reason } => {
                assert_eq!(value, 0);
                assert!(reason.contains("default assumed"));
            }
            other => panic!("expected partial success, got {:?}", other),
        }
        assert!(fetcher.cache().is_empty(), "defaults are never cached");
        assert_eq!(fetcher.stats().degraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_without_fallback_fails_terminally() {
        let client = Scripted::new(vec![
            Err(SourceError::Timeout(100)),
            Err(SourceError::Timeout(100)),
            Err(SourceError::Timeout(100)),
        ]);
        let fetcher =
            SourceFetcher::new(SourceKind::Registry, &fast_config(), client, None).unwrap();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        let failure = report.outcome.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Transient);
        assert!(!failure.retriable);
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_key_makes_no_call() {
        let client = Scripted::new(vec![]);
        let fetcher =
            SourceFetcher::new(SourceKind::Performance, &fast_config(), client.clone(), None)
                .unwrap();

        let report = fetcher.fetch(&record(None)).await;
        assert_eq!(report.attempts, 0);
        assert_eq!(
            report.outcome.failure().map(|f| f.kind),
            Some(ErrorKind::Permanent)
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        struct Slow;

        #[async_trait]
        impl SourceClient<u32> for Slow {
            async fn call(&self, _key: &LookupKey) -> Result<u32, SourceError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            }
        }

        let config = SourceConfig {
            request_timeout_ms: 50,
            ..fast_config()
        };
        let fetcher =
            SourceFetcher::new(SourceKind::Performance, &config, Arc::new(Slow), None).unwrap();

        let report = fetcher.fetch(&record(Some("acme.com"))).await;
        assert_eq!(report.attempts, 3);
        assert!(report
            .outcome
            .failure()
            .map(|f| f.message.contains("timed out"))
            .unwrap_or(false));
    }
}
