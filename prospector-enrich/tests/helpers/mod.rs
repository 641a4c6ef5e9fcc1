//! Shared helpers for prospector-enrich integration tests
//!
//! Scripted in-memory sources and record builders. Budgets in
//! [`test_config`] are large enough that the rate limiter never waits, so
//! tests can run with tokio's paused clock.

#![allow(dead_code)]

use async_trait::async_trait;
use prospector_enrich::config::PipelineConfig;
use prospector_enrich::fetchers::retry::RetryPolicy;
use prospector_enrich::sources::{
    AdSignals, LookupKey, PerformanceMetrics, RegistrySignals, RegistryStatus, SourceClient,
    SourceError, TechSignals,
};
use prospector_enrich::{RecordFields, SourceClients};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder<P> = Box<dyn Fn(&LookupKey) -> P + Send + Sync>;

/// In-memory source with per-key scripting
///
/// Resolution order per call: panic keys, fixed per-key answers, the next
/// scripted answer for the key, then the default responder.
pub struct MockSource<P> {
    respond: Responder<P>,
    fixed: HashMap<String, Result<P, SourceError>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<P, SourceError>>>>,
    panic_on: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicU64,
    log: Mutex<Vec<(String, std::time::Instant)>>,
}

impl<P: Clone + Send + Sync + 'static> MockSource<P> {
    pub fn new(respond: impl Fn(&LookupKey) -> P + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            fixed: HashMap::new(),
            scripts: Mutex::new(HashMap::new()),
            panic_on: HashSet::new(),
            delay: None,
            calls: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `key` with `value`
    pub fn respond_with(mut self, key: &str, value: P) -> Self {
        self.fixed.insert(key.to_string(), Ok(value));
        self
    }

    /// Always fail `key` with `error`
    pub fn fail(mut self, key: &str, error: SourceError) -> Self {
        self.fixed.insert(key.to_string(), Err(error));
        self
    }

    /// Replay `script` for `key`, then fall back to the default responder
    pub fn script(self, key: &str, script: Vec<Result<P, SourceError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), script.into());
        self
    }

    /// Panic when `key` is requested
    pub fn panic_on(mut self, key: &str) -> Self {
        self.panic_on.insert(key.to_string());
        self
    }

    /// Sleep before answering
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Calls received
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls received for one key
    pub fn calls_for(&self, key: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .count()
    }

    /// Wall-clock instants of every call, in arrival order
    pub fn call_times(&self) -> Vec<std::time::Instant> {
        self.log.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl<P: Clone + Send + Sync + 'static> SourceClient<P> for MockSource<P> {
    async fn call(&self, key: &LookupKey) -> Result<P, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push((key.as_str().to_string(), std::time::Instant::now()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on.contains(key.as_str()) {
            panic!("mock source blew up on {}", key);
        }
        if let Some(answer) = self.fixed.get(key.as_str()) {
            return answer.clone();
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key.as_str())
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok((self.respond)(key)))
    }
}

/// Slow-ish site: every metric between good and poor or worse
pub fn slow_site() -> PerformanceMetrics {
    PerformanceMetrics {
        lcp_ms: Some(4_200.0),
        fcp_ms: Some(2_500.0),
        tbt_ms: Some(450.0),
        cls: Some(0.2),
        ttfb_ms: Some(1_200.0),
        overall_score: None,
    }
}

/// Site with every metric rated good
pub fn fast_site() -> PerformanceMetrics {
    PerformanceMetrics {
        lcp_ms: Some(1_200.0),
        fcp_ms: Some(900.0),
        tbt_ms: Some(50.0),
        cls: Some(0.01),
        ttfb_ms: Some(200.0),
        overall_score: None,
    }
}

/// Small business site missing analytics and a mobile layout
pub fn basic_stack() -> TechSignals {
    TechSignals {
        technologies: vec!["wordpress".to_string(), "jquery".to_string()],
        cms: Some("WordPress".to_string()),
        ecommerce_platform: None,
        has_analytics: Some(false),
        has_ssl: Some(true),
        mobile_friendly: Some(false),
        employee_estimate: Some(20),
        revenue_estimate: None,
        industry: Some("Home Services".to_string()),
    }
}

/// Site with every feature present
pub fn complete_stack() -> TechSignals {
    TechSignals {
        has_analytics: Some(true),
        has_ssl: Some(true),
        mobile_friendly: Some(true),
        ..basic_stack()
    }
}

pub fn running_ads() -> AdSignals {
    AdSignals {
        active: true,
        platforms: vec!["google".to_string()],
        ad_count: 4,
        estimated_monthly_spend: Some(1_500.0),
    }
}

pub fn no_ads() -> AdSignals {
    AdSignals::default()
}

/// Registry entry echoing the looked-up name, so names always match
pub fn registry_entry(key: &LookupKey) -> RegistrySignals {
    let name = key.as_str().split('|').next().unwrap_or_default().to_string();
    RegistrySignals {
        registered_name: Some(name),
        registration_number: Some("01234567".to_string()),
        status: RegistryStatus::Active,
        incorporation_year: Some(2012),
        employee_count: Some(20),
        industry: None,
    }
}

pub fn performance_source() -> MockSource<PerformanceMetrics> {
    MockSource::new(|_| slow_site())
}

pub fn tech_source() -> MockSource<TechSignals> {
    MockSource::new(|_| basic_stack())
}

pub fn ads_source() -> MockSource<AdSignals> {
    MockSource::new(|_| running_ads())
}

pub fn registry_source() -> MockSource<RegistrySignals> {
    MockSource::new(registry_entry)
}

/// The four mock sources behind one pipeline
pub struct Mocks {
    pub performance: Arc<MockSource<PerformanceMetrics>>,
    pub tech_stack: Arc<MockSource<TechSignals>>,
    pub ad_intelligence: Arc<MockSource<AdSignals>>,
    pub registry: Arc<MockSource<RegistrySignals>>,
}

impl Mocks {
    /// Every source answers with its default payload
    pub fn healthy() -> Self {
        Self {
            performance: performance_source().build(),
            tech_stack: tech_source().build(),
            ad_intelligence: ads_source().build(),
            registry: registry_source().build(),
        }
    }

    pub fn clients(&self) -> SourceClients {
        SourceClients {
            performance: self.performance.clone(),
            tech_stack: self.tech_stack.clone(),
            ad_intelligence: self.ad_intelligence.clone(),
            registry: self.registry.clone(),
        }
    }

    /// Calls across all four sources
    pub fn total_calls(&self) -> u64 {
        self.performance.calls()
            + self.tech_stack.calls()
            + self.ad_intelligence.calls()
            + self.registry.calls()
    }
}

/// Configuration with short delays and budgets that never bind
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.batch.group_size = 3;
    config.batch.max_concurrency = 3;
    config.batch.pacing_delay_ms = 50;
    config.batch.stage_attempts = 2;
    config.batch.top_k = 10;
    config.priority.reference_year = Some(2026);

    for source in [
        &mut config.sources.performance,
        &mut config.sources.tech_stack,
        &mut config.sources.ad_intelligence,
        &mut config.sources.registry,
    ] {
        source.requests_per_interval = 10_000;
        source.interval_ms = 1_000;
        source.burst = 10_000;
        source.request_timeout_ms = 1_000;
        source.acquire_timeout_ms = 1_000;
        source.retry = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 40,
        };
    }
    config
}

/// Prospect with a domain, location and contacts
pub fn prospect(name: &str, domain: &str) -> RecordFields {
    RecordFields {
        company_name: Some(name.to_string()),
        domain: Some(domain.to_string()),
        city: Some("Leeds".to_string()),
        country: Some("UK".to_string()),
        industry: Some("Home Services".to_string()),
        employee_count: Some(20),
        contact_name: Some("Sam Carter".to_string()),
        contact_email: Some(format!("hello@{}", domain)),
        contact_phone: Some("+44 113 496 0000".to_string()),
        ..Default::default()
    }
}

/// `count` prospects on distinct domains (`p0.com`, `p1.com`, ...)
pub fn prospects(count: usize) -> Vec<RecordFields> {
    (0..count)
        .map(|i| prospect(&format!("Prospect {}", i), &format!("p{}.com", i)))
        .collect()
}
