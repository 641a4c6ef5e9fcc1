//! The four source fetchers, built together and fetched together
//!
//! Stages declare which sources they depend on; the runner fetches exactly
//! those, concurrently, before evaluating the stage.

use super::{FetchReport, SourceFetcher, SourceStats};
use crate::config::{PipelineConfig, SourceConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::sources::http::{HttpSourceClient, HttpSourceSettings};
use crate::sources::{
    AdSignals, PerformanceMetrics, RegistrySignals, SourceClient, TechSignals,
};
use crate::types::{Record, SourceKind};
use prospector_common::config::{resolve_api_key, TomlConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Default User-Agent when the config file sets none
const DEFAULT_USER_AGENT: &str = concat!("Prospector/", env!("CARGO_PKG_VERSION"));

/// Transport for each source
#[derive(Clone)]
pub struct SourceClients {
    /// Web-performance source
    pub performance: Arc<dyn SourceClient<PerformanceMetrics>>,
    /// Technology-stack source
    pub tech_stack: Arc<dyn SourceClient<TechSignals>>,
    /// Ad-intelligence source
    pub ad_intelligence: Arc<dyn SourceClient<AdSignals>>,
    /// Company registry source
    pub registry: Arc<dyn SourceClient<RegistrySignals>>,
}

impl SourceClients {
    /// HTTP transports for every source
    ///
    /// Fails with a configuration error when a source has no endpoint or
    /// requires an API key that cannot be resolved.
    pub fn http(config: &PipelineConfig, toml_config: &TomlConfig) -> PipelineResult<Self> {
        let user_agent = toml_config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Ok(Self {
            performance: Arc::new(http_client::<PerformanceMetrics>(
                SourceKind::Performance,
                &config.sources.performance,
                toml_config,
                &user_agent,
            )?),
            tech_stack: Arc::new(http_client::<TechSignals>(
                SourceKind::TechStack,
                &config.sources.tech_stack,
                toml_config,
                &user_agent,
            )?),
            ad_intelligence: Arc::new(http_client::<AdSignals>(
                SourceKind::AdIntelligence,
                &config.sources.ad_intelligence,
                toml_config,
                &user_agent,
            )?),
            registry: Arc::new(http_client::<RegistrySignals>(
                SourceKind::Registry,
                &config.sources.registry,
                toml_config,
                &user_agent,
            )?),
        })
    }
}

fn http_client<P>(
    source: SourceKind,
    config: &SourceConfig,
    toml_config: &TomlConfig,
    user_agent: &str,
) -> PipelineResult<HttpSourceClient<P>> {
    let endpoint = config.endpoint.clone().ok_or_else(|| {
        PipelineError::Configuration(format!(
            "no endpoint configured for source '{}' (set [pipeline.sources.{}].endpoint)",
            source,
            source.as_str().replace('-', "_")
        ))
    })?;

    let api_key = resolve_api_key(source.as_str(), toml_config);
    if config.requires_api_key && api_key.is_none() {
        return Err(PipelineError::Configuration(format!(
            "source '{}' requires an API key: set {} or [api_keys].{}",
            source,
            prospector_common::config::api_key_env_var(source.as_str()),
            source
        )));
    }

    info!(
        source = %source,
        endpoint = %endpoint,
        api_key = api_key.is_some(),
        "Configured HTTP source"
    );

    HttpSourceClient::new(HttpSourceSettings {
        source,
        endpoint,
        key_param: config.key_param.clone(),
        api_key_param: config.api_key_param.clone(),
        api_key,
        user_agent: user_agent.to_string(),
        timeout: Duration::from_millis(config.request_timeout_ms),
    })
}

/// Source fetches made for one stage evaluation
///
/// A field is None when the stage does not depend on that source.
#[derive(Debug, Clone, Default)]
pub struct FetchedSources {
    /// Web-performance fetch
    pub performance: Option<FetchReport<PerformanceMetrics>>,
    /// Technology-stack fetch
    pub tech_stack: Option<FetchReport<TechSignals>>,
    /// Ad-intelligence fetch
    pub ad_intelligence: Option<FetchReport<AdSignals>>,
    /// Company registry fetch
    pub registry: Option<FetchReport<RegistrySignals>>,
}

impl FetchedSources {
    /// Total call attempts across the fetches
    pub fn attempts(&self) -> u32 {
        self.performance.as_ref().map_or(0, |r| r.attempts)
            + self.tech_stack.as_ref().map_or(0, |r| r.attempts)
            + self.ad_intelligence.as_ref().map_or(0, |r| r.attempts)
            + self.registry.as_ref().map_or(0, |r| r.attempts)
    }
}

/// All four fetchers, shared by every record in a batch
pub struct SourceFetchers {
    /// Web-performance fetcher
    pub performance: SourceFetcher<PerformanceMetrics>,
    /// Technology-stack fetcher
    pub tech_stack: SourceFetcher<TechSignals>,
    /// Ad-intelligence fetcher
    pub ad_intelligence: SourceFetcher<AdSignals>,
    /// Company registry fetcher
    pub registry: SourceFetcher<RegistrySignals>,
}

impl SourceFetchers {
    /// Build fetchers with their caches and rate budgets
    ///
    /// Sources with `fallback_on_exhaustion` degrade to an empty payload
    /// (scored as unknown) after transient retries run out.
    pub fn new(config: &PipelineConfig, clients: SourceClients) -> PipelineResult<Self> {
        let sources = &config.sources;
        let fallback = |cfg: &SourceConfig| cfg.fallback_on_exhaustion;

        Ok(Self {
            performance: SourceFetcher::new(
                SourceKind::Performance,
                &sources.performance,
                clients.performance,
                fallback(&sources.performance).then(PerformanceMetrics::default),
            )?,
            tech_stack: SourceFetcher::new(
                SourceKind::TechStack,
                &sources.tech_stack,
                clients.tech_stack,
                fallback(&sources.tech_stack).then(TechSignals::default),
            )?,
            ad_intelligence: SourceFetcher::new(
                SourceKind::AdIntelligence,
                &sources.ad_intelligence,
                clients.ad_intelligence,
                fallback(&sources.ad_intelligence).then(AdSignals::default),
            )?,
            registry: SourceFetcher::new(
                SourceKind::Registry,
                &sources.registry,
                clients.registry,
                fallback(&sources.registry).then(RegistrySignals::default),
            )?,
        })
    }

    /// Fetch the listed sources for a record, concurrently
    pub async fn fetch_for(&self, sources: &[SourceKind], record: &Record) -> FetchedSources {
        let wants = |kind: SourceKind| sources.contains(&kind);

        let (performance, tech_stack, ad_intelligence, registry) = tokio::join!(
            fetch_if(wants(SourceKind::Performance), &self.performance, record),
            fetch_if(wants(SourceKind::TechStack), &self.tech_stack, record),
            fetch_if(wants(SourceKind::AdIntelligence), &self.ad_intelligence, record),
            fetch_if(wants(SourceKind::Registry), &self.registry, record),
        );

        FetchedSources {
            performance,
            tech_stack,
            ad_intelligence,
            registry,
        }
    }

    /// Counters for every source, in fixed order
    pub fn stats(&self) -> Vec<SourceStats> {
        vec![
            self.performance.stats(),
            self.tech_stack.stats(),
            self.ad_intelligence.stats(),
            self.registry.stats(),
        ]
    }
}

async fn fetch_if<P>(
    wanted: bool,
    fetcher: &SourceFetcher<P>,
    record: &Record,
) -> Option<FetchReport<P>>
where
    P: Clone + Send + Sync + 'static,
{
    if wanted {
        Some(fetcher.fetch(record).await)
    } else {
        None
    }
}
