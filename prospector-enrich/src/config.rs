//! Pipeline configuration
//!
//! Every numeric policy value the stages use lives here, with a default, and
//! can be overridden from the `[pipeline]` table of the TOML config file.
//! [`PipelineConfig::validate`] rejects inconsistent settings before any
//! record is processed.
//!
//! ```toml
//! [pipeline.batch]
//! group_size = 10
//! max_concurrency = 5
//!
//! [pipeline.sources.performance]
//! endpoint = "https://perf.internal.example/v1/metrics"
//! requests_per_interval = 60
//! interval_ms = 60000
//!
//! [pipeline.qualification.weights]
//! financial = 0.35
//! technology = 0.15
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::fetchers::retry::RetryPolicy;
use crate::stages::financial_leak::SizeTier;
use crate::types::SourceKind;
use prospector_common::config::TomlConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance for weight sums
const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

// ============================================================================
// Top level
// ============================================================================

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Grouping, concurrency and pacing
    pub batch: BatchConfig,
    /// Per-source budgets, caches and transports
    pub sources: SourcesConfig,
    /// Performance scoring bands
    pub performance: PerformanceConfig,
    /// Enrichment merge confidences
    pub enrichment: EnrichmentConfig,
    /// Financial-leak model
    pub leak: LeakConfig,
    /// Qualification weights and tiers
    pub qualification: QualificationConfig,
    /// Priority multipliers
    pub priority: PriorityConfig,
}

impl PipelineConfig {
    /// Parse the `[pipeline]` table and validate it
    ///
    /// The table is layered over the defaults, so a partial source table
    /// keeps that source's own defaults rather than the generic ones.
    pub fn from_toml_config(toml_config: &TomlConfig) -> PipelineResult<Self> {
        let invalid =
            |e: String| PipelineError::Configuration(format!("invalid [pipeline] section: {}", e));

        let mut layered = match toml::Value::try_from(PipelineConfig::default()) {
            Ok(toml::Value::Table(table)) => table,
            Ok(_) => toml::Table::new(),
            Err(e) => return Err(invalid(e.to_string())),
        };
        merge_tables(&mut layered, &toml_config.pipeline);

        let config: PipelineConfig = toml::Value::Table(layered)
            .try_into()
            .map_err(|e: toml::de::Error| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting, reporting all problems at once
    pub fn validate(&self) -> PipelineResult<()> {
        let mut problems = Vec::new();

        self.batch.check(&mut problems);
        for source in SourceKind::ALL {
            self.sources.get(source).check(source, &mut problems);
        }
        self.performance.check(&mut problems);
        self.enrichment.check(&mut problems);
        self.leak.check(&mut problems);
        self.qualification.check(&mut problems);
        self.priority.check(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(problems.join("; ")))
        }
    }
}

/// Overlay `overrides` onto `base`, descending into nested tables
fn merge_tables(base: &mut toml::Table, overrides: &toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested)
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn check_unit(problems: &mut Vec<String>, name: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        problems.push(format!("{} must be within [0, 1], got {}", name, value));
    }
}

fn check_non_negative(problems: &mut Vec<String>, name: &str, value: f64) {
    if !(value >= 0.0 && value.is_finite()) {
        problems.push(format!("{} must be a non-negative number, got {}", name, value));
    }
}

fn check_positive(problems: &mut Vec<String>, name: &str, value: u64) {
    if value == 0 {
        problems.push(format!("{} must be at least 1", name));
    }
}

// ============================================================================
// Batch
// ============================================================================

/// Grouping, concurrency and pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Records per group
    pub group_size: usize,
    /// Records in flight at once (effective bound is min(this, group_size))
    pub max_concurrency: usize,
    /// Pause between groups (ms)
    pub pacing_delay_ms: u64,
    /// Times a stage is evaluated when it fails retriably
    pub stage_attempts: u32,
    /// Length of the ranked prospect list
    pub top_k: usize,
    /// Event bus capacity
    pub event_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            group_size: 10,
            max_concurrency: 10,
            pacing_delay_ms: 1_000,
            stage_attempts: 2,
            top_k: 25,
            event_capacity: 256,
        }
    }
}

impl BatchConfig {
    /// Concurrency bound actually applied within a group
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency.min(self.group_size).max(1)
    }

    fn check(&self, problems: &mut Vec<String>) {
        check_positive(problems, "batch.group_size", self.group_size as u64);
        check_positive(problems, "batch.max_concurrency", self.max_concurrency as u64);
        check_positive(problems, "batch.stage_attempts", self.stage_attempts as u64);
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Settings for all four sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Web-performance source
    pub performance: SourceConfig,
    /// Technology-stack source
    pub tech_stack: SourceConfig,
    /// Ad-intelligence source
    pub ad_intelligence: SourceConfig,
    /// Company registry source
    pub registry: SourceConfig,
}

impl SourcesConfig {
    /// Settings for one source
    pub fn get(&self, source: SourceKind) -> &SourceConfig {
        match source {
            SourceKind::Performance => &self.performance,
            SourceKind::TechStack => &self.tech_stack,
            SourceKind::AdIntelligence => &self.ad_intelligence,
            SourceKind::Registry => &self.registry,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            performance: SourceConfig {
                requests_per_interval: 60,
                cache_ttl_secs: 24 * 3600,
                ..SourceConfig::default()
            },
            tech_stack: SourceConfig {
                requests_per_interval: 100,
                cache_ttl_secs: 7 * 24 * 3600,
                ..SourceConfig::default()
            },
            ad_intelligence: SourceConfig {
                requests_per_interval: 30,
                cache_capacity: 500,
                cache_ttl_secs: 24 * 3600,
                ..SourceConfig::default()
            },
            registry: SourceConfig {
                requests_per_interval: 120,
                cache_capacity: 500,
                cache_ttl_secs: 30 * 24 * 3600,
                fallback_on_exhaustion: false,
                ..SourceConfig::default()
            },
        }
    }
}

/// Budget, cache, retry and transport settings for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the source (required for HTTP transport)
    pub endpoint: Option<String>,
    /// Query parameter carrying the lookup key
    pub key_param: String,
    /// Query parameter carrying the API key
    pub api_key_param: String,
    /// Refuse to start without a resolved API key
    pub requires_api_key: bool,
    /// Tokens granted per interval
    pub requests_per_interval: u32,
    /// Interval length (ms)
    pub interval_ms: u64,
    /// Tokens that may be taken at once
    ///
    /// With `burst = 1` no window of one interval sees more than
    /// `requests_per_interval` calls. Larger bursts allow up to
    /// `burst - 1` extra calls in a window.
    pub burst: u32,
    /// Maximum cached entries
    pub cache_capacity: usize,
    /// Cache entry time-to-live (seconds)
    pub cache_ttl_secs: u64,
    /// Deadline for one external call (ms)
    pub request_timeout_ms: u64,
    /// Deadline for waiting on the rate budget (ms)
    pub acquire_timeout_ms: u64,
    /// Backoff for transient failures
    pub retry: RetryPolicy,
    /// Substitute the source's default payload once transient retries are exhausted
    pub fallback_on_exhaustion: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key_param: "q".to_string(),
            api_key_param: "key".to_string(),
            requires_api_key: false,
            requests_per_interval: 60,
            interval_ms: 60_000,
            burst: 1,
            cache_capacity: 1_000,
            cache_ttl_secs: 24 * 3600,
            request_timeout_ms: 10_000,
            acquire_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            fallback_on_exhaustion: true,
        }
    }
}

impl SourceConfig {
    fn check(&self, source: SourceKind, problems: &mut Vec<String>) {
        let field = |name: &str| format!("sources.{}.{}", source, name);
        check_positive(
            problems,
            &field("requests_per_interval"),
            self.requests_per_interval as u64,
        );
        check_positive(problems, &field("interval_ms"), self.interval_ms);
        check_positive(problems, &field("burst"), self.burst as u64);
        check_positive(problems, &field("cache_capacity"), self.cache_capacity as u64);
        check_positive(problems, &field("cache_ttl_secs"), self.cache_ttl_secs);
        check_positive(problems, &field("request_timeout_ms"), self.request_timeout_ms);
        check_positive(problems, &field("acquire_timeout_ms"), self.acquire_timeout_ms);
        check_positive(
            problems,
            &field("retry.max_attempts"),
            self.retry.max_attempts as u64,
        );
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            problems.push(format!(
                "{} ({}) exceeds {} ({})",
                field("retry.base_delay_ms"),
                self.retry.base_delay_ms,
                field("retry.max_delay_ms"),
                self.retry.max_delay_ms
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                problems.push(format!(
                    "{} must be an http(s) URL, got '{}'",
                    field("endpoint"),
                    endpoint
                ));
            }
        }
    }
}

// ============================================================================
// Performance
// ============================================================================

/// Good / poor thresholds and weight for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBand {
    /// At or below this the metric scores 100
    pub good: f64,
    /// At this the metric scores 50; at twice this it scores 0
    pub poor: f64,
    /// Weight in the overall score
    pub weight: f64,
}

/// Performance scoring bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Largest Contentful Paint (ms)
    pub lcp: MetricBand,
    /// First Contentful Paint (ms)
    pub fcp: MetricBand,
    /// Total Blocking Time (ms)
    pub tbt: MetricBand,
    /// Cumulative Layout Shift
    pub cls: MetricBand,
    /// Time To First Byte (ms)
    pub ttfb: MetricBand,
    /// Minimum score rated "good"
    pub good_rating_min: f64,
    /// Scores below this are rated "poor"
    pub poor_rating_below: f64,
    /// Score used when no measurement is available
    pub assumed_score: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            lcp: MetricBand { good: 2_500.0, poor: 4_000.0, weight: 0.30 },
            fcp: MetricBand { good: 1_800.0, poor: 3_000.0, weight: 0.15 },
            tbt: MetricBand { good: 200.0, poor: 600.0, weight: 0.30 },
            cls: MetricBand { good: 0.1, poor: 0.25, weight: 0.15 },
            ttfb: MetricBand { good: 800.0, poor: 1_800.0, weight: 0.10 },
            good_rating_min: 75.0,
            poor_rating_below: 50.0,
            assumed_score: 50.0,
        }
    }
}

impl PerformanceConfig {
    fn check(&self, problems: &mut Vec<String>) {
        let bands = [
            ("lcp", self.lcp),
            ("fcp", self.fcp),
            ("tbt", self.tbt),
            ("cls", self.cls),
            ("ttfb", self.ttfb),
        ];
        for (name, band) in bands {
            if !(band.good >= 0.0 && band.good < band.poor) {
                problems.push(format!(
                    "performance.{}: good ({}) must be non-negative and below poor ({})",
                    name, band.good, band.poor
                ));
            }
            check_non_negative(problems, &format!("performance.{}.weight", name), band.weight);
        }
        if bands.iter().map(|(_, b)| b.weight).sum::<f64>() <= 0.0 {
            problems.push("performance metric weights must not all be zero".to_string());
        }
        if !(0.0..=100.0).contains(&self.assumed_score) {
            problems.push(format!(
                "performance.assumed_score must be within [0, 100], got {}",
                self.assumed_score
            ));
        }
        if self.poor_rating_below > self.good_rating_min {
            problems.push(format!(
                "performance.poor_rating_below ({}) exceeds good_rating_min ({})",
                self.poor_rating_below, self.good_rating_min
            ));
        }
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Per-field weights for confidence-weighted completeness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessWeights {
    /// Company name
    pub company_name: f64,
    /// Industry
    pub industry: f64,
    /// Employee count
    pub employee_count: f64,
    /// Annual revenue
    pub annual_revenue: f64,
    /// Technology list
    pub technologies: f64,
    /// Ad activity
    pub ad_activity: f64,
    /// Registry status
    pub registry_status: f64,
    /// City / region / country
    pub location: f64,
    /// Contact email or phone
    pub contact: f64,
}

impl Default for CompletenessWeights {
    fn default() -> Self {
        Self {
            company_name: 1.0,
            industry: 1.0,
            employee_count: 1.0,
            annual_revenue: 0.5,
            technologies: 1.0,
            ad_activity: 0.5,
            registry_status: 1.0,
            location: 0.5,
            contact: 1.0,
        }
    }
}

impl CompletenessWeights {
    /// (field name, weight) pairs in fixed order
    pub fn entries(&self) -> [(&'static str, f64); 9] {
        [
            ("company_name", self.company_name),
            ("industry", self.industry),
            ("employee_count", self.employee_count),
            ("annual_revenue", self.annual_revenue),
            ("technologies", self.technologies),
            ("ad_activity", self.ad_activity),
            ("registry_status", self.registry_status),
            ("location", self.location),
            ("contact", self.contact),
        ]
    }
}

/// Enrichment merge settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Confidence of values supplied in the input record
    pub input_confidence: f64,
    /// Confidence of tech-stack source values
    pub tech_confidence: f64,
    /// Confidence of ad-intelligence source values
    pub ads_confidence: f64,
    /// Confidence of registry source values
    pub registry_confidence: f64,
    /// Jaro-Winkler similarity below which a registry match is suspect
    pub name_match_threshold: f64,
    /// Completeness weights
    pub completeness_weights: CompletenessWeights,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            input_confidence: 0.6,
            tech_confidence: 0.7,
            ads_confidence: 0.8,
            registry_confidence: 0.95,
            name_match_threshold: 0.85,
            completeness_weights: CompletenessWeights::default(),
        }
    }
}

impl EnrichmentConfig {
    fn check(&self, problems: &mut Vec<String>) {
        check_unit(problems, "enrichment.input_confidence", self.input_confidence);
        check_unit(problems, "enrichment.tech_confidence", self.tech_confidence);
        check_unit(problems, "enrichment.ads_confidence", self.ads_confidence);
        check_unit(problems, "enrichment.registry_confidence", self.registry_confidence);
        check_unit(problems, "enrichment.name_match_threshold", self.name_match_threshold);
        let entries = self.completeness_weights.entries();
        for (name, weight) in entries {
            check_non_negative(
                problems,
                &format!("enrichment.completeness_weights.{}", name),
                weight,
            );
        }
        if entries.iter().map(|(_, w)| w).sum::<f64>() <= 0.0 {
            problems.push("enrichment completeness weights must not all be zero".to_string());
        }
    }
}

// ============================================================================
// Financial leak
// ============================================================================

/// Employee-count upper bounds for size tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeTierBounds {
    /// Largest micro business
    pub micro_max: u32,
    /// Largest small business
    pub small_max: u32,
    /// Largest medium business
    pub medium_max: u32,
}

impl Default for SizeTierBounds {
    fn default() -> Self {
        Self {
            micro_max: 9,
            small_max: 49,
            medium_max: 249,
        }
    }
}

/// Assumed monthly revenue per size tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierRevenue {
    /// Micro business
    pub micro: f64,
    /// Small business
    pub small: f64,
    /// Medium business
    pub medium: f64,
    /// Large business
    pub large: f64,
    /// Size unknown
    pub unknown: f64,
}

impl Default for TierRevenue {
    fn default() -> Self {
        Self {
            micro: 20_000.0,
            small: 100_000.0,
            medium: 750_000.0,
            large: 4_000_000.0,
            unknown: 50_000.0,
        }
    }
}

impl TierRevenue {
    /// Monthly revenue basis for a tier
    pub fn for_tier(&self, tier: SizeTier) -> f64 {
        match tier {
            SizeTier::Micro => self.micro,
            SizeTier::Small => self.small,
            SizeTier::Medium => self.medium,
            SizeTier::Large => self.large,
            SizeTier::Unknown => self.unknown,
        }
    }
}

/// Financial-leak model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakConfig {
    /// Skip qualification and priority when the opportunity is below minimum
    pub gate_enabled: bool,
    /// Minimum monthly opportunity to continue
    pub min_monthly_opportunity: f64,
    /// Share of revenue that flows through the website
    pub online_revenue_share: f64,
    /// Online revenue lost at a performance score of 0
    pub max_performance_loss_rate: f64,
    /// Online revenue lost without analytics
    pub analytics_gap_rate: f64,
    /// Online revenue lost without TLS
    pub ssl_gap_rate: f64,
    /// Online revenue lost without a mobile-friendly layout
    pub mobile_gap_rate: f64,
    /// Share of ad spend wasted at a performance score of 0
    pub ad_waste_factor: f64,
    /// Size tier bounds
    pub size_tiers: SizeTierBounds,
    /// Revenue basis per tier
    pub monthly_revenue: TierRevenue,
}

impl Default for LeakConfig {
    fn default() -> Self {
        Self {
            gate_enabled: true,
            min_monthly_opportunity: 500.0,
            online_revenue_share: 0.3,
            max_performance_loss_rate: 0.2,
            analytics_gap_rate: 0.02,
            ssl_gap_rate: 0.03,
            mobile_gap_rate: 0.05,
            ad_waste_factor: 0.5,
            size_tiers: SizeTierBounds::default(),
            monthly_revenue: TierRevenue::default(),
        }
    }
}

impl LeakConfig {
    fn check(&self, problems: &mut Vec<String>) {
        check_non_negative(problems, "leak.min_monthly_opportunity", self.min_monthly_opportunity);
        check_unit(problems, "leak.online_revenue_share", self.online_revenue_share);
        check_unit(problems, "leak.max_performance_loss_rate", self.max_performance_loss_rate);
        check_unit(problems, "leak.analytics_gap_rate", self.analytics_gap_rate);
        check_unit(problems, "leak.ssl_gap_rate", self.ssl_gap_rate);
        check_unit(problems, "leak.mobile_gap_rate", self.mobile_gap_rate);
        check_unit(problems, "leak.ad_waste_factor", self.ad_waste_factor);

        let b = &self.size_tiers;
        if !(b.micro_max < b.small_max && b.small_max < b.medium_max) {
            problems.push(format!(
                "leak.size_tiers must be strictly ascending, got {}/{}/{}",
                b.micro_max, b.small_max, b.medium_max
            ));
        }

        let r = &self.monthly_revenue;
        for (name, value) in [
            ("micro", r.micro),
            ("small", r.small),
            ("medium", r.medium),
            ("large", r.large),
            ("unknown", r.unknown),
        ] {
            check_non_negative(problems, &format!("leak.monthly_revenue.{}", name), value);
        }
    }
}

// ============================================================================
// Qualification
// ============================================================================

/// Sub-score weights (must sum to 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationWeights {
    /// Industry and size fit
    pub segment_fit: f64,
    /// Opportunity size
    pub financial: f64,
    /// Technology / performance need
    pub technology: f64,
    /// Contactability
    pub contact: f64,
    /// Data completeness and registry standing
    pub company_profile: f64,
}

impl Default for QualificationWeights {
    fn default() -> Self {
        Self {
            segment_fit: 0.25,
            financial: 0.30,
            technology: 0.20,
            contact: 0.15,
            company_profile: 0.10,
        }
    }
}

impl QualificationWeights {
    /// Sum of all weights
    pub fn total(&self) -> f64 {
        self.segment_fit + self.financial + self.technology + self.contact + self.company_profile
    }
}

/// Minimum scores for tiers 1-3; anything lower is tier 4
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCutPoints {
    /// Tier 1 minimum
    pub tier1: f64,
    /// Tier 2 minimum
    pub tier2: f64,
    /// Tier 3 minimum
    pub tier3: f64,
}

impl Default for TierCutPoints {
    fn default() -> Self {
        Self {
            tier1: 80.0,
            tier2: 65.0,
            tier3: 45.0,
        }
    }
}

/// Qualification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationConfig {
    /// Sub-score weights
    pub weights: QualificationWeights,
    /// Tier cut points
    pub tiers: TierCutPoints,
    /// Industries scored as a full segment match (case-insensitive substring)
    pub target_industries: Vec<String>,
    /// Size tiers scored as a full size match
    pub preferred_size_tiers: Vec<SizeTier>,
    /// Annual opportunity that earns a full financial sub-score
    pub financial_full_score_annual: f64,
    /// Segment score for a target industry
    pub industry_match_score: f64,
    /// Segment score for an unknown industry
    pub industry_unknown_score: f64,
    /// Segment score for a non-target industry
    pub industry_other_score: f64,
    /// Segment score for a preferred size
    pub size_match_score: f64,
    /// Segment score for an unknown size
    pub size_unknown_score: f64,
    /// Segment score for any other size
    pub size_other_score: f64,
    /// Contact points for a plausible email
    pub email_points: f64,
    /// Contact points for a phone number
    pub phone_points: f64,
    /// Contact points for a named contact
    pub name_points: f64,
}

impl Default for QualificationConfig {
    fn default() -> Self {
        Self {
            weights: QualificationWeights::default(),
            tiers: TierCutPoints::default(),
            target_industries: [
                "retail",
                "e-commerce",
                "ecommerce",
                "hospitality",
                "restaurant",
                "professional services",
                "healthcare",
                "home services",
                "construction",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            preferred_size_tiers: vec![SizeTier::Small, SizeTier::Medium],
            financial_full_score_annual: 100_000.0,
            industry_match_score: 100.0,
            industry_unknown_score: 50.0,
            industry_other_score: 20.0,
            size_match_score: 100.0,
            size_unknown_score: 50.0,
            size_other_score: 40.0,
            email_points: 40.0,
            phone_points: 30.0,
            name_points: 30.0,
        }
    }
}

impl QualificationConfig {
    fn check(&self, problems: &mut Vec<String>) {
        let w = &self.weights;
        for (name, value) in [
            ("segment_fit", w.segment_fit),
            ("financial", w.financial),
            ("technology", w.technology),
            ("contact", w.contact),
            ("company_profile", w.company_profile),
        ] {
            check_non_negative(problems, &format!("qualification.weights.{}", name), value);
        }
        let total = w.total();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            problems.push(format!(
                "qualification weights must sum to 1.0 (±{}), got {:.4}",
                WEIGHT_SUM_TOLERANCE, total
            ));
        }

        let t = &self.tiers;
        let in_range = [t.tier1, t.tier2, t.tier3]
            .iter()
            .all(|c| (0.0..=100.0).contains(c));
        if !(in_range && t.tier1 > t.tier2 && t.tier2 > t.tier3) {
            problems.push(format!(
                "qualification tier cut points must be strictly descending within [0, 100], got {}/{}/{}",
                t.tier1, t.tier2, t.tier3
            ));
        }

        if !(self.financial_full_score_annual > 0.0) {
            problems.push(format!(
                "qualification.financial_full_score_annual must be positive, got {}",
                self.financial_full_score_annual
            ));
        }

        for (name, value) in [
            ("industry_match_score", self.industry_match_score),
            ("industry_unknown_score", self.industry_unknown_score),
            ("industry_other_score", self.industry_other_score),
            ("size_match_score", self.size_match_score),
            ("size_unknown_score", self.size_unknown_score),
            ("size_other_score", self.size_other_score),
        ] {
            if !(0.0..=100.0).contains(&value) {
                problems.push(format!(
                    "qualification.{} must be within [0, 100], got {}",
                    name, value
                ));
            }
        }

        let contact_total = self.email_points + self.phone_points + self.name_points;
        if [self.email_points, self.phone_points, self.name_points]
            .iter()
            .any(|p| *p < 0.0)
            || contact_total > 100.0
        {
            problems.push(format!(
                "qualification contact points must be non-negative and total at most 100, got {}",
                contact_total
            ));
        }
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Contactability multipliers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactabilityMultipliers {
    /// Email and phone present
    pub email_and_phone: f64,
    /// One of email / phone present
    pub single_channel: f64,
    /// Neither present
    pub none: f64,
}

impl Default for ContactabilityMultipliers {
    fn default() -> Self {
        Self {
            email_and_phone: 1.0,
            single_channel: 0.9,
            none: 0.75,
        }
    }
}

/// Priority settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// Multipliers keyed by lowercased city, region or country (first match wins, in that order)
    pub geo_multipliers: BTreeMap<String, f64>,
    /// Multiplier when no location matches
    pub default_geo_multiplier: f64,
    /// Scale applied to the urgency signal (0-1)
    pub urgency_weight: f64,
    /// Urgency added when performance is rated poor
    pub poor_performance_urgency: f64,
    /// Urgency added when ads run against a site rated below good
    pub ad_spend_urgency: f64,
    /// Urgency added for a recently incorporated company
    pub new_business_urgency: f64,
    /// Years since incorporation that count as recent
    pub new_business_years: i32,
    /// Year used for recency; current year when unset
    pub reference_year: Option<i32>,
    /// Contactability multipliers
    pub contactability: ContactabilityMultipliers,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            geo_multipliers: BTreeMap::new(),
            default_geo_multiplier: 1.0,
            urgency_weight: 0.5,
            poor_performance_urgency: 0.4,
            ad_spend_urgency: 0.3,
            new_business_urgency: 0.3,
            new_business_years: 2,
            reference_year: None,
            contactability: ContactabilityMultipliers::default(),
        }
    }
}

impl PriorityConfig {
    fn check(&self, problems: &mut Vec<String>) {
        for (location, multiplier) in &self.geo_multipliers {
            if !(*multiplier > 0.0 && multiplier.is_finite()) {
                problems.push(format!(
                    "priority.geo_multipliers.{} must be positive, got {}",
                    location, multiplier
                ));
            }
        }
        if !(self.default_geo_multiplier > 0.0) {
            problems.push(format!(
                "priority.default_geo_multiplier must be positive, got {}",
                self.default_geo_multiplier
            ));
        }
        check_non_negative(problems, "priority.urgency_weight", self.urgency_weight);
        check_unit(problems, "priority.poor_performance_urgency", self.poor_performance_urgency);
        check_unit(problems, "priority.ad_spend_urgency", self.ad_spend_urgency);
        check_unit(problems, "priority.new_business_urgency", self.new_business_urgency);

        let c = &self.contactability;
        for (name, value) in [
            ("email_and_phone", c.email_and_phone),
            ("single_channel", c.single_channel),
            ("none", c.none),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                problems.push(format!(
                    "priority.contactability.{} must be within (0, 1], got {}",
                    name, value
                ));
            }
        }
    }
}
