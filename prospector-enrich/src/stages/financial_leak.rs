//! Financial-Leak Stage
//!
//! Estimates the monthly revenue a prospect loses to its website:
//!
//! ```text
//! online        = monthly_revenue × online_revenue_share
//! performance   = online × max_performance_loss_rate × (1 − score/100)
//! technology    = online × Σ gap rates (analytics, TLS, mobile; known gaps only)
//! ad_waste      = monthly_ad_spend × ad_waste_factor × (1 − score/100)
//! monthly       = performance + technology + ad_waste
//! annual        = monthly × 12
//! ```
//!
//! Monthly revenue comes from the enriched annual revenue when known, else
//! from the size tier's configured basis.
//!
//! Gate: when enabled, an opportunity below the configured monthly minimum
//! stops the record before qualification.

use super::{missing_prior, round_to, Stage};
use crate::config::{LeakConfig, SizeTierBounds};
use crate::fetchers::FetchedSources;
use crate::types::{Outcome, Record, StageName, StageOutcome, StageOutput};
use serde::{Deserialize, Serialize};

/// Company size band by headcount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeTier {
    /// Up to `micro_max` employees
    Micro,
    /// Up to `small_max`
    Small,
    /// Up to `medium_max`
    Medium,
    /// Larger
    Large,
    /// Headcount unknown
    Unknown,
}

impl SizeTier {
    /// Classify a headcount
    pub fn classify(employees: Option<u32>, bounds: &SizeTierBounds) -> Self {
        match employees {
            None => SizeTier::Unknown,
            Some(n) if n <= bounds.micro_max => SizeTier::Micro,
            Some(n) if n <= bounds.small_max => SizeTier::Small,
            Some(n) if n <= bounds.medium_max => SizeTier::Medium,
            Some(_) => SizeTier::Large,
        }
    }
}

/// Output of the Financial-Leak stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakEstimate {
    /// Size band used
    pub size_tier: SizeTier,
    /// Monthly revenue basis
    pub monthly_revenue: f64,
    /// Basis came from the tier table, not a known revenue
    pub revenue_estimated: bool,
    /// Loss from slow pages (monthly)
    pub performance_leak: f64,
    /// Loss from missing analytics / TLS / mobile layout (monthly)
    pub technology_leak: f64,
    /// Wasted ad spend (monthly)
    pub ad_waste: f64,
    /// Total monthly opportunity
    pub monthly_opportunity: f64,
    /// Total annual opportunity
    pub annual_opportunity: f64,
    /// Below the configured minimum
    pub below_threshold: bool,
}

/// Opportunity estimate
pub struct FinancialLeakStage {
    config: LeakConfig,
}

impl FinancialLeakStage {
    /// Create the stage
    pub fn new(config: LeakConfig) -> Self {
        Self { config }
    }
}

impl Stage for FinancialLeakStage {
    fn name(&self) -> StageName {
        StageName::FinancialLeak
    }

    fn evaluate(&self, record: &Record, _fetched: &FetchedSources) -> StageOutcome {
        let c = &self.config;
        let Some(performance) = record.bag.performance() else {
            return missing_prior(self.name(), StageName::Performance);
        };
        let Some(profile) = record.bag.enrichment() else {
            return missing_prior(self.name(), StageName::Enrichment);
        };

        let employees = profile
            .employee_count
            .as_ref()
            .map(|v| v.value)
            .or(record.fields.employee_count);
        let size_tier = SizeTier::classify(employees, &c.size_tiers);

        let known_revenue = profile
            .annual_revenue
            .as_ref()
            .map(|v| v.value)
            .filter(|r| *r > 0.0);
        let (monthly_revenue, revenue_estimated) = match known_revenue {
            Some(annual) => (annual / 12.0, false),
            None => (c.monthly_revenue.for_tier(size_tier), true),
        };

        let shortfall = (1.0 - performance.score / 100.0).clamp(0.0, 1.0);
        let online = monthly_revenue * c.online_revenue_share;

        let performance_leak = online * c.max_performance_loss_rate * shortfall;

        let gap_rate: f64 = [
            (profile.has_analytics, c.analytics_gap_rate),
            (profile.has_ssl, c.ssl_gap_rate),
            (profile.mobile_friendly, c.mobile_gap_rate),
        ]
        .iter()
        .filter(|(present, _)| *present == Some(false))
        .map(|(_, rate)| rate)
        .sum();
        let technology_leak = online * gap_rate;

        let ad_waste = profile
            .ads
            .as_ref()
            .filter(|a| a.active)
            .and_then(|a| a.estimated_monthly_spend)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map_or(0.0, |spend| spend * c.ad_waste_factor * shortfall);

        let monthly_opportunity = round_to(performance_leak + technology_leak + ad_waste, 2);
        let estimate = LeakEstimate {
            size_tier,
            monthly_revenue: round_to(monthly_revenue, 2),
            revenue_estimated,
            performance_leak: round_to(performance_leak, 2),
            technology_leak: round_to(technology_leak, 2),
            ad_waste: round_to(ad_waste, 2),
            monthly_opportunity,
            annual_opportunity: round_to(monthly_opportunity * 12.0, 2),
            below_threshold: monthly_opportunity < c.min_monthly_opportunity,
        };

        if performance.assumed {
            Outcome::PartialSuccess {
                value: StageOutput::FinancialLeak(estimate),
                reason: "performance loss based on an assumed score".to_string(),
            }
        } else {
            Outcome::Success(StageOutput::FinancialLeak(estimate))
        }
    }

    fn policy_gate(&self, output: &StageOutput) -> Option<String> {
        match output {
            StageOutput::FinancialLeak(estimate)
                if self.config.gate_enabled && estimate.below_threshold =>
            {
                Some(format!(
                    "monthly opportunity {:.2} below minimum {:.2}",
                    estimate.monthly_opportunity, self.config.min_monthly_opportunity
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrichmentConfig;
    use crate::sources::{AdSignals, PerformanceMetrics};
    use crate::stages::enrichment::EnrichmentStage;
    use crate::stages::performance::{PerformanceAssessment, PerformanceRating};
    use crate::types::{ErrorKind, RecordFields};

    fn record_with(score: f64, employees: Option<u32>, ads: Option<AdSignals>) -> Record {
        let mut record = Record::new(
            0,
            RecordFields {
                company_name: Some("Acme".to_string()),
                employee_count: employees,
                ..Default::default()
            },
        );
        record.bag.insert(StageOutput::Performance(PerformanceAssessment {
            score,
            rating: PerformanceRating::Poor,
            measured_metrics: 5,
            assumed: false,
            metrics: PerformanceMetrics::default(),
        }));
        let (mut profile, _) =
            EnrichmentStage::new(EnrichmentConfig::default()).merge(&record, None, None, None);
        profile.ads = ads;
        profile.mobile_friendly = Some(false);
        record.bag.insert(StageOutput::Enrichment(profile));
        record
    }

    fn estimate(outcome: StageOutcome) -> LeakEstimate {
        match outcome.value() {
            Some(StageOutput::FinancialLeak(e)) => e.clone(),
            other => panic!("expected leak estimate, got {:?}", other),
        }
    }

    #[test]
    fn test_size_tier_bounds() {
        let bounds = SizeTierBounds::default();
        assert_eq!(SizeTier::classify(None, &bounds), SizeTier::Unknown);
        assert_eq!(SizeTier::classify(Some(9), &bounds), SizeTier::Micro);
        assert_eq!(SizeTier::classify(Some(10), &bounds), SizeTier::Small);
        assert_eq!(SizeTier::classify(Some(249), &bounds), SizeTier::Medium);
        assert_eq!(SizeTier::classify(Some(250), &bounds), SizeTier::Large);
    }

    #[test]
    fn test_small_business_estimate() {
        // Small tier: 100k/month, 30k online
        // performance: 30k × 0.2 × 0.5 = 3000; mobile gap: 30k × 0.05 = 1500
        // ads: 2000 × 0.5 × 0.5 = 500
        let stage = FinancialLeakStage::new(LeakConfig::default());
        let ads = AdSignals {
            active: true,
            estimated_monthly_spend: Some(2_000.0),
            ..AdSignals::default()
        };
        let record = record_with(50.0, Some(20), Some(ads));
        let e = estimate(stage.evaluate(&record, &FetchedSources::default()));

        assert_eq!(e.size_tier, SizeTier::Small);
        assert!(e.revenue_estimated);
        assert_eq!(e.performance_leak, 3_000.0);
        assert_eq!(e.technology_leak, 1_500.0);
        assert_eq!(e.ad_waste, 500.0);
        assert_eq!(e.monthly_opportunity, 5_000.0);
        assert_eq!(e.annual_opportunity, 60_000.0);
        assert!(!e.below_threshold);
    }

    #[test]
    fn test_gate_trips_below_minimum() {
        let config = LeakConfig {
            mobile_gap_rate: 0.0,
            ..LeakConfig::default()
        };
        let stage = FinancialLeakStage::new(config);
        // Perfect site: no performance leak, no gaps, no ads
        let record = record_with(100.0, Some(3), None);
        let outcome = stage.evaluate(&record, &FetchedSources::default());
        let e = estimate(outcome.clone());
        assert_eq!(e.monthly_opportunity, 0.0);
        assert!(e.below_threshold);

        let reason = stage.policy_gate(outcome.value().unwrap()).unwrap();
        assert!(reason.contains("below minimum"));
    }

    #[test]
    fn test_gate_disabled_never_trips() {
        let config = LeakConfig {
            gate_enabled: false,
            mobile_gap_rate: 0.0,
            ..LeakConfig::default()
        };
        let stage = FinancialLeakStage::new(config);
        let record = record_with(100.0, Some(3), None);
        let outcome = stage.evaluate(&record, &FetchedSources::default());
        assert!(stage.policy_gate(outcome.value().unwrap()).is_none());
    }

    #[test]
    fn test_missing_performance_is_internal_failure() {
        let stage = FinancialLeakStage::new(LeakConfig::default());
        let record = Record::new(0, RecordFields::default());
        let outcome = stage.evaluate(&record, &FetchedSources::default());
        assert_eq!(outcome.failure().map(|f| f.kind), Some(ErrorKind::Internal));
    }
}
