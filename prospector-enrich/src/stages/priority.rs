//! Priority Stage
//!
//! Final rank key:
//! ```text
//! priority = qualification_score × geo × (1 + urgency_weight × urgency) × contactability
//! ```
//! `urgency` (0-1) sums the urgency signals present: poor performance, ads
//! running against a site rated below good, recent incorporation.

use super::performance::PerformanceRating;
use super::qualification::Tier;
use super::{missing_prior, round_to, Stage};
use crate::config::PriorityConfig;
use crate::fetchers::FetchedSources;
use crate::types::{Outcome, Record, RecordFields, StageName, StageOutcome, StageOutput};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

/// Output of the Priority stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityScore {
    /// Rank key (higher ranks first)
    pub priority: f64,
    /// Qualification score it was built from
    pub qualification_score: f64,
    /// Qualification tier
    pub tier: Tier,
    /// Geographic multiplier applied
    pub geo_multiplier: f64,
    /// Urgency signal (0-1)
    pub urgency: f64,
    /// Contactability multiplier applied
    pub contactability: f64,
}

/// Final rank key
pub struct PriorityStage {
    config: PriorityConfig,
    good_rating_min: f64,
    reference_year: i32,
}

impl PriorityStage {
    /// Create the stage
    ///
    /// `good_rating_min` is the performance score rated good; ads running
    /// against a site below it count as urgent.
    pub fn new(config: PriorityConfig, good_rating_min: f64) -> Self {
        let reference_year = config
            .reference_year
            .unwrap_or_else(|| chrono::Utc::now().year());
        Self {
            config,
            good_rating_min,
            reference_year,
        }
    }

    /// Geographic multiplier: city, then region, then country, then default
    pub fn geo_multiplier(&self, fields: &RecordFields) -> f64 {
        [&fields.city, &fields.region, &fields.country]
            .into_iter()
            .filter_map(|f| f.as_deref())
            .map(|s| s.trim().to_lowercase())
            .find_map(|place| self.config.geo_multipliers.get(&place).copied())
            .unwrap_or(self.config.default_geo_multiplier)
    }
}

impl Stage for PriorityStage {
    fn name(&self) -> StageName {
        StageName::Priority
    }

    fn evaluate(&self, record: &Record, _fetched: &FetchedSources) -> StageOutcome {
        let c = &self.config;
        let Some(performance) = record.bag.performance() else {
            return missing_prior(self.name(), StageName::Performance);
        };
        let Some(profile) = record.bag.enrichment() else {
            return missing_prior(self.name(), StageName::Enrichment);
        };
        let Some(qualification) = record.bag.qualification() else {
            return missing_prior(self.name(), StageName::Qualification);
        };

        let mut urgency = 0.0;
        if performance.rating == PerformanceRating::Poor && !performance.assumed {
            urgency += c.poor_performance_urgency;
        }
        let advertising = profile.ads.as_ref().is_some_and(|a| a.active);
        if advertising && performance.score < self.good_rating_min {
            urgency += c.ad_spend_urgency;
        }
        let recent = profile
            .incorporation_year
            .is_some_and(|year| self.reference_year - year <= c.new_business_years);
        if recent {
            urgency += c.new_business_urgency;
        }
        let urgency: f64 = f64::min(urgency, 1.0);

        let contactability = match (profile.has_email, profile.has_phone) {
            (true, true) => c.contactability.email_and_phone,
            (true, false) | (false, true) => c.contactability.single_channel,
            (false, false) => c.contactability.none,
        };

        let geo_multiplier = self.geo_multiplier(&record.fields);
        let priority = qualification.score
            * geo_multiplier
            * (1.0 + c.urgency_weight * urgency)
            * contactability;

        Outcome::Success(StageOutput::Priority(PriorityScore {
            priority: round_to(priority, 4),
            qualification_score: qualification.score,
            tier: qualification.tier,
            geo_multiplier,
            urgency: round_to(urgency, 4),
            contactability,
        }))
    }
}
