//! Qualification Stage
//!
//! Weighted score over five sub-scores (each 0-100), mapped to a tier.
//!
//! | Sub-score       | Signal                                              |
//! |-----------------|-----------------------------------------------------|
//! | segment_fit     | target industry, preferred size tier                |
//! | financial       | annual opportunity vs. full-score level             |
//! | technology      | performance shortfall and missing site features     |
//! | contact         | email / phone / named contact present               |
//! | company_profile | data completeness and registry standing             |

use super::financial_leak::SizeTier;
use super::{missing_prior, round_to, Stage};
use crate::config::{QualificationConfig, SizeTierBounds};
use crate::fetchers::FetchedSources;
use crate::sources::RegistryStatus;
use crate::types::{Outcome, Record, StageName, StageOutcome, StageOutput};
use serde::{Deserialize, Serialize};

/// Share of the technology sub-score driven by performance shortfall
const PERFORMANCE_NEED_SHARE: f64 = 0.6;

/// Company-profile points from completeness; the rest come from registry standing
const COMPLETENESS_POINTS: f64 = 80.0;

/// Qualification tier (1 is best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Score ≥ tier1 cut point
    Tier1,
    /// Score ≥ tier2 cut point
    Tier2,
    /// Score ≥ tier3 cut point
    Tier3,
    /// Anything lower
    Tier4,
}

/// Sub-scores (0-100 each)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// Industry and size fit
    pub segment_fit: f64,
    /// Opportunity size
    pub financial: f64,
    /// Technology / performance need
    pub technology: f64,
    /// Contactability
    pub contact: f64,
    /// Completeness and registry standing
    pub company_profile: f64,
}

/// Output of the Qualification stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualificationResult {
    /// Weighted score (0-100)
    pub score: f64,
    /// Tier from the cut points
    pub tier: Tier,
    /// Component scores
    pub sub_scores: SubScores,
}

/// Weighted qualification score and tier
pub struct QualificationStage {
    config: QualificationConfig,
    size_bounds: SizeTierBounds,
}

impl QualificationStage {
    /// Create the stage
    pub fn new(config: QualificationConfig, size_bounds: SizeTierBounds) -> Self {
        Self {
            config,
            size_bounds,
        }
    }

    /// Tier for a score
    pub fn tier_for(&self, score: f64) -> Tier {
        let t = &self.config.tiers;
        if score >= t.tier1 {
            Tier::Tier1
        } else if score >= t.tier2 {
            Tier::Tier2
        } else if score >= t.tier3 {
            Tier::Tier3
        } else {
            Tier::Tier4
        }
    }

    fn segment_fit(&self, industry: Option<&str>, size: SizeTier) -> f64 {
        let c = &self.config;
        let industry_score = match industry.map(str::to_lowercase) {
            None => c.industry_unknown_score,
            Some(label) => {
                let matched = c
                    .target_industries
                    .iter()
                    .any(|target| label.contains(&target.to_lowercase()));
                if matched {
                    c.industry_match_score
                } else {
                    c.industry_other_score
                }
            }
        };
        let size_score = if size == SizeTier::Unknown {
            c.size_unknown_score
        } else if c.preferred_size_tiers.contains(&size) {
            c.size_match_score
        } else {
            c.size_other_score
        };
        (industry_score + size_score) / 2.0
    }
}

impl Stage for QualificationStage {
    fn name(&self) -> StageName {
        StageName::Qualification
    }

    fn evaluate(&self, record: &Record, _fetched: &FetchedSources) -> StageOutcome {
        let c = &self.config;
        let Some(performance) = record.bag.performance() else {
            return missing_prior(self.name(), StageName::Performance);
        };
        let Some(profile) = record.bag.enrichment() else {
            return missing_prior(self.name(), StageName::Enrichment);
        };
        let Some(leak) = record.bag.leak() else {
            return missing_prior(self.name(), StageName::FinancialLeak);
        };

        let industry = profile
            .industry
            .as_ref()
            .map(|v| v.value.as_str())
            .or(record.fields.industry.as_deref());
        let employees = profile.employee_count.as_ref().map(|v| v.value);
        let segment_fit = self.segment_fit(industry, SizeTier::classify(employees, &self.size_bounds));

        let financial = (leak.annual_opportunity / c.financial_full_score_annual * 100.0)
            .clamp(0.0, 100.0);

        let known_gaps = [
            profile.has_analytics,
            profile.has_ssl,
            profile.mobile_friendly,
        ];
        let gaps = known_gaps.iter().filter(|f| **f == Some(false)).count() as f64;
        let gap_ratio = gaps / known_gaps.len() as f64;
        let technology = (100.0 - performance.score) * PERFORMANCE_NEED_SHARE
            + gap_ratio * 100.0 * (1.0 - PERFORMANCE_NEED_SHARE);

        let has_name = record
            .fields
            .contact_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        let contact = [
            (profile.has_email, c.email_points),
            (profile.has_phone, c.phone_points),
            (has_name, c.name_points),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, points)| points)
        .sum::<f64>()
        .min(100.0);

        let standing = match profile.registry_status.as_ref().map(|s| s.value) {
            Some(RegistryStatus::Active) => 100.0 - COMPLETENESS_POINTS,
            Some(RegistryStatus::Dissolved) => 0.0,
            _ => (100.0 - COMPLETENESS_POINTS) / 2.0,
        };
        let company_profile = profile.completeness * COMPLETENESS_POINTS + standing;

        let sub_scores = SubScores {
            segment_fit: round_to(segment_fit, 2),
            financial: round_to(financial, 2),
            technology: round_to(technology.clamp(0.0, 100.0), 2),
            contact: round_to(contact, 2),
            company_profile: round_to(company_profile.clamp(0.0, 100.0), 2),
        };

        let w = &c.weights;
        let score = round_to(
            (sub_scores.segment_fit * w.segment_fit
                + sub_scores.financial * w.financial
                + sub_scores.technology * w.technology
                + sub_scores.contact * w.contact
                + sub_scores.company_profile * w.company_profile)
                .clamp(0.0, 100.0),
            2,
        );

        Outcome::Success(StageOutput::Qualification(QualificationResult {
            score,
            tier: self.tier_for(score),
            sub_scores,
        }))
    }
}
