//! Performance Stage
//!
//! Turns web-performance metrics into a 0-100 sub-score.
//!
//! # Scoring
//! Each metric is scored piecewise against its good / poor thresholds:
//! - value ≤ good → 100
//! - good → poor → 100 falling linearly to 50
//! - poor → 2×poor → 50 falling linearly to 0
//!
//! The overall score is the weighted mean over the metrics present (weights
//! renormalised). With no metric present the vendor overall score is used;
//! with neither, the configured assumed score, flagged as assumed.

use super::{missing_fetch, round_to, Stage};
use crate::config::{MetricBand, PerformanceConfig};
use crate::fetchers::FetchedSources;
use crate::sources::PerformanceMetrics;
use crate::types::{Outcome, Record, SourceKind, StageName, StageOutcome, StageOutput};
use serde::{Deserialize, Serialize};

/// Qualitative rating of a performance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceRating {
    /// At or above the good threshold
    Good,
    /// Between poor and good
    NeedsImprovement,
    /// Below the poor threshold
    Poor,
}

/// Output of the Performance stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAssessment {
    /// Overall score (0-100)
    pub score: f64,
    /// Rating band of the score
    pub rating: PerformanceRating,
    /// Metrics that contributed
    pub measured_metrics: usize,
    /// Score is the configured assumption, not a measurement
    pub assumed: bool,
    /// Metrics as fetched
    pub metrics: PerformanceMetrics,
}

/// Score one metric against its band (0-100)
pub fn score_metric(value: f64, band: &MetricBand) -> f64 {
    if value <= band.good {
        100.0
    } else if value <= band.poor {
        100.0 - 50.0 * (value - band.good) / (band.poor - band.good)
    } else if value <= 2.0 * band.poor {
        50.0 - 50.0 * (value - band.poor) / band.poor
    } else {
        0.0
    }
}

/// Web-performance sub-score
pub struct PerformanceStage {
    config: PerformanceConfig,
}

impl PerformanceStage {
    /// Create the stage
    pub fn new(config: PerformanceConfig) -> Self {
        Self { config }
    }

    /// Assess a set of metrics
    pub fn assess(&self, metrics: &PerformanceMetrics) -> PerformanceAssessment {
        let c = &self.config;
        let scored: Vec<(f64, f64)> = [
            (metrics.lcp_ms, &c.lcp),
            (metrics.fcp_ms, &c.fcp),
            (metrics.tbt_ms, &c.tbt),
            (metrics.cls, &c.cls),
            (metrics.ttfb_ms, &c.ttfb),
        ]
        .into_iter()
        .filter_map(|(value, band)| {
            value
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| (score_metric(v, band), band.weight))
        })
        .collect();

        let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();

        let (score, assumed) = if total_weight > 0.0 {
            let weighted: f64 = scored.iter().map(|(s, w)| s * w).sum();
            (weighted / total_weight, false)
        } else if let Some(vendor) = metrics.overall_score.filter(|s| s.is_finite()) {
            (vendor.clamp(0.0, 100.0), false)
        } else {
            (c.assumed_score, true)
        };

        let score = round_to(score, 2);
        PerformanceAssessment {
            score,
            rating: self.rating(score),
            measured_metrics: scored.len(),
            assumed,
            metrics: metrics.clone(),
        }
    }

    fn rating(&self, score: f64) -> PerformanceRating {
        if score >= self.config.good_rating_min {
            PerformanceRating::Good
        } else if score >= self.config.poor_rating_below {
            PerformanceRating::NeedsImprovement
        } else {
            PerformanceRating::Poor
        }
    }
}

impl Stage for PerformanceStage {
    fn name(&self) -> StageName {
        StageName::Performance
    }

    fn dependencies(&self) -> &'static [SourceKind] {
        &[SourceKind::Performance]
    }

    fn evaluate(&self, _record: &Record, fetched: &FetchedSources) -> StageOutcome {
        let Some(report) = &fetched.performance else {
            return missing_fetch(self.name(), SourceKind::Performance);
        };

        match &report.outcome {
            Outcome::Success(metrics) => {
                let assessment = self.assess(metrics);
                if assessment.assumed {
                    Outcome::PartialSuccess {
                        value: StageOutput::Performance(assessment),
                        reason: "no performance metrics reported, average assumed".to_string(),
                    }
                } else {
                    Outcome::Success(StageOutput::Performance(assessment))
                }
            }
            Outcome::PartialSuccess { value, reason } => Outcome::PartialSuccess {
                value: StageOutput::Performance(self.assess(value)),
                reason: reason.clone(),
            },
            Outcome::Failure(failure) => Outcome::Failure(failure.clone()),
        }
    }
}
