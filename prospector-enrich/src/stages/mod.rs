//! Enrichment stages
//!
//! Each stage is a pure function of the record, its prior stage outputs and
//! the source payloads fetched for it. Stages never perform I/O.
//!
//! Chain order is fixed:
//! Performance → Enrichment → Financial-Leak → Qualification → Priority

pub mod enrichment;
pub mod financial_leak;
pub mod performance;
pub mod priority;
pub mod qualification;

use crate::config::PipelineConfig;
use crate::fetchers::FetchedSources;
use crate::types::{Failure, ErrorKind, Record, SourceKind, StageName, StageOutcome, StageOutput};

/// One step of the enrichment chain
pub trait Stage: Send + Sync {
    /// Stage identity
    fn name(&self) -> StageName;

    /// Sources fetched before evaluation
    fn dependencies(&self) -> &'static [SourceKind] {
        &[]
    }

    /// Evaluate the stage for one record
    fn evaluate(&self, record: &Record, fetched: &FetchedSources) -> StageOutcome;

    /// Business policy check on the stage's output
    ///
    /// Returning a reason stops the record here; later stages are reported
    /// as skipped by policy.
    fn policy_gate(&self, _output: &StageOutput) -> Option<String> {
        None
    }
}

/// Failure for a stage whose prior output is missing from the bag
pub(crate) fn missing_prior(stage: StageName, prior: StageName) -> StageOutcome {
    StageOutcome::Failure(Failure::terminal(
        ErrorKind::Internal,
        format!("{} stage ran without {} output", stage, prior),
    ))
}

/// Failure for a stage whose declared source was not fetched
pub(crate) fn missing_fetch(stage: StageName, source: SourceKind) -> StageOutcome {
    StageOutcome::Failure(Failure::terminal(
        ErrorKind::Internal,
        format!("{} stage ran without a {} fetch", stage, source),
    ))
}

/// Round to `places` decimal places (stable output for equal inputs)
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// The fixed stage chain
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl StageChain {
    /// Standard five-stage chain from configuration
    pub fn standard(config: &PipelineConfig) -> Self {
        Self {
            stages: vec![
                Box::new(performance::PerformanceStage::new(config.performance.clone())),
                Box::new(enrichment::EnrichmentStage::new(config.enrichment.clone())),
                Box::new(financial_leak::FinancialLeakStage::new(config.leak.clone())),
                Box::new(qualification::QualificationStage::new(
                    config.qualification.clone(),
                    config.leak.size_tiers.clone(),
                )),
                Box::new(priority::PriorityStage::new(
                    config.priority.clone(),
                    config.performance.good_rating_min,
                )),
            ],
        }
    }

    /// Stage by name
    pub fn get(&self, name: StageName) -> Option<&dyn Stage> {
        self.stages
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    /// Stages in chain order
    pub fn iter(&self) -> impl Iterator<Item = &dyn Stage> {
        self.stages.iter().map(|s| s.as_ref())
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when the chain has no stages
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_chain_order() {
        let chain = StageChain::standard(&PipelineConfig::default());
        let names: Vec<StageName> = chain.iter().map(|s| s.name()).collect();
        assert_eq!(names, StageName::ORDERED.to_vec());
    }

    #[test]
    fn test_dependencies() {
        let chain = StageChain::standard(&PipelineConfig::default());
        let deps = |name| chain.get(name).unwrap().dependencies().to_vec();
        assert_eq!(deps(StageName::Performance), vec![SourceKind::Performance]);
        assert_eq!(
            deps(StageName::Enrichment),
            vec![
                SourceKind::TechStack,
                SourceKind::AdIntelligence,
                SourceKind::Registry
            ]
        );
        assert!(deps(StageName::FinancialLeak).is_empty());
        assert!(deps(StageName::Qualification).is_empty());
        assert!(deps(StageName::Priority).is_empty());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.34567, 2), 12.35);
        assert_eq!(round_to(0.5, 0), 1.0);
    }
}
