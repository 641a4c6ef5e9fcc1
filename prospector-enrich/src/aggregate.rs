//! Batch Result aggregation
//!
//! Pure functions over finished record outcomes: per-stage counts, the batch
//! summary and the ranked top-K list. Ordering is deterministic: records by
//! input position, prospects by priority descending with input position as
//! the tie-break.

use crate::fetchers::SourceStats;
use crate::stages::qualification::Tier;
use crate::types::{
    EnrichmentBag, RecordFields, RecordState, RecordStatus, SkipReason, StageName, StageStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

/// One stage's terminal status for one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    /// Stage
    pub stage: StageName,
    /// Terminal status
    pub status: StageStatus,
    /// Evaluations made (0 when skipped)
    pub attempts: u32,
    /// Source call attempts made for this stage
    pub fetch_attempts: u32,
    /// Wall-clock time in the stage (ms)
    pub elapsed_ms: u64,
}

impl StageReport {
    /// Report for a stage that never ran
    pub fn skipped(stage: StageName, reason: SkipReason) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped(reason),
            attempts: 0,
            fetch_attempts: 0,
            elapsed_ms: 0,
        }
    }
}

/// Everything known about one record after the batch
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    /// Position in the batch input
    pub input_index: usize,
    /// Record key
    pub key: String,
    /// Record classification
    pub status: RecordStatus,
    /// Final state-machine state
    pub state: RecordState,
    /// One report per stage, in chain order
    pub stages: Vec<StageReport>,
    /// Input fields
    pub fields: RecordFields,
    /// Stage outputs produced
    pub enrichment: EnrichmentBag,
    /// Wall-clock time for the record (ms)
    pub elapsed_ms: u64,
}

impl RecordOutcome {
    /// Outcome for a record the batch never started
    pub fn cancelled(record: crate::types::Record) -> Self {
        Self {
            input_index: record.input_index,
            key: record.key,
            status: RecordStatus::Cancelled,
            state: RecordState::Skipped {
                reason: SkipReason::Cancelled,
            },
            stages: StageName::ORDERED
                .iter()
                .map(|s| StageReport::skipped(*s, SkipReason::Cancelled))
                .collect(),
            fields: record.fields,
            enrichment: record.bag,
            elapsed_ms: 0,
        }
    }

    /// Report for one stage
    pub fn stage(&self, stage: StageName) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Priority rank key, if the record reached the Priority stage
    pub fn priority(&self) -> Option<f64> {
        self.enrichment.priority().map(|p| p.priority)
    }

    /// Total source call attempts across stages
    pub fn fetch_attempts(&self) -> u32 {
        self.stages.iter().map(|s| s.fetch_attempts).sum()
    }
}

/// Per-stage status counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Stage
    pub stage: StageName,
    /// Completed
    pub completed: usize,
    /// Degraded
    pub degraded: usize,
    /// Failed
    pub failed: usize,
    /// Skipped after an earlier failure
    pub skipped_failure: usize,
    /// Skipped by a policy gate
    pub skipped_policy: usize,
    /// Skipped by cancellation
    pub skipped_cancelled: usize,
}

/// Batch-level counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Input records
    pub total: usize,
    /// Reached Priority without degradation
    pub succeeded: usize,
    /// Reached Priority with degradation
    pub degraded: usize,
    /// Stopped by a policy gate
    pub filtered: usize,
    /// Failed terminally
    pub failed: usize,
    /// Not started because of cancellation
    pub cancelled: usize,
    /// Share of records that reached Priority (0-1)
    pub completion_rate: f64,
    /// Mean annual opportunity among qualified records
    pub average_annual_opportunity: Option<f64>,
}

/// One entry of the ranked prospect list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProspect {
    /// 1-based rank
    pub rank: usize,
    /// Position in the batch input
    pub input_index: usize,
    /// Record key
    pub key: String,
    /// Company name as supplied
    pub company_name: Option<String>,
    /// Priority rank key
    pub priority: f64,
    /// Qualification score
    pub qualification_score: f64,
    /// Qualification tier
    pub tier: Tier,
    /// Annual opportunity estimate
    pub annual_opportunity: Option<f64>,
    /// Record status (succeeded or degraded)
    pub status: RecordStatus,
}

/// Complete output of one batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Batch identifier
    pub batch_id: Uuid,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// When the batch finished
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration (ms)
    pub elapsed_ms: u64,
    /// Cancellation was observed
    pub cancelled: bool,
    /// Batch counts
    pub summary: BatchSummary,
    /// Per-stage counts, in chain order
    pub stage_stats: Vec<StageStats>,
    /// Top-K prospects by priority
    pub top_prospects: Vec<RankedProspect>,
    /// Per-source fetch, cache and budget counters
    pub source_stats: Vec<SourceStats>,
    /// One outcome per input record, by input position
    pub records: Vec<RecordOutcome>,
}

/// Batch identity and timing
#[derive(Debug, Clone)]
pub struct BatchMeta {
    /// Batch identifier
    pub batch_id: Uuid,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration (ms)
    pub elapsed_ms: u64,
    /// Cancellation observed
    pub cancelled: bool,
}

/// Count stage statuses across records
pub fn stage_stats(records: &[RecordOutcome]) -> Vec<StageStats> {
    StageName::ORDERED
        .iter()
        .map(|stage| {
            let mut stats = StageStats {
                stage: *stage,
                completed: 0,
                degraded: 0,
                failed: 0,
                skipped_failure: 0,
                skipped_policy: 0,
                skipped_cancelled: 0,
            };
            for report in records.iter().filter_map(|r| r.stage(*stage)) {
                match &report.status {
                    StageStatus::Completed => stats.completed += 1,
                    StageStatus::Degraded { .. } => stats.degraded += 1,
                    StageStatus::Failed { .. } => stats.failed += 1,
                    StageStatus::Skipped(SkipReason::Failure { .. }) => stats.skipped_failure += 1,
                    StageStatus::Skipped(SkipReason::Policy { .. }) => stats.skipped_policy += 1,
                    StageStatus::Skipped(SkipReason::Cancelled) => stats.skipped_cancelled += 1,
                }
            }
            stats
        })
        .collect()
}

/// Summarise record statuses
pub fn summarize(records: &[RecordOutcome]) -> BatchSummary {
    let count = |status: RecordStatus| records.iter().filter(|r| r.status == status).count();
    let total = records.len();
    let succeeded = count(RecordStatus::Succeeded);
    let degraded = count(RecordStatus::Degraded);

    let opportunities: Vec<f64> = records
        .iter()
        .filter(|r| r.enrichment.qualification().is_some())
        .filter_map(|r| r.enrichment.leak().map(|l| l.annual_opportunity))
        .collect();
    let average_annual_opportunity = (!opportunities.is_empty()).then(|| {
        let mean = opportunities.iter().sum::<f64>() / opportunities.len() as f64;
        (mean * 100.0).round() / 100.0
    });

    BatchSummary {
        total,
        succeeded,
        degraded,
        filtered: count(RecordStatus::Filtered),
        failed: count(RecordStatus::Failed),
        cancelled: count(RecordStatus::Cancelled),
        completion_rate: if total == 0 {
            0.0
        } else {
            (succeeded + degraded) as f64 / total as f64
        },
        average_annual_opportunity,
    }
}

/// Top-K prospects: priority descending, input position ascending on ties
///
/// Filtered, failed and cancelled records are never ranked.
pub fn rank(records: &[RecordOutcome], top_k: usize) -> Vec<RankedProspect> {
    let mut candidates: Vec<(&RecordOutcome, f64)> = records
        .iter()
        .filter(|r| r.status.reached_priority())
        .filter_map(|r| r.priority().map(|p| (r, p)))
        .collect();

    candidates.sort_by(|(a, pa), (b, pb)| match pb.total_cmp(pa) {
        Ordering::Equal => a.input_index.cmp(&b.input_index),
        other => other,
    });

    candidates
        .into_iter()
        .take(top_k)
        .enumerate()
        .filter_map(|(i, (record, priority))| {
            let score = record.enrichment.priority()?;
            Some(RankedProspect {
                rank: i + 1,
                input_index: record.input_index,
                key: record.key.clone(),
                company_name: record.fields.company_name.clone(),
                priority,
                qualification_score: score.qualification_score,
                tier: score.tier,
                annual_opportunity: record.enrichment.leak().map(|l| l.annual_opportunity),
                status: record.status,
            })
        })
        .collect()
}

/// Assemble the Batch Result
pub fn aggregate(
    meta: BatchMeta,
    mut records: Vec<RecordOutcome>,
    top_k: usize,
    source_stats: Vec<SourceStats>,
) -> BatchResult {
    records.sort_by_key(|r| r.input_index);

    BatchResult {
        batch_id: meta.batch_id,
        started_at: meta.started_at,
        finished_at: meta.finished_at,
        elapsed_ms: meta.elapsed_ms,
        cancelled: meta.cancelled,
        summary: summarize(&records),
        stage_stats: stage_stats(&records),
        top_prospects: rank(&records, top_k),
        source_stats,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::priority::PriorityScore;
    use crate::types::{ErrorKind, Record, StageOutput};

    fn outcome(index: usize, status: RecordStatus, priority: Option<f64>) -> RecordOutcome {
        let mut record = Record::new(
            index,
            RecordFields {
                company_name: Some(format!("Company {}", index)),
                ..Default::default()
            },
        );
        if let Some(p) = priority {
            record.bag.insert(StageOutput::Priority(PriorityScore {
                priority: p,
                qualification_score: p,
                tier: Tier::Tier2,
                geo_multiplier: 1.0,
                urgency: 0.0,
                contactability: 1.0,
            }));
        }
        let stages = StageName::ORDERED
            .iter()
            .map(|s| StageReport {
                stage: *s,
                status: match status {
                    RecordStatus::Failed => StageStatus::Failed {
                        kind: ErrorKind::Permanent,
                        message: "not found".to_string(),
                    },
                    _ => StageStatus::Completed,
                },
                attempts: 1,
                fetch_attempts: 1,
                elapsed_ms: 0,
            })
            .collect();
        RecordOutcome {
            input_index: index,
            key: record.key,
            status,
            state: RecordState::Prioritized,
            stages,
            fields: record.fields,
            enrichment: record.bag,
            elapsed_ms: 0,
        }
    }

    #[test]
    fn test_rank_orders_by_priority_then_input_position() {
        let records = vec![
            outcome(0, RecordStatus::Succeeded, Some(50.0)),
            outcome(1, RecordStatus::Degraded, Some(80.0)),
            outcome(2, RecordStatus::Succeeded, Some(50.0)),
            outcome(3, RecordStatus::Succeeded, Some(90.0)),
        ];
        let ranked = rank(&records, 10);
        let order: Vec<usize> = ranked.iter().map(|p| p.input_index).collect();
        assert_eq!(order, vec![3, 1, 0, 2]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[3].rank, 4);
    }

    #[test]
    fn test_rank_excludes_filtered_and_failed() {
        let records = vec![
            outcome(0, RecordStatus::Filtered, Some(99.0)),
            outcome(1, RecordStatus::Failed, None),
            outcome(2, RecordStatus::Succeeded, Some(10.0)),
        ];
        let ranked = rank(&records, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].input_index, 2);
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let records: Vec<_> = (0..10)
            .map(|i| outcome(i, RecordStatus::Succeeded, Some(i as f64)))
            .collect();
        let ranked = rank(&records, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].input_index, 9);
        assert!(rank(&records, 0).is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let records = vec![
            outcome(0, RecordStatus::Succeeded, Some(50.0)),
            outcome(1, RecordStatus::Failed, None),
            outcome(2, RecordStatus::Degraded, Some(40.0)),
            outcome(3, RecordStatus::Cancelled, None),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.degraded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert!((summary.completion_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(
            summary.succeeded + summary.degraded + summary.filtered + summary.failed + summary.cancelled,
            summary.total
        );
    }

    #[test]
    fn test_empty_batch_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.completion_rate, 0.0);
        assert!(summary.average_annual_opportunity.is_none());
    }

    #[test]
    fn test_stage_stats_counts_failures() {
        let records = vec![
            outcome(0, RecordStatus::Succeeded, Some(50.0)),
            outcome(1, RecordStatus::Failed, None),
        ];
        let stats = stage_stats(&records);
        assert_eq!(stats.len(), 5);
        assert_eq!(stats[0].stage, StageName::Performance);
        assert_eq!(stats[0].completed, 1);
        assert_eq!(stats[0].failed, 1);
    }

    #[test]
    fn test_aggregate_sorts_records_by_input_position() {
        let records = vec![
            outcome(2, RecordStatus::Succeeded, Some(1.0)),
            outcome(0, RecordStatus::Succeeded, Some(2.0)),
            outcome(1, RecordStatus::Succeeded, Some(3.0)),
        ];
        let now = Utc::now();
        let result = aggregate(
            BatchMeta {
                batch_id: Uuid::nil(),
                started_at: now,
                finished_at: now,
                elapsed_ms: 0,
                cancelled: false,
            },
            records,
            2,
            Vec::new(),
        );
        let order: Vec<usize> = result.records.iter().map(|r| r.input_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(result.top_prospects.len(), 2);
        assert_eq!(result.top_prospects[0].input_index, 1);
    }

    #[test]
    fn test_cancelled_outcome_skips_every_stage() {
        let record = Record::new(4, RecordFields::default());
        let cancelled = RecordOutcome::cancelled(record);
        assert_eq!(cancelled.status, RecordStatus::Cancelled);
        assert_eq!(cancelled.stages.len(), 5);
        assert!(cancelled
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Skipped(SkipReason::Cancelled)));
    }
}
