//! Record Runner
//!
//! Walks one record through the stage chain. For each stage:
//!
//! 1. Fetch the stage's source dependencies (cache, budget, retry)
//! 2. Evaluate the stage
//! 3. Re-run steps 1-2 while the outcome is a retriable failure and
//!    attempts remain; an exhausted retriable failure becomes terminal
//! 4. Store the output in the record's bag and advance the state machine
//!
//! A terminal failure marks every later stage skipped by failure. A tripped
//! policy gate marks every later stage skipped by policy. A panic inside a
//! stage step is caught and reported as an internal failure of that stage,
//! so one record can never take down the batch.

use crate::aggregate::{RecordOutcome, StageReport};
use crate::fetchers::SourceFetchers;
use crate::stages::{Stage, StageChain};
use crate::types::{
    ErrorKind, Failure, Outcome, Record, RecordState, RecordStatus, SkipReason, StageName,
    StageOutcome, StageStatus,
};
use futures::FutureExt;
use prospector_common::events::{EventBus, PipelineEvent};
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Result of one stage step before it is folded into the record
struct StepResult {
    outcome: StageOutcome,
    attempts: u32,
    fetch_attempts: u32,
}

/// Runs records through the stage chain
pub struct RecordRunner<'a> {
    chain: &'a StageChain,
    fetchers: &'a SourceFetchers,
    stage_attempts: u32,
    events: Option<&'a EventBus>,
}

impl<'a> RecordRunner<'a> {
    /// Create a runner over a chain and its fetchers
    ///
    /// `stage_attempts` is the number of evaluations a stage gets when it
    /// keeps failing retriably (at least 1).
    pub fn new(
        chain: &'a StageChain,
        fetchers: &'a SourceFetchers,
        stage_attempts: u32,
        events: Option<&'a EventBus>,
    ) -> Self {
        Self {
            chain,
            fetchers,
            stage_attempts: stage_attempts.max(1),
            events,
        }
    }

    /// Run one record to a terminal state
    pub async fn run(&self, batch_id: Uuid, mut record: Record) -> RecordOutcome {
        let started = Instant::now();
        let mut state = RecordState::Pending;
        let mut reports: Vec<StageReport> = Vec::with_capacity(StageName::ORDERED.len());
        let mut degraded = false;

        while let Some(stage_name) = state.next_stage() {
            let step_started = Instant::now();

            let step = match self.chain.get(stage_name) {
                Some(stage) => self.guarded_step(stage, &record).await,
                None => StepResult {
                    outcome: Outcome::Failure(Failure::terminal(
                        ErrorKind::Internal,
                        format!("{} stage is not configured", stage_name),
                    )),
                    attempts: 0,
                    fetch_attempts: 0,
                },
            };
            let elapsed_ms = step_started.elapsed().as_millis() as u64;

            let (status, gate) = match step.outcome {
                Outcome::Success(output) => {
                    let gate = self.chain.get(stage_name).and_then(|s| s.policy_gate(&output));
                    record.bag.insert(output);
                    (StageStatus::Completed, gate)
                }
                Outcome::PartialSuccess { value, reason } => {
                    degraded = true;
                    let gate = self.chain.get(stage_name).and_then(|s| s.policy_gate(&value));
                    record.bag.insert(value);
                    (StageStatus::Degraded { reason }, gate)
                }
                Outcome::Failure(failure) => {
                    warn!(
                        batch_id = %batch_id,
                        record_key = %record.key,
                        stage = %stage_name,
                        kind = %failure.kind,
                        error = %failure.message,
                        "Stage failed"
                    );
                    (
                        StageStatus::Failed {
                            kind: failure.kind,
                            message: failure.message,
                        },
                        None,
                    )
                }
            };

            self.emit_stage(batch_id, &record.key, stage_name, &status);
            let failed = matches!(status, StageStatus::Failed { .. });
            reports.push(StageReport {
                stage: stage_name,
                status,
                attempts: step.attempts,
                fetch_attempts: step.fetch_attempts,
                elapsed_ms,
            });

            if failed {
                let skip = SkipReason::Failure { stage: stage_name };
                self.skip_following(batch_id, &record.key, stage_name, &mut reports, &skip);
                state = RecordState::Failed { stage: stage_name };
                break;
            }

            state = state
                .advance(stage_name)
                .unwrap_or(RecordState::Failed { stage: stage_name });

            if let Some(reason) = gate {
                debug!(
                    batch_id = %batch_id,
                    record_key = %record.key,
                    stage = %stage_name,
                    reason = %reason,
                    "Policy gate stopped record"
                );
                let skip = SkipReason::Policy {
                    stage: stage_name,
                    reason,
                };
                self.skip_following(batch_id, &record.key, stage_name, &mut reports, &skip);
                state = RecordState::Skipped { reason: skip };
                break;
            }
        }

        let status = match &state {
            RecordState::Prioritized if degraded => RecordStatus::Degraded,
            RecordState::Prioritized => RecordStatus::Succeeded,
            RecordState::Skipped {
                reason: SkipReason::Policy { .. },
            } => RecordStatus::Filtered,
            RecordState::Skipped {
                reason: SkipReason::Cancelled,
            } => RecordStatus::Cancelled,
            _ => RecordStatus::Failed,
        };

        if let Some(events) = self.events {
            events.emit_lossy(PipelineEvent::RecordFinished {
                batch_id,
                record_key: record.key.clone(),
                input_index: record.input_index,
                status: status.label().to_string(),
            });
        }

        debug!(
            batch_id = %batch_id,
            record_key = %record.key,
            status = status.label(),
            "Record finished"
        );

        RecordOutcome {
            input_index: record.input_index,
            key: record.key,
            status,
            state,
            stages: reports,
            fields: record.fields,
            enrichment: record.bag,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// One stage step with panic isolation
    async fn guarded_step(&self, stage: &dyn Stage, record: &Record) -> StepResult {
        match AssertUnwindSafe(self.step(stage, record)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    record_key = %record.key,
                    stage = %stage.name(),
                    panic = %message,
                    "Stage panicked"
                );
                StepResult {
                    outcome: Outcome::Failure(Failure::terminal(
                        ErrorKind::Internal,
                        format!("stage panicked: {}", message),
                    )),
                    attempts: 1,
                    fetch_attempts: 0,
                }
            }
        }
    }

    async fn step(&self, stage: &dyn Stage, record: &Record) -> StepResult {
        let mut attempts = 0;
        let mut fetch_attempts = 0;

        loop {
            attempts += 1;
            let fetched = self.fetchers.fetch_for(stage.dependencies(), record).await;
            fetch_attempts += fetched.attempts();

            match stage.evaluate(record, &fetched) {
                Outcome::Failure(failure) if failure.retriable && attempts < self.stage_attempts => {
                    debug!(
                        record_key = %record.key,
                        stage = %stage.name(),
                        attempt = attempts,
                        error = %failure.message,
                        "Retriable stage failure, re-running stage"
                    );
                }
                Outcome::Failure(mut failure) if failure.retriable => {
                    failure.retriable = false;
                    failure.message = format!(
                        "{} (after {} stage attempts)",
                        failure.message, attempts
                    );
                    return StepResult {
                        outcome: Outcome::Failure(failure),
                        attempts,
                        fetch_attempts,
                    };
                }
                outcome => {
                    return StepResult {
                        outcome,
                        attempts,
                        fetch_attempts,
                    }
                }
            }
        }
    }

    fn skip_following(
        &self,
        batch_id: Uuid,
        record_key: &str,
        stage: StageName,
        reports: &mut Vec<StageReport>,
        reason: &SkipReason,
    ) {
        for following in stage.following() {
            let report = StageReport::skipped(*following, reason.clone());
            self.emit_stage(batch_id, record_key, *following, &report.status);
            reports.push(report);
        }
    }

    fn emit_stage(&self, batch_id: Uuid, record_key: &str, stage: StageName, status: &StageStatus) {
        if let Some(events) = self.events {
            events.emit_lossy(PipelineEvent::StageFinished {
                batch_id,
                record_key: record_key.to_string(),
                stage: stage.as_str().to_string(),
                status: status.label().to_string(),
            });
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
