//! Batch Scheduler
//!
//! Splits a batch into fixed-size groups and runs each group with bounded
//! concurrency, pausing between groups.
//!
//! Cancellation is cooperative: once the token fires, no new group starts
//! and no not-yet-started record of the current group starts. Records
//! already in flight finish (their source calls are bounded by timeouts).
//! Every record that never started is reported as cancelled.

use super::runner::RecordRunner;
use crate::aggregate::RecordOutcome;
use crate::config::BatchConfig;
use crate::types::{Record, RecordStatus};
use futures::stream::{self, StreamExt};
use prospector_common::events::{EventBus, PipelineEvent};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Records from one scheduler run
#[derive(Debug)]
pub struct ScheduledBatch {
    /// One outcome per input record, in completion order
    pub outcomes: Vec<RecordOutcome>,
    /// Cancellation was observed before every record started
    pub cancelled: bool,
}

/// Groups, concurrency bound and pacing for one batch
pub struct BatchScheduler<'a> {
    runner: RecordRunner<'a>,
    batch: &'a BatchConfig,
    events: Option<&'a EventBus>,
}

impl<'a> BatchScheduler<'a> {
    /// Create a scheduler
    pub fn new(runner: RecordRunner<'a>, batch: &'a BatchConfig, events: Option<&'a EventBus>) -> Self {
        Self {
            runner,
            batch,
            events,
        }
    }

    /// Split records into groups of `group_size` (the last may be shorter)
    pub fn groups(&self, records: Vec<Record>) -> Vec<Vec<Record>> {
        let size = self.batch.group_size.max(1);
        let mut groups = Vec::with_capacity(records.len().div_ceil(size));
        let mut current = Vec::with_capacity(size);
        for record in records {
            current.push(record);
            if current.len() == size {
                groups.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Run every group in order
    pub async fn run(
        &self,
        batch_id: Uuid,
        records: Vec<Record>,
        cancel: &CancellationToken,
    ) -> ScheduledBatch {
        let groups = self.groups(records);
        let total_groups = groups.len();
        let concurrency = self.batch.effective_concurrency();
        let pacing = Duration::from_millis(self.batch.pacing_delay_ms);

        let mut outcomes: Vec<RecordOutcome> = Vec::new();
        let mut cancelled = false;

        for (group_index, group) in groups.into_iter().enumerate() {
            if cancel.is_cancelled() {
                if !cancelled {
                    cancelled = true;
                    self.announce_cancel(batch_id, &outcomes);
                }
                outcomes.extend(group.into_iter().map(RecordOutcome::cancelled));
                continue;
            }

            info!(
                batch_id = %batch_id,
                group_index,
                total_groups,
                group_size = group.len(),
                "Starting group"
            );
            self.emit(PipelineEvent::GroupStarted {
                batch_id,
                group_index,
                group_size: group.len(),
            });

            let runner = &self.runner;
            let results: Vec<RecordOutcome> = stream::iter(group)
                .map(|record| {
                    let cancel = cancel.clone();
                    async move {
                        if cancel.is_cancelled() {
                            RecordOutcome::cancelled(record)
                        } else {
                            runner.run(batch_id, record).await
                        }
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            outcomes.extend(results);

            self.emit(PipelineEvent::GroupFinished {
                batch_id,
                group_index,
                records_processed: outcomes.len(),
            });

            let more_groups = group_index + 1 < total_groups;
            if more_groups && !pacing.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pacing) => {}
                }
            }
        }

        // Cancellation inside the last group never reaches the loop head
        if !cancelled && outcomes.iter().any(|o| o.status == RecordStatus::Cancelled) {
            cancelled = true;
            self.announce_cancel(batch_id, &outcomes);
        }

        ScheduledBatch {
            outcomes,
            cancelled,
        }
    }

    fn announce_cancel(&self, batch_id: Uuid, outcomes: &[RecordOutcome]) {
        let records_processed = outcomes
            .iter()
            .filter(|o| o.status != RecordStatus::Cancelled)
            .count();
        info!(
            batch_id = %batch_id,
            records_processed,
            "Batch cancelled, no further records will start"
        );
        self.emit(PipelineEvent::BatchCancelled {
            batch_id,
            records_processed,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = self.events {
            events.emit_lossy(event);
        }
    }
}
