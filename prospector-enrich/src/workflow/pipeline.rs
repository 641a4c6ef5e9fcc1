//! Enrichment Pipeline
//!
//! Entry point for a batch. Owns the stage chain and the shared source
//! fetchers (caches and rate budgets persist across batches run on the same
//! pipeline), and assembles the Batch Result.

use super::runner::RecordRunner;
use super::scheduler::BatchScheduler;
use crate::aggregate::{aggregate, BatchMeta, BatchResult};
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::fetchers::{SourceClients, SourceFetchers, SourceStats};
use crate::stages::StageChain;
use crate::types::{Record, RecordFields};
use prospector_common::events::{EventBus, PipelineEvent};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Multi-stage prospect enrichment pipeline
pub struct EnrichmentPipeline {
    config: PipelineConfig,
    chain: StageChain,
    fetchers: SourceFetchers,
    events: EventBus,
}

impl EnrichmentPipeline {
    /// Build a pipeline
    ///
    /// Configuration is validated here; an invalid configuration is rejected
    /// before any record is processed.
    pub fn new(config: PipelineConfig, clients: SourceClients) -> PipelineResult<Self> {
        config.validate()?;
        let fetchers = SourceFetchers::new(&config, clients)?;
        let chain = StageChain::standard(&config);
        let events = EventBus::new(config.batch.event_capacity);

        info!(
            group_size = config.batch.group_size,
            concurrency = config.batch.effective_concurrency(),
            pacing_delay_ms = config.batch.pacing_delay_ms,
            stage_attempts = config.batch.stage_attempts,
            "Enrichment pipeline ready"
        );

        Ok(Self {
            config,
            chain,
            fetchers,
            events,
        })
    }

    /// Pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Event bus for progress reporting
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Shared fetchers (caches, budgets, counters)
    pub fn fetchers(&self) -> &SourceFetchers {
        &self.fetchers
    }

    /// Per-source counters accumulated so far
    pub fn source_stats(&self) -> Vec<SourceStats> {
        self.fetchers.stats()
    }

    /// Run one batch to completion or cancellation
    ///
    /// Always returns a Batch Result with exactly one outcome per input
    /// record. Per-record failures are reported in the result, never raised.
    pub async fn run_batch(
        &self,
        inputs: Vec<RecordFields>,
        cancel: CancellationToken,
    ) -> BatchResult {
        let batch_id = Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let started = Instant::now();
        let batch = &self.config.batch;

        let records: Vec<Record> = inputs
            .into_iter()
            .enumerate()
            .map(|(index, fields)| Record::new(index, fields))
            .collect();
        let total_records = records.len();
        let total_groups = total_records.div_ceil(batch.group_size.max(1));

        info!(
            batch_id = %batch_id,
            total_records,
            total_groups,
            "Batch started"
        );
        self.events.emit_lossy(PipelineEvent::BatchStarted {
            batch_id,
            total_records,
            total_groups,
            timestamp: started_at,
        });

        let runner = RecordRunner::new(
            &self.chain,
            &self.fetchers,
            batch.stage_attempts,
            Some(&self.events),
        );
        let scheduler = BatchScheduler::new(runner, batch, Some(&self.events));
        let scheduled = scheduler.run(batch_id, records, &cancel).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let finished_at = chrono::Utc::now();
        let result = aggregate(
            BatchMeta {
                batch_id,
                started_at,
                finished_at,
                elapsed_ms,
                cancelled: scheduled.cancelled,
            },
            scheduled.outcomes,
            batch.top_k,
            self.fetchers.stats(),
        );

        let summary = &result.summary;
        info!(
            batch_id = %batch_id,
            total = summary.total,
            succeeded = summary.succeeded,
            degraded = summary.degraded,
            filtered = summary.filtered,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms,
            "Batch finished"
        );
        self.events.emit_lossy(PipelineEvent::BatchFinished {
            batch_id,
            succeeded: summary.succeeded + summary.degraded,
            failed: summary.failed,
            elapsed_ms,
            timestamp: finished_at,
        });

        result
    }
}
