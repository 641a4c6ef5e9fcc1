//! Pipeline event types and EventBus
//!
//! Events are broadcast via [`EventBus`] for progress reporting. Emission is
//! lossy: a pipeline never blocks or fails because nobody is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info};
use uuid::Uuid;

/// Enrichment pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Batch accepted and about to start its first group
    BatchStarted {
        /// Batch identifier
        batch_id: Uuid,
        /// Number of input records
        total_records: usize,
        /// Number of groups the batch was split into
        total_groups: usize,
        /// When the batch started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Group of records started
    GroupStarted {
        /// Batch identifier
        batch_id: Uuid,
        /// Group index (0-based)
        group_index: usize,
        /// Records in this group
        group_size: usize,
    },

    /// One stage reached a terminal status for one record
    StageFinished {
        /// Batch identifier
        batch_id: Uuid,
        /// Record key (domain or company key)
        record_key: String,
        /// Stage name
        stage: String,
        /// Terminal status label (e.g. "completed", "degraded", "failed")
        status: String,
    },

    /// Record left the pipeline
    RecordFinished {
        /// Batch identifier
        batch_id: Uuid,
        /// Record key
        record_key: String,
        /// Input position of the record
        input_index: usize,
        /// Record status label (e.g. "succeeded", "failed")
        status: String,
    },

    /// Group finished (all records terminal)
    GroupFinished {
        /// Batch identifier
        batch_id: Uuid,
        /// Group index (0-based)
        group_index: usize,
        /// Records processed so far across the batch
        records_processed: usize,
    },

    /// Cancellation observed; no further groups will start
    BatchCancelled {
        /// Batch identifier
        batch_id: Uuid,
        /// Records that had reached a terminal state
        records_processed: usize,
    },

    /// Batch finished (fully or after cancellation)
    BatchFinished {
        /// Batch identifier
        batch_id: Uuid,
        /// Records that reached the final stage
        succeeded: usize,
        /// Records that failed
        failed: usize,
        /// Wall-clock duration in milliseconds
        elapsed_ms: u64,
        /// When the batch finished
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for [`PipelineEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Log progress from `rx` until the batch finishes or the bus closes
///
/// Lagging behind the bus drops the oldest events but keeps listening.
/// Returns the number of events received.
pub async fn log_progress(mut rx: broadcast::Receiver<PipelineEvent>) -> usize {
    let mut received = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                received += 1;
                match event {
                    PipelineEvent::GroupFinished {
                        group_index,
                        records_processed,
                        ..
                    } => info!(group_index, records_processed, "Group finished"),
                    PipelineEvent::BatchFinished { .. } => break,
                    other => debug!(event = ?other, "Pipeline event"),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "Progress logger lagged behind pipeline events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    received
}
