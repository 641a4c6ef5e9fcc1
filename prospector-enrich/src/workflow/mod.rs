//! Batch workflow
//!
//! - [`pipeline`]: batch entry point and result assembly
//! - [`scheduler`]: grouping, bounded concurrency, pacing, cancellation
//! - [`runner`]: one record through the stage chain

pub mod pipeline;
pub mod runner;
pub mod scheduler;

pub use pipeline::EnrichmentPipeline;
pub use runner::RecordRunner;
pub use scheduler::{BatchScheduler, ScheduledBatch};
