//! prospector-enrich library interface
//!
//! Multi-stage enrichment pipeline: N prospect records in, one Batch Result
//! out. Each record passes through Performance → Enrichment →
//! Financial-Leak → Qualification → Priority, backed by rate-limited,
//! cached, retried calls to four external sources.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetchers;
pub mod input;
pub mod rate_limiter;
pub mod sources;
pub mod stages;
pub mod types;
pub mod workflow;

pub use crate::aggregate::{BatchResult, RankedProspect, RecordOutcome};
pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::fetchers::SourceClients;
pub use crate::types::{Record, RecordFields, RecordStatus};
pub use crate::workflow::EnrichmentPipeline;
