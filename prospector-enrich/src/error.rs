//! Error types for prospector-enrich
//!
//! Per-record failures never surface here: they are carried as
//! [`crate::types::Failure`] inside stage outcomes. `PipelineError` covers
//! batch-level problems (configuration, input, setup) that stop a batch
//! before any record is processed.

use thiserror::Error;

/// Batch-level pipeline error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or inconsistent configuration (rejected before any record runs)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input records could not be read
    #[error("Input error: {0}")]
    Input(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// JSON (de)serialisation error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// prospector-common error
    #[error("Common error: {0}")]
    Common(#[from] prospector_common::Error),
}

/// Result type alias for batch-level operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
