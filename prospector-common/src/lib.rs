//! # Prospector Common Library
//!
//! Shared code for the Prospector workspace including:
//! - Common error type
//! - Bootstrap TOML configuration and config-file resolution
//! - Tracing initialisation
//! - Pipeline event types and the broadcast EventBus
//! - Human-readable elapsed time formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod logging;

pub use error::{Error, Result};
