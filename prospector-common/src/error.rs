//! Errors shared by the Prospector crates

use thiserror::Error;

/// Common result type for Prospector operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bootstrap configuration and logging errors
#[derive(Error, Debug)]
pub enum Error {
    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracing subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}
