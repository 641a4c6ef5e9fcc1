//! Tracing subscriber initialisation
//!
//! Called once by binaries. Library code only emits events.

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the EnvFilter: `RUST_LOG` if set, otherwise the configured level
pub fn build_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&logging.level).map_err(|e| {
            Error::Config(format!("Invalid log level '{}': {}", logging.level, e))
        }),
    }
}

/// Install the global tracing subscriber
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = build_filter(logging)?;

    let result = match logging.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init(),
    };

    result.map_err(|e| Error::Logging(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_config_error() {
        // Only meaningful when RUST_LOG is unset
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let logging = LoggingConfig {
            level: "prospector=notalevel".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(matches!(build_filter(&logging), Err(Error::Config(_))));
    }

    #[test]
    fn test_directive_level_accepted() {
        let logging = LoggingConfig {
            level: "prospector_enrich=debug,info".to_string(),
            format: LogFormat::Json,
        };
        assert!(build_filter(&logging).is_ok());
    }
}
