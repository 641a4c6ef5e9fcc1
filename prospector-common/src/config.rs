//! Bootstrap configuration loading and config-file resolution
//!
//! The bootstrap file carries logging settings, per-source credentials and a
//! raw `[pipeline]` table that the service crate deserializes into its own
//! typed configuration.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `PROSPECTOR_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/prospector/config.toml` on Linux)
//! 4. Compiled defaults (no file)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PROSPECTOR_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Credentials keyed by source name (e.g. "performance", "registry")
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,

    /// User-Agent sent with every external request
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Raw pipeline settings, interpreted by the pipeline crate
    #[serde(default)]
    pub pipeline: toml::Table,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full EnvFilter directive (e.g. "info", "prospector_enrich=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a resolved configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicit command-line path
    CommandLine(PathBuf),
    /// Path from `PROSPECTOR_CONFIG`
    Environment(PathBuf),
    /// Platform config directory
    UserConfig(PathBuf),
    /// No file found, compiled defaults in use
    Defaults,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::UserConfig(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolves which config file to load
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create resolver with optional command-line override
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Resolve config source following the documented priority order
    pub fn resolve(&self) -> ConfigSource {
        if let Some(path) = &self.cli_path {
            return ConfigSource::CommandLine(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return ConfigSource::Environment(PathBuf::from(path));
            }
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return ConfigSource::UserConfig(path);
            }
        }

        ConfigSource::Defaults
    }

    /// Resolve and load the bootstrap config
    ///
    /// An explicitly named file (CLI or ENV) that cannot be read is an error.
    /// Absence of the platform default file is not.
    pub fn load(&self) -> Result<(TomlConfig, ConfigSource)> {
        let source = self.resolve();
        let config = match source.path() {
            Some(path) => load_toml_config(path)?,
            None => {
                warn!("No config file found, using compiled defaults");
                TomlConfig::default()
            }
        };
        Ok((config, source))
    }
}

/// Platform config file path (`<config_dir>/prospector/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("prospector").join("config.toml"))
}

/// Load bootstrap config from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let config: TomlConfig = toml::from_str(&content)?;
    info!(path = %path.display(), "Loaded config file");
    Ok(config)
}

/// Resolve a credential for a source
///
/// **Priority:** ENV (`PROSPECTOR_<SOURCE>_API_KEY`) → TOML `[api_keys]`
///
/// Blank values are treated as absent.
pub fn resolve_api_key(source: &str, toml_config: &TomlConfig) -> Option<String> {
    let env_name = api_key_env_var(source);
    let env_key = std::env::var(&env_name).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .api_keys
        .get(source)
        .filter(|k| is_valid_key(k))
        .cloned();

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            source,
            "API key found in both {} and TOML config, using environment", env_name
        );
    }

    env_key.or(toml_key)
}

/// Environment variable holding the API key for a source
pub fn api_key_env_var(source: &str) -> String {
    format!(
        "PROSPECTOR_{}_API_KEY",
        source.to_ascii_uppercase().replace('-', "_")
    )
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
