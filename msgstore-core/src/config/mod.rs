//! Configuration management
//!
//! Settings come from defaults, a TOML file, or `MSGSTORE_*` environment
//! variables. Every loader validates before returning.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod error;

pub use error::ConfigError;

use crate::logging::LogLevel;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Record store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Record store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding snapshots and the event log
    pub data_dir: PathBuf,

    /// Append change events to `events.log` instead of keeping them in memory
    pub persist_events: bool,

    /// Number of snapshots retained after each commit
    pub snapshot_keep: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            persist_events: true,
            snapshot_keep: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn parse_var<T>(name: &str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var: name.to_string(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `MSGSTORE_<SECTION>_<KEY>`, e.g.
    /// `MSGSTORE_STORE_DATA_DIR=/var/lib/msgstore`. Unset variables keep
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(data_dir) = env::var("MSGSTORE_STORE_DATA_DIR") {
            config.store.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(persist) = env::var("MSGSTORE_STORE_PERSIST_EVENTS") {
            config.store.persist_events = parse_var("MSGSTORE_STORE_PERSIST_EVENTS", persist)?;
        }
        if let Ok(keep) = env::var("MSGSTORE_STORE_SNAPSHOT_KEEP") {
            config.store.snapshot_keep = parse_var("MSGSTORE_STORE_SNAPSHOT_KEEP", keep)?;
        }

        if let Ok(level) = env::var("MSGSTORE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("MSGSTORE_LOG_JSON") {
            config.logging.json_format = parse_var("MSGSTORE_LOG_JSON", json)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.snapshot_keep == 0 {
            return Err(ConfigError::ValidationFailed(
                "snapshot_keep must be greater than 0".to_string(),
            ));
        }

        if self.logging.level.parse::<LogLevel>().is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}
