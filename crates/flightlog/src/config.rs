//! Configuration management for flightlog.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::buffer::{BLOCK_SIZE, MIN_BLOCKS};
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flightlog";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "FLIGHTLOG_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTLOG_`, sections separated
///    by a double underscore, e.g. `FLIGHTLOG_MEDIATOR__POLL_INTERVAL_MS`)
/// 2. TOML config file at `~/.config/flightlog/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage device configuration.
    pub storage: StorageConfig,
    /// Storage worker configuration.
    pub mediator: MediatorConfig,
    /// Telemetry stream configuration.
    pub stream: StreamConfig,
}

/// Storage device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that backs the storage device.
    /// Defaults to `~/.local/share/flightlog`
    pub root: Option<PathBuf>,
    /// Name of the session counter file on the device.
    pub session_file: String,
    /// Highest session number before the counter wraps to zero.
    pub session_max: u32,
    /// Number of slots in the handle table.
    pub max_handles: usize,
}

/// Storage worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Longest the worker sleeps between cycles when nobody wakes it.
    pub poll_interval_ms: u64,
    /// Stream handles are synced once every this many cycles.
    pub stream_sync_cycles: u64,
    /// Wait before retrying a failed mount or remounting after a stream
    /// failure.
    pub remount_delay_ms: u64,
    /// Drain granularity of stream rings.
    pub block_size: usize,
}

/// Telemetry stream configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Logical stream name; logs are written as `NNN-<name>.LOG`.
    pub name: String,
    /// Ring buffer capacity in bytes.
    pub capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None, // Will be resolved to default at runtime
            session_file: "SESSION.TXT".to_string(),
            session_max: 999,
            max_handles: 8,
        }
    }
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            stream_sync_cycles: 100,
            remount_delay_ms: 1000,
            block_size: BLOCK_SIZE,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "AQL".to_string(),
            capacity: 32 * BLOCK_SIZE,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(|c: char| c == '/' || c == '\\') && name != "." && name != ".."
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `FLIGHTLOG_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_handles == 0 {
            return Err(invalid("max_handles must be greater than 0"));
        }

        if !is_plain_name(&self.storage.session_file) {
            return Err(invalid(format!(
                "session_file must be a plain file name, got '{}'",
                self.storage.session_file
            )));
        }

        if self.mediator.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }

        if self.mediator.stream_sync_cycles == 0 {
            return Err(invalid("stream_sync_cycles must be greater than 0"));
        }

        if self.mediator.block_size == 0 {
            return Err(invalid("block_size must be greater than 0"));
        }

        // Keeps every drained span block-aligned across wrap-around.
        if self.stream.capacity % self.mediator.block_size != 0 {
            return Err(invalid(format!(
                "stream capacity ({}) must be a multiple of block_size ({})",
                self.stream.capacity, self.mediator.block_size
            )));
        }

        // The ring holds one byte less than its capacity.
        if self.stream.capacity < MIN_BLOCKS * self.mediator.block_size {
            return Err(invalid(format!(
                "stream capacity ({}) must hold at least {MIN_BLOCKS} blocks of {} bytes",
                self.stream.capacity, self.mediator.block_size
            )));
        }

        if !is_plain_name(&self.stream.name) {
            return Err(invalid(format!(
                "stream name must be a plain file name, got '{}'",
                self.stream.name
            )));
        }

        Ok(())
    }

    /// Get the storage root, resolving defaults if not set.
    #[must_use]
    pub fn storage_root(&self) -> PathBuf {
        self.storage
            .root
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.mediator.poll_interval_ms)
    }

    /// Get the remount delay as a Duration.
    #[must_use]
    pub fn remount_delay(&self) -> Duration {
        Duration::from_millis(self.mediator.remount_delay_ms)
    }
}
