//! Configuration management for DriverLedger
//!
//! This crate handles loading and validating `<data_dir>/config.toml`

use ledger_common::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the configuration inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (set programmatically, not in TOML)
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Sync policy settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Local storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Reachability probe settings
    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Sync configuration ([sync])
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random delay added to every backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Failed attempts before an entry is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Background full refresh interval
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_refresh_interval_secs() -> u64 {
    300
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_retries: default_max_retries(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Storage configuration ([storage])
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// SQLite file, relative to the data directory
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_db_file() -> String {
    "ledger.db".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
        }
    }
}

/// Connectivity configuration ([connectivity])
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectivitySettings {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

/// Logging configuration ([logging])
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Default configuration rooted at `data_dir`
    pub fn with_defaults(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            sync: SyncSettings::default(),
            storage: StorageSettings::default(),
            connectivity: ConnectivitySettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// Load configuration from the data directory
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::debug!("No config at {:?}, using defaults", config_path);
            return Ok(Self::with_defaults(data_dir));
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sync engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        if sync.max_retries == 0 {
            return Err(LedgerError::ConfigError(
                "sync.max_retries must be at least 1".to_string(),
            ));
        }
        if sync.base_delay_ms > sync.max_delay_ms {
            return Err(LedgerError::ConfigError(format!(
                "sync.base_delay_ms ({}) exceeds sync.max_delay_ms ({})",
                sync.base_delay_ms, sync.max_delay_ms
            )));
        }
        if sync.refresh_interval_secs == 0 {
            return Err(LedgerError::ConfigError(
                "sync.refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.storage.db_file.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "storage.db_file cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the local SQLite store
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.db_file)
    }

    /// Render as TOML (used by `ledger init`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to render config: {}", e)))
    }
}
