//! Application configuration.
//!
//! Stored as TOML in the platform data directory. A missing file yields the
//! defaults; missing sections or keys fall back to their defaults as well.

use crate::metrics::cadence::DEFAULT_MAX_CADENCE_RPM;
use crate::sensors::queue::{QueueConfig, DEVICE_INTERVAL, MIN_INTERVAL};
use crate::sensors::trainer::TrainerCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_filter: String,
    /// Command queue timing
    pub queue: QueueSettings,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Trainer capability limits
    pub trainer: TrainerCapabilities,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            log_filter: "info".to_string(),
            queue: QueueSettings::default(),
            sensors: SensorSettings::default(),
            trainer: TrainerCapabilities::default(),
        }
    }
}

/// Command queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Spacing after a normal command in milliseconds
    pub min_interval_ms: u64,
    /// Spacing after a device setup step in milliseconds
    pub device_interval_ms: u64,
    /// Per-operation timeout in milliseconds, disabled when absent
    pub operation_timeout_ms: Option<u64>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: MIN_INTERVAL.as_millis() as u64,
            device_interval_ms: DEVICE_INTERVAL.as_millis() as u64,
            operation_timeout_ms: None,
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            min_interval: Duration::from_millis(self.min_interval_ms),
            device_interval: Duration::from_millis(self.device_interval_ms),
            operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Scan duration in seconds
    pub scan_duration_secs: u64,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Cadence values above this are discarded as noise
    pub max_cadence_rpm: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            scan_duration_secs: 10,
            connection_timeout_secs: 10,
            max_cadence_rpm: DEFAULT_MAX_CADENCE_RPM,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridelink", "RideLink")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from `path`. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save configuration to `path`, creating parent directories.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
