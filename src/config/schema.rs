//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! Every section has defaults, so an empty file is a valid configuration.

use super::error::{ConfigError, ConfigResult};
use crate::connector::DEFAULT_PRESENCE_POLL;
use crate::protocol::TimeoutBudget;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device selection and link monitoring
    pub device: DeviceConfig,
    /// Per-command response timeouts
    pub timeouts: TimeoutsConfig,
    /// Where downloaded files are written
    pub output: OutputConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("device.presence_poll_ms", self.device.presence_poll_ms),
            ("timeouts.control_ms", self.timeouts.control_ms),
            ("timeouts.list_ms", self.timeouts.list_ms),
            ("timeouts.bulk_ms", self.timeouts.bulk_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::validation(key, "must be greater than zero"));
            }
        }
        if self.output.bundle_name.trim().is_empty() {
            return Err(ConfigError::validation("output.bundle_name", "must not be empty"));
        }
        if let Some(port) = &self.device.port {
            if port.trim().is_empty() {
                return Err(ConfigError::validation("device.port", "must not be empty when set"));
            }
        }
        Ok(())
    }
}

/// Device section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Port path; skips USB discovery when set
    pub port: Option<String>,
    /// Interval between presence checks, in milliseconds
    pub presence_poll_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            presence_poll_ms: DEFAULT_PRESENCE_POLL.as_millis() as u64,
        }
    }
}

impl DeviceConfig {
    pub fn presence_poll(&self) -> Duration {
        Duration::from_millis(self.presence_poll_ms)
    }
}

/// Timeouts section. Each value bounds the wait for the next byte of a
/// response, not the whole transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// SET-ID, SET-RTC, LOAD-INFO, DELETE-*
    pub control_ms: u64,
    /// LOAD-LIST
    pub list_ms: u64,
    /// LOAD-ALL, LOAD-ONE
    pub bulk_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let budget = TimeoutBudget::default();
        Self {
            control_ms: budget.control.as_millis() as u64,
            list_ms: budget.list.as_millis() as u64,
            bulk_ms: budget.bulk.as_millis() as u64,
        }
    }
}

impl TimeoutsConfig {
    pub fn budget(&self) -> TimeoutBudget {
        TimeoutBudget {
            control: Duration::from_millis(self.control_ms),
            list: Duration::from_millis(self.list_ms),
            bulk: Duration::from_millis(self.bulk_ms),
        }
    }
}

/// Output section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory downloads are written to
    pub directory: PathBuf,
    /// File name of the LOAD-ALL archive
    pub bundle_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            bundle_name: "log.zip".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn bundle_path(&self) -> PathBuf {
        self.directory.join(&self.bundle_name)
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}
