//! Errors from loading `emlink.toml` and its `EMLINK_*` overrides.

use std::path::PathBuf;
use thiserror::Error;

/// Why the meter client configuration could not be built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--config` or `EMLINK_CONFIG` named a file that isn't there
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML, or a key of the wrong type
    #[error("Failed to parse configuration '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value out of range, such as a zero timeout or an empty bundle name
    #[error("Invalid configuration value for '{key}': {message}")]
    ValidationError { key: String, message: String },

    /// An `EMLINK_<SECTION>_<KEY>` override that doesn't parse
    #[error("Failed to parse environment variable '{var}': {message}")]
    EnvParseError { var: String, message: String },
}

impl ConfigError {
    /// A rejected value; `key` is its dotted path, e.g. `timeouts.control_ms`.
    pub fn validation<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env_parse<V: Into<String>, M: Into<String>>(var: V, message: M) -> Self {
        Self::EnvParseError {
            var: var.into(),
            message: message.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
