//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "EMLINK";

/// Config file name
const CONFIG_FILE_NAME: &str = "emlink.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "EMLINK_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `EMLINK_CONFIG` environment variable (explicit path, must exist)
    /// 2. `./emlink.toml` (current directory)
    /// 3. `emlink.toml` in the platform config directory
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path()?;
        let config = match &config_path {
            Some(path) => load_from_file(path)?,
            None => Config::default(),
        };
        Self::finish(config_path, config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let config = load_from_file(&path)?;
        Self::finish(Some(path), config)
    }

    /// Create a loader with default configuration (no file). Environment
    /// overrides still apply.
    pub fn with_defaults() -> ConfigResult<Self> {
        Self::finish(None, Config::default())
    }

    fn finish(config_path: Option<PathBuf>, mut config: Config) -> ConfigResult<Self> {
        apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(Self { config_path, config })
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> ConfigResult<Option<PathBuf>> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(Some(path));
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    Ok(get_default_config_path().filter(|path| path.exists()))
}

/// Get the platform-specific config file path, whether or not it exists.
pub fn get_default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "emlink").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment variable overrides to the configuration.
///
/// Variables follow the pattern `EMLINK_<SECTION>_<KEY>`, for example
/// `EMLINK_DEVICE_PORT=/dev/ttyACM0` or `EMLINK_TIMEOUTS_BULK_MS=600000`.
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> ConfigResult<()> {
    let var = |key: &str| format!("{ENV_PREFIX}_{key}");

    if let Some(val) = lookup(&var("DEVICE_PORT")) {
        config.device.port = Some(val);
    }
    if let Some(val) = lookup(&var("DEVICE_PRESENCE_POLL_MS")) {
        config.device.presence_poll_ms = parse_env(&var("DEVICE_PRESENCE_POLL_MS"), &val)?;
    }

    if let Some(val) = lookup(&var("TIMEOUTS_CONTROL_MS")) {
        config.timeouts.control_ms = parse_env(&var("TIMEOUTS_CONTROL_MS"), &val)?;
    }
    if let Some(val) = lookup(&var("TIMEOUTS_LIST_MS")) {
        config.timeouts.list_ms = parse_env(&var("TIMEOUTS_LIST_MS"), &val)?;
    }
    if let Some(val) = lookup(&var("TIMEOUTS_BULK_MS")) {
        config.timeouts.bulk_ms = parse_env(&var("TIMEOUTS_BULK_MS"), &val)?;
    }

    if let Some(val) = lookup(&var("OUTPUT_DIRECTORY")) {
        config.output.directory = PathBuf::from(val);
    }
    if let Some(val) = lookup(&var("OUTPUT_BUNDLE_NAME")) {
        config.output.bundle_name = val;
    }

    if let Some(val) = lookup(&var("LOGGING_LEVEL")) {
        config.logging.level = val;
    }
    if let Some(val) = lookup(&var("LOGGING_FORMAT")) {
        config.logging.format = parse_env(&var("LOGGING_FORMAT"), &val)?;
    }

    Ok(())
}

fn parse_env<T>(var: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::env_parse(var, format!("`{value}`: {e}")))
}
