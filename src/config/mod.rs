//! Configuration module for emlink.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `EMLINK_CONFIG` environment variable (explicit path)
//! 2. `./emlink.toml` (current directory)
//! 3. `emlink.toml` in the platform config directory
//!    (`~/.config/emlink/` on Linux, `%APPDATA%\emlink\config\` on Windows)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Any configuration value can be overridden via environment variables.
//! The pattern is: `EMLINK_<SECTION>_<KEY>`
//!
//! Examples:
//! - `EMLINK_DEVICE_PORT=/dev/ttyACM0`
//! - `EMLINK_TIMEOUTS_BULK_MS=600000`
//! - `EMLINK_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```rust,no_run
//! use energymeter_link::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("LOAD-ALL timeout: {:?}", config.timeouts.budget().bulk);
//! # Ok::<(), energymeter_link::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, DeviceConfig, LogFormat, LoggingConfig, OutputConfig, TimeoutsConfig};
