//! Chassis configuration.
//!
//! Settings come from, in increasing priority: built-in defaults, an
//! optional TOML file, and `SEPIA_*` environment variables.
//!
//! ```toml
//! device_index = 0
//! restart = false
//! verbose = false
//! reset_sequencer = true
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::MAX_DEVICE_INDEX;

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "SEPIA_";

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// How to open a chassis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChassisConfig {
    /// USB device index, 0..=7.
    #[serde(default)]
    pub device_index: i32,
    /// Reboot the firmware while reading the module map.
    #[serde(default)]
    pub restart: bool,
    /// Log every discovered module at info level.
    #[serde(default)]
    pub verbose: bool,
    /// Put the sequencer into free-running mode with AUX OUT off on open.
    #[serde(default = "default_reset_sequencer")]
    pub reset_sequencer: bool,
}

fn default_reset_sequencer() -> bool {
    true
}

impl Default for ChassisConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            restart: false,
            verbose: false,
            reset_sequencer: default_reset_sequencer(),
        }
    }
}

impl ChassisConfig {
    /// Defaults with a different device index.
    pub fn for_device(device_index: i32) -> Self {
        Self {
            device_index,
            ..Self::default()
        }
    }

    /// Check values the loader cannot check by type.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(0..=MAX_DEVICE_INDEX).contains(&self.device_index) {
            return Err(ConfigError::ValidationError(format!(
                "device_index {} outside 0..={MAX_DEVICE_INDEX}",
                self.device_index
            )));
        }
        Ok(())
    }
}

/// Load configuration from defaults, an optional TOML file and the
/// environment.
pub fn load_chassis_config(path: Option<&Path>) -> Result<ChassisConfig> {
    let mut figment = Figment::from(Serialized::defaults(ChassisConfig::default()));

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }
        debug!(path = %path.display(), "Loading chassis config");
        figment = figment.merge(Toml::file(path));
    }

    let config: ChassisConfig = figment
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
        .with_context(|| match path {
            Some(path) => format!("Failed to load config file: {}", path.display()),
            None => "Failed to load config from environment".to_string(),
        })?;

    config.validate()?;
    info!(
        device_index = config.device_index,
        restart = config.restart,
        reset_sequencer = config.reset_sequencer,
        "Loaded chassis config"
    );
    Ok(config)
}

/// Load configuration from a TOML string, without environment overrides.
pub fn load_chassis_config_from_str(toml_content: &str) -> Result<ChassisConfig> {
    let config: ChassisConfig =
        toml::from_str(toml_content).with_context(|| "Failed to parse TOML content")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ChassisConfig::default();
        assert_eq!(config.device_index, 0);
        assert!(!config.restart);
        assert!(config.reset_sequencer);
    }

    #[test]
    fn test_from_str_partial() {
        let config = load_chassis_config_from_str("device_index = 3\nrestart = true").unwrap();
        assert_eq!(config.device_index, 3);
        assert!(config.restart);
        assert!(config.reset_sequencer);
    }

    #[test]
    fn test_invalid_device_index() {
        let err = load_chassis_config_from_str("device_index = 8").unwrap_err();
        assert!(err.to_string().contains("device_index"));
    }

    #[test]
    #[serial]
    fn test_file_and_environment() {
        let file = write_config("device_index = 2\nreset_sequencer = false\n");

        let config = load_chassis_config(Some(file.path())).unwrap();
        assert_eq!(config.device_index, 2);
        assert!(!config.reset_sequencer);

        std::env::set_var("SEPIA_DEVICE_INDEX", "5");
        let config = load_chassis_config(Some(file.path()));
        std::env::remove_var("SEPIA_DEVICE_INDEX");
        assert_eq!(config.unwrap().device_index, 5);
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        let err = load_chassis_config(Some(Path::new("/nonexistent/sepia.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    #[serial]
    fn test_wrong_type_is_parse_error() {
        let file = write_config("restart = \"sometimes\"\n");
        assert!(load_chassis_config(Some(file.path())).is_err());
    }
}
