//! Global Configuration (~/.ferrule/config.toml)
//!
//! Handles user-level configuration stored in `~/.ferrule/config.toml`.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.ferrule/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Native library settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libraries: Option<LibrariesConfig>,

    /// Logging preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Native library settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LibrariesConfig {
    /// Extra directories searched when a library name is not an absolute path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_paths: Option<Vec<PathBuf>>,

    /// Default dlopen flags ("lazy", "now", "global", "local")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_flags: Option<Vec<String>>,
}

/// Logging preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter ("off", "error", "warn", "info", "debug", "trace")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(libs) = &self.libraries {
            if let Some(flags) = &libs.default_flags {
                for flag in flags {
                    validate_open_flag(flag)?;
                }
            }
        }

        if let Some(logging) = &self.logging {
            if let Some(level) = &logging.level {
                if !is_valid_level(level) {
                    return Err(ConfigError::InvalidValue {
                        field: "logging.level".to_string(),
                        reason: format!("unknown log level '{}'", level),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the global config file path (~/.ferrule/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".ferrule").join("config.toml"))
    }

    /// Get the configured library search paths
    pub fn search_paths(&self) -> &[PathBuf] {
        self.libraries
            .as_ref()
            .and_then(|l| l.search_paths.as_deref())
            .unwrap_or(&[])
    }

    /// Get the configured default dlopen flags
    pub fn default_flags(&self) -> Option<&[String]> {
        self.libraries.as_ref().and_then(|l| l.default_flags.as_deref())
    }

    /// Get the configured log level filter
    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.libraries.is_some() {
            self.libraries = other.libraries.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}

/// Validate a dlopen flag name
fn validate_open_flag(flag: &str) -> ConfigResult<()> {
    if !matches!(flag, "lazy" | "now" | "global" | "local") {
        return Err(ConfigError::InvalidValue {
            field: "libraries.default_flags".to_string(),
            reason: format!("must be 'lazy', 'now', 'global', or 'local', got '{}'", flag),
        });
    }
    Ok(())
}

/// Check if a log level name is valid
fn is_valid_level(level: &str) -> bool {
    matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace")
}
