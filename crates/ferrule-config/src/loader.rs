//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::ConfigResult;
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.ferrule/config.toml) - lowest priority
/// 2. Environment variables (FERRULE_*) - overrides global
/// 3. Explicit runtime settings - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,

    /// Effective library search paths (environment entries first)
    search_paths: Vec<PathBuf>,

    /// Log level filter from FERRULE_LOG, if set
    env_log_level: Option<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Load configuration from the default global location plus the environment
    pub fn load(&mut self) -> ConfigResult<Config> {
        let global_config = self.load_global_config().unwrap_or_default();
        Ok(Self::apply_env(global_config))
    }

    /// Load configuration from a specific config file plus the environment
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let global_config = GlobalConfig::load_from_file(config_path)?;
        Ok(Self::apply_env(global_config))
    }

    /// Load global configuration from ~/.ferrule/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        // Get or cache global config path
        if self.global_config_path.is_none() {
            self.global_config_path = Some(GlobalConfig::global_config_path()?);
        }

        let path = self
            .global_config_path
            .as_ref()
            .ok_or(crate::ConfigError::HomeNotFound)?;

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(path)
    }

    /// Apply environment variable overrides to a loaded global config
    ///
    /// `FERRULE_LIBRARY_PATH` holds extra search directories in the platform's
    /// PATH-style list format and is searched before the configured directories.
    /// `FERRULE_LOG` overrides the configured log level filter.
    fn apply_env(global: GlobalConfig) -> Config {
        let mut search_paths = Vec::new();

        if let Ok(raw) = env::var("FERRULE_LIBRARY_PATH") {
            search_paths.extend(env::split_paths(&raw).filter(|p| !p.as_os_str().is_empty()));
        }
        search_paths.extend(global.search_paths().iter().cloned());

        let env_log_level = env::var("FERRULE_LOG").ok();

        Config {
            global,
            search_paths,
            env_log_level,
        }
    }

    /// Get the global configuration directory (~/.ferrule)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(crate::ConfigError::HomeNotFound)?;
        Ok(home.join(".ferrule"))
    }

    /// Ensure global configuration directory exists
    pub fn ensure_global_config_dir() -> ConfigResult<PathBuf> {
        let dir = Self::global_config_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the effective library search paths (environment > global)
    pub fn library_search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Get the effective log level filter (environment > global > "warn")
    pub fn log_level(&self) -> &str {
        self.env_log_level
            .as_deref()
            .or_else(|| self.global.log_level())
            .unwrap_or("warn")
    }

    /// Get the configured default dlopen flags, if any
    pub fn default_open_flags(&self) -> Option<&[String]> {
        self.global.default_flags()
    }
}
