// src/config.rs

//! Updater configuration (`config.toml`)

use crate::error::{Error, Result};
use crate::registry::modrinth::DEFAULT_API_BASE;
use crate::resolver::orchestrator::DEFAULT_CONCURRENCY;
use crate::resolver::{Backoff, MAX_BACKOFF, RetryPolicy, SelectionRule};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Game version the current set was built for
    pub update_game_version_from: String,
    /// Game version to update to
    pub update_game_version_to: String,
    pub loader: String,
    pub mod_folder_from: PathBuf,
    pub mod_folder_to: PathBuf,
    pub backup_folder: PathBuf,
    pub cache_folder: PathBuf,
    pub max_retries: u32,
    pub backoff_millis: u64,
    pub exponential_backoff: bool,
    pub concurrency: usize,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub selection: SelectionRule,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            update_game_version_from: String::new(),
            update_game_version_to: String::new(),
            loader: "fabric".to_string(),
            mod_folder_from: PathBuf::from("./mods"),
            mod_folder_to: PathBuf::from("./newMods"),
            backup_folder: PathBuf::from("./backup"),
            cache_folder: PathBuf::from("./.cache"),
            max_retries: 5,
            backoff_millis: 1000,
            exponential_backoff: false,
            concurrency: DEFAULT_CONCURRENCY,
            api_base_url: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 30,
            selection: SelectionRule::default(),
        }
    }
}

impl Config {
    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("Invalid {}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write a default config file; an existing file is left untouched
    pub fn write_default(path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&Self::default())
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Error::ConfigError(format!("{} already exists", path.display()))
                }
                _ => Error::IoError(format!("Failed to create {}: {}", path.display(), e)),
            })?;
        file.write_all(text.as_bytes())?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Reject settings no run can proceed with
    pub fn validate(&self) -> Result<()> {
        if self.update_game_version_to.trim().is_empty() {
            return Err(Error::ConfigError(
                "updateGameVersionTo must name the game version to update to".to_string(),
            ));
        }
        if self.loader.trim().is_empty() {
            return Err(Error::ConfigError("loader must not be empty".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::ConfigError("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.backoff_millis);
        let backoff = if self.exponential_backoff {
            Backoff::Exponential {
                base,
                max: MAX_BACKOFF,
            }
        } else {
            Backoff::Fixed(base)
        };
        RetryPolicy::new(self.max_retries, backoff)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether untouched artifacts should follow the set to the destination
    pub fn carries_over_unchanged(&self) -> bool {
        self.update_game_version_from == self.update_game_version_to
    }
}
