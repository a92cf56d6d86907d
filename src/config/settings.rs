//! Application settings
//!
//! Per-user TOML file with defaults for every key. Environment variables
//! override the file, command-line flags override both (applied in `main`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::constants::{location, paths, timing, validation};

/// Settings shared by control and display instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Fallback log level when LOG_LEVEL is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Store re-read cadence for display instances without a snapshot
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory holding the persistent store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Location used when none is given on the command line
    #[serde(default = "default_location")]
    pub location: String,

    /// Skip the socket relay and only sync through the store
    #[serde(default)]
    pub local_only: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    timing::DEFAULT_POLL_INTERVAL_MS
}

fn default_store_dir() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(paths::APP_DIR);
    path
}

fn default_location() -> String {
    location::DEFAULT_LOCATION.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_interval_ms: default_poll_interval_ms(),
            store_dir: default_store_dir(),
            location: default_location(),
            local_only: false,
        }
    }
}

impl AppSettings {
    pub fn path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(paths::APP_DIR);
        path.push(paths::SETTINGS_FILENAME);
        path
    }

    /// Load settings from the default path, falling back to defaults.
    ///
    /// A broken settings file is reported but never stops the overlay from
    /// starting.
    pub fn load() -> Self {
        let path = Self::path();
        let mut settings = match Self::load_from(&path) {
            Ok(Some(settings)) => {
                info!(path = %path.display(), "Loaded settings");
                settings
            }
            Ok(None) => {
                info!(path = %path.display(), "No settings file found, generating default");
                let settings = Self::default();
                match settings.save_to(&path) {
                    Ok(()) => info!(path = %path.display(), "Generated settings file for user to edit (env vars still override)"),
                    Err(e) => error!(error = ?e, "Failed to save default settings"),
                }
                settings
            }
            Err(e) => {
                error!(path = %path.display(), error = ?e, "Failed to load settings, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides();
        settings.validate_and_clamp();
        settings
    }

    /// Parse a settings file; `Ok(None)` when it does not exist
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let settings: AppSettings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from {:?}", path))?;
        Ok(Some(settings))
    }

    /// Write settings as pretty TOML, creating the parent directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;
        fs::write(path, contents).with_context(|| format!("Failed to write settings to {:?}", path))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("STREAMPULSE_POLL_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid STREAMPULSE_POLL_MS"),
            }
        }
        if let Ok(dir) = env::var("STREAMPULSE_STORE_DIR")
            && !dir.trim().is_empty()
        {
            self.store_dir = PathBuf::from(dir);
        }
    }

    /// Clamp values to safe ranges
    pub fn validate_and_clamp(&mut self) {
        use validation::{MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS};

        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            warn!(poll_interval_ms = self.poll_interval_ms, min = MIN_POLL_INTERVAL_MS, "poll_interval_ms below minimum, clamping");
            self.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        } else if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            warn!(poll_interval_ms = self.poll_interval_ms, max = MAX_POLL_INTERVAL_MS, "poll_interval_ms exceeds maximum, clamping");
            self.poll_interval_ms = MAX_POLL_INTERVAL_MS;
        }

        if self.location.trim().is_empty() {
            warn!(using = %location::DEFAULT_LOCATION, "Empty location in settings, using default");
            self.location = default_location();
        }
    }
}
