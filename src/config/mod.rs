//! Configuration Management
//!
//! This module handles loading and saving application settings and exposes
//! the JSON-file persistence stores for connections and saved queries.
//!
//! # Configuration Locations
//! - Settings: `~/.config/aion/settings.json`
//! - Connections: `<data dir>/connections.json`
//! - Saved queries: `<data dir>/queries.json`
//!
//! The data directory defaults to the configuration directory. The
//! `AION_CONFIG_DIR` environment variable overrides the configuration
//! directory itself.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AionError, Result};
use crate::health::HealthSettings;

mod store;

pub use store::{EntityStore, JsonFileStore, StoredEntity};

pub const CONFIG_DIR_ENV: &str = "AION_CONFIG_DIR";
const SETTINGS_FILE: &str = "settings.json";
const CONNECTIONS_FILE: &str = "connections.json";
const QUERIES_FILE: &str = "queries.json";

/// Application settings (stored in `settings.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub health: HealthSettings,

    /// Where connection and query stores live (defaults to the config directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl AppSettings {
    /// Resolve the data directory against the configuration directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir(),
        }
    }

    pub fn connections_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(CONNECTIONS_FILE))
    }

    pub fn queries_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(QUERIES_FILE))
    }
}

/// Get the configuration directory (`~/.config/aion` unless overridden)
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| AionError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("aion"))
}

/// Get path to the settings file
pub fn settings_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(SETTINGS_FILE))
}

/// Load settings from a file, falling back to defaults when it is absent
pub fn load_settings(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        // File doesn't exist, use defaults
        return Ok(AppSettings::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| AionError::config_error(format!("Could not read settings file: {e}")))?;

    serde_json::from_str::<AppSettings>(&contents)
        .map_err(|e| AionError::config_error(format!("Invalid settings file format: {e}")))
}

/// Save settings to a file
pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    // Create parent directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AionError::config_error(format!("Could not create config directory: {e}")))?;
    }

    let contents = serde_json::to_string_pretty(settings)
        .map_err(|e| AionError::config_error(format!("Could not serialize settings: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| AionError::config_error(format!("Could not write settings file: {e}")))
}

/// Load settings from the default location
pub fn load() -> Result<AppSettings> {
    load_settings(&settings_path()?)
}
