//! HopCraft Settings
//!
//! JSON configuration for relay nodes and circuit clients.
//!
//! ## Usage
//!
//! ```no_run
//! use hopcraft_relay::AgentConfig;
//! use hopcraft_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.relay.max_exchanges = 5000;
//! settings.save()?;
//!
//! let config = AgentConfig::from(&settings.relay);
//! # Ok::<(), hopcraft_settings::SettingsError>(())
//! ```

mod config;

pub use config::{CircuitSettings, RelaySettings, Settings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Directory holding HopCraft configuration
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hopcraft")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
