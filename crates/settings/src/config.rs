//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use hopcraft_client::CircuitConfig;
use hopcraft_relay::AgentConfig;

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Relay node settings
    #[serde(default)]
    pub relay: RelaySettings,

    /// Circuit client settings
    #[serde(default)]
    pub circuit: CircuitSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            info!("Loaded settings from {:?}", path);
            settings
        } else {
            Self::default()
        };
        settings.config_path = Some(path.to_path_buf());
        Ok(settings)
    }

    /// Save settings to the path they were loaded from
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Relay node settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Maximum number of live exchanges
    pub max_exchanges: usize,

    /// Packets each exchange may forward before it is torn down
    pub exchange_points: i64,

    pub exchange_retention_secs: u64,

    /// Cap on the retention a client may request
    pub max_exchange_retention_secs: u64,

    /// How long a destination stays unrestricted after a connect packet
    pub unrestricted_retention_secs: u64,

    pub endpoint_cache_capacity: usize,

    /// Minimum spacing between packets admitted from unknown senders
    pub unknown_sender_interval_ms: u64,

    pub clean_interval_secs: u64,

    pub send_interval_ms: u64,

    pub max_send_batch: usize,

    /// Admit unknown senders on every exchange
    pub allow_unknown_inbound: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_exchanges: 1000,
            exchange_points: 1_000_000,
            exchange_retention_secs: 60,
            max_exchange_retention_secs: 600,
            unrestricted_retention_secs: 60,
            endpoint_cache_capacity: 1000,
            unknown_sender_interval_ms: 100,
            clean_interval_secs: 10,
            send_interval_ms: 1,
            max_send_batch: 256,
            allow_unknown_inbound: false,
        }
    }
}

impl From<&RelaySettings> for AgentConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            max_exchanges: settings.max_exchanges,
            exchange_points: settings.exchange_points,
            exchange_retention: Duration::from_secs(settings.exchange_retention_secs),
            max_exchange_retention: Duration::from_secs(settings.max_exchange_retention_secs),
            unrestricted_retention: Duration::from_secs(settings.unrestricted_retention_secs),
            endpoint_cache_capacity: settings.endpoint_cache_capacity,
            unknown_sender_interval: Duration::from_millis(settings.unknown_sender_interval_ms),
            clean_interval: Duration::from_secs(settings.clean_interval_secs.max(1)),
            send_interval: Duration::from_millis(settings.send_interval_ms.max(1)),
            max_send_batch: settings.max_send_batch,
            allow_unknown_inbound: settings.allow_unknown_inbound,
        }
    }
}

/// Circuit client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Hop limit for circuits this node builds
    pub max_outgoing_hops: usize,

    /// Hop limit for circuits built on behalf of a peer
    pub max_incoming_hops: usize,

    /// Pause between closing consecutive hops
    pub close_delay_ms: u64,

    /// Maximum random padding per packet
    pub max_padding: u8,

    pub allow_unknown_inbound: bool,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            max_outgoing_hops: 5,
            max_incoming_hops: 2,
            close_delay_ms: 50,
            max_padding: 0,
            allow_unknown_inbound: false,
        }
    }
}

impl From<&CircuitSettings> for CircuitConfig {
    fn from(settings: &CircuitSettings) -> Self {
        Self {
            max_outgoing_hops: settings.max_outgoing_hops,
            max_incoming_hops: settings.max_incoming_hops,
            close_delay: Duration::from_millis(settings.close_delay_ms),
            max_padding: settings.max_padding,
            allow_unknown_inbound: settings.allow_unknown_inbound,
        }
    }
}
