//! Fleet configuration
//!
//! Every field has a default so the backend runs without a config file; a TOML
//! file only needs to name the values it overrides.

use anyhow::{Context, Result};
use fleet_shared::timing;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Simulated drones reached over TCP, one port per drone
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArgosConfig {
    /// Host of the simulation
    pub endpoint: String,
    /// Port of the first drone; the others follow consecutively
    pub starting_port: u16,
    pub number_of_drones: u16,
}

impl Default for ArgosConfig {
    fn default() -> Self {
        Self {
            endpoint: "simulation".into(),
            starting_port: 3995,
            number_of_drones: 2,
        }
    }
}

impl ArgosConfig {
    /// Socket addresses of every configured simulated drone
    pub fn addresses(&self) -> Vec<String> {
        (0..self.number_of_drones)
            .filter_map(|i| self.starting_port.checked_add(i))
            .map(|port| format!("{}:{}", self.endpoint, port))
            .collect()
    }
}

/// Physical drones reached over the radio
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrazyflieConfig {
    pub uris: Vec<String>,
    pub connection_timeout_ms: u64,
    /// Wait for a reply after every pulse sent to a subscriber
    pub enable_pulse_heartbeat: bool,
}

impl Default for CrazyflieConfig {
    fn default() -> Self {
        Self {
            uris: vec![
                "udp://127.0.0.1:19950".into(),
                "udp://127.0.0.1:19951".into(),
            ],
            connection_timeout_ms: timing::RADIO_CONNECT_TIMEOUT_MS,
            enable_pulse_heartbeat: true,
        }
    }
}

impl CrazyflieConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Pulse subscriber settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Subscribers silent for longer than this are dropped
    pub heartbeat_timeout_ms: u64,
    /// How long a pulse send waits for the subscriber's reply
    pub reply_timeout_ms: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: timing::PULSE_HEARTBEAT_TIMEOUT_MS,
            reply_timeout_ms: timing::PULSE_REPLY_TIMEOUT_MS,
        }
    }
}

impl PulseConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub argos: ArgosConfig,
    pub crazyflie: CrazyflieConfig,
    pub pulse: PulseConfig,
    pub log_level: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            argos: ArgosConfig::default(),
            crazyflie: CrazyflieConfig::default(),
            pulse: PulseConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl FleetConfig {
    /// Load the configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml(&s)
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).context("parse config toml")
    }
}
