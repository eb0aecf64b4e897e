//! Session and acquisition settings
//!
//! Both structs deserialize from JSON with every field optional except the
//! port name, so a config file only needs to say what differs from the
//! defaults.
//!
//! ```json
//! {
//!   "port_name": "/dev/ttyUSB0",
//!   "model": "mdaq209",
//!   "acquisition": { "format": { "binary": "four" }, "cycles_per_burst": 64 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{Model, Timeouts, DEFAULT_BAUD_RATE};
use crate::spectrum::SpectrumFormat;

/// Timeout for spectrum dumps and waveform transfers
pub const DEFAULT_BULK_TIMEOUT_MS: u64 = 10_000;

/// Sleep between cycle counter polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Errors loading a config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connection settings, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,

    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Hardware generation
    #[serde(default = "default_model")]
    pub model: Model,

    /// Command timeout in milliseconds; the model's own default when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Bulk transfer timeout in milliseconds
    #[serde(default = "default_bulk_timeout_ms")]
    pub bulk_timeout_ms: u64,

    /// How bursts are acquired
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_model() -> Model {
    Model::Mdaq209
}

fn default_bulk_timeout_ms() -> u64 {
    DEFAULT_BULK_TIMEOUT_MS
}

impl SessionConfig {
    /// Defaults for a port
    pub fn new(port_name: impl Into<String>, model: Model) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: default_baud_rate(),
            model,
            timeout_ms: None,
            bulk_timeout_ms: default_bulk_timeout_ms(),
            acquisition: AcquisitionSettings::default(),
        }
    }

    /// Timeouts the session will use
    pub fn timeouts(&self) -> Timeouts {
        let defaults = Timeouts::for_model(self.model);
        Timeouts {
            command: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.command),
            bulk: Duration::from_millis(self.bulk_timeout_ms),
        }
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&content)?;
        tracing::debug!(path = %path.as_ref().display(), port = %config.port_name, "config loaded");
        Ok(config)
    }

    /// Write as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Acquisition loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Spectrum encoding fetched after each burst
    #[serde(default)]
    pub format: SpectrumFormat,

    /// Cycles per burst (`N`)
    #[serde(default = "default_cycles_per_burst")]
    pub cycles_per_burst: u32,

    /// Sleep between cycle counter polls, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_cycles_per_burst() -> u32 {
    16
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            format: SpectrumFormat::default(),
            cycles_per_burst: default_cycles_per_burst(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl AcquisitionSettings {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ItemWidth;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SessionConfig::from_json(r#"{ "port_name": "/dev/ttyUSB0" }"#).unwrap();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.model, Model::Mdaq209);
        assert_eq!(config.acquisition, AcquisitionSettings::default());

        let timeouts = config.timeouts();
        assert_eq!(timeouts.command, Duration::from_secs(4));
        assert_eq!(timeouts.bulk, Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::from_json(
            r#"{
                "port_name": "COM3",
                "model": "mdaq107",
                "timeout_ms": 500,
                "acquisition": { "format": { "binary": "two" }, "poll_interval_ms": 25 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.model, Model::Mdaq107);
        assert_eq!(config.timeouts().command, Duration::from_millis(500));
        assert_eq!(
            config.acquisition.format,
            SpectrumFormat::Binary(ItemWidth::Two)
        );
        assert_eq!(config.acquisition.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.acquisition.cycles_per_burst, 16);
    }

    #[test]
    fn test_missing_port_rejected() {
        assert!(matches!(
            SessionConfig::from_json("{}"),
            Err(ConfigError::Json(_))
        ));
    }
}
