//! Lane configuration.
//!
//! [`LaneConfig`] is a plain value built once at process start and handed to
//! the components that need it. Every key is optional in the TOML file and
//! falls back to the defaults in [`constants`](crate::constants).
//!
//! ```
//! use exitgate_core::LaneConfig;
//!
//! let config = LaneConfig::from_toml(
//!     r#"
//!     [gate]
//!     control_mode = "gpio"
//!
//!     [system]
//!     auto_close_timeout = 5
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.gpio.gate_pin, 24);
//! assert_eq!(config.auto_close_timeout().as_secs(), 5);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::Error;
use crate::tariff::TariffSchedule;
use crate::Result;

/// Transport driving the gate barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Digital output line (relay).
    Gpio,
    /// ASCII commands over a serial port.
    #[default]
    Serial,
    /// No hardware; calls are logged and succeed.
    Simulation,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gpio => "GPIO",
            Self::Serial => "SERIAL",
            Self::Simulation => "SIMULATION",
        };
        f.write_str(name)
    }
}

/// `[gate]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub control_mode: ControlMode,
    /// Wait for an acknowledgement line after each serial command.
    pub serial_ack: bool,
    pub ack_timeout_ms: u64,
    /// Consecutive failures that latch the driver into ERROR.
    pub max_consecutive_errors: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            control_mode: ControlMode::default(),
            serial_ack: false,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// `[gpio]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub gate_pin: u32,
    pub active_high: bool,
    /// Pulse width in milliseconds.
    pub pulse_duration: u64,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            gate_pin: DEFAULT_GATE_PIN,
            active_high: true,
            pulse_duration: DEFAULT_PULSE_DURATION_MS,
        }
    }
}

/// `[scanner]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub min_length: usize,
    pub max_length: usize,
    /// Inter-keystroke gap in milliseconds that ends a burst.
    pub timeout: u64,
    /// Minimum gap in milliseconds between two emitted scans.
    pub cooldown_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_SCAN_MIN_LENGTH,
            max_length: DEFAULT_SCAN_MAX_LENGTH,
            timeout: DEFAULT_SCAN_TIMEOUT_MS,
            cooldown_ms: 0,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    /// Time to live in seconds.
    pub ttl: u64,
    /// Warm the cache from the open member entries at lane start.
    pub preload: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_CACHE_MAX_SIZE,
            ttl: DEFAULT_CACHE_TTL_SECS,
            preload: true,
        }
    }
}

/// `[system]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Seconds before an open gate closes on its own.
    pub auto_close_timeout: u64,
    pub operator: String,
    pub gate_id: String,
    /// Seconds of store unavailability before the lane degrades.
    pub degraded_after: u64,
    pub attachment_retry_attempts: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            auto_close_timeout: DEFAULT_AUTO_CLOSE_SECS,
            operator: DEFAULT_OPERATOR.to_string(),
            gate_id: DEFAULT_GATE_ID.to_string(),
            degraded_after: DEFAULT_DEGRADED_AFTER_SECS,
            attachment_retry_attempts: DEFAULT_ATTACHMENT_RETRY_ATTEMPTS,
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: String,
    pub request_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            request_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            max_connections: DEFAULT_STORE_MAX_CONNECTIONS,
        }
    }
}

/// IP camera brand, used to pick the default snapshot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraVendor {
    Hikvision,
    Dahua,
    Onvif,
    #[default]
    Generic,
}

impl CameraVendor {
    /// Snapshot path served by cameras of this vendor.
    #[must_use]
    pub fn default_snapshot_path(self) -> &'static str {
        match self {
            Self::Hikvision => "ISAPI/Streaming/channels/101/picture",
            Self::Dahua => "cgi-bin/snapshot.cgi",
            Self::Onvif => "onvif/media_service/snapshot",
            Self::Generic => "Streaming/Channels/1/picture",
        }
    }
}

/// `[camera]` section, consumed by the snapshot collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera address; no snapshots are taken when unset.
    pub ip: Option<String>,
    pub vendor: CameraVendor,
    /// Overrides the vendor path.
    pub snapshot_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl CameraConfig {
    /// `http://{ip}/{path}` of the snapshot endpoint, if a camera is set.
    #[must_use]
    pub fn snapshot_url(&self) -> Option<String> {
        let ip = self.ip.as_deref().filter(|ip| !ip.is_empty())?;
        let path = self
            .snapshot_path
            .as_deref()
            .unwrap_or_else(|| self.vendor.default_snapshot_path())
            .trim_start_matches('/');
        Some(format!("http://{ip}/{path}"))
    }
}

/// Complete configuration of one exit lane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub gate: GateConfig,
    pub gpio: GpioConfig,
    pub scanner: ScannerConfig,
    pub cache: CacheConfig,
    pub system: SystemConfig,
    pub store: StoreConfig,
    pub tariff: TariffSchedule,
    pub camera: CameraConfig,
}

impl LaneConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns `Error::ConfigParse` for malformed TOML and `Error::Config` for
    /// inconsistent values.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    /// Returns `Error::Io` when the file cannot be read, otherwise as
    /// [`from_toml`](Self::from_toml).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.min_length == 0 {
            return Err(Error::Config("scanner.min_length must be at least 1".into()));
        }
        if self.scanner.min_length > self.scanner.max_length {
            return Err(Error::Config(format!(
                "scanner.min_length ({}) exceeds scanner.max_length ({})",
                self.scanner.min_length, self.scanner.max_length
            )));
        }
        if self.scanner.max_length > MAX_IDENTIFIER_LENGTH {
            return Err(Error::Config(format!(
                "scanner.max_length must not exceed {MAX_IDENTIFIER_LENGTH}"
            )));
        }
        if self.scanner.timeout == 0 {
            return Err(Error::Config("scanner.timeout must be positive".into()));
        }
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(Error::Config("cache.max_size must be positive".into()));
        }
        if self.cache.ttl == 0 {
            return Err(Error::Config("cache.ttl must be positive".into()));
        }
        if self.gate.control_mode == ControlMode::Serial {
            if self.gate.baud_rate == 0 {
                return Err(Error::Config("gate.baud_rate must be positive".into()));
            }
            if self.gate.serial_port.is_empty() {
                return Err(Error::Config("gate.serial_port is empty".into()));
            }
        }
        if self.gate.max_consecutive_errors == 0 {
            return Err(Error::Config(
                "gate.max_consecutive_errors must be at least 1".into(),
            ));
        }
        if self.system.gate_id.trim().is_empty() {
            return Err(Error::Config("system.gate_id is empty".into()));
        }
        if self.system.operator.trim().is_empty() {
            return Err(Error::Config("system.operator is empty".into()));
        }
        if self.store.database_path.is_empty() {
            return Err(Error::Config("store.database_path is empty".into()));
        }
        if self.store.request_timeout_ms == 0 {
            return Err(Error::Config("store.request_timeout_ms must be positive".into()));
        }
        if self.store.max_connections == 0 {
            return Err(Error::Config("store.max_connections must be positive".into()));
        }
        Ok(())
    }

    pub fn auto_close_timeout(&self) -> Duration {
        Duration::from_secs(self.system.auto_close_timeout)
    }

    pub fn degraded_after(&self) -> Duration {
        Duration::from_secs(self.system.degraded_after)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scanner.timeout)
    }

    pub fn scan_cooldown(&self) -> Duration {
        Duration::from_millis(self.scanner.cooldown_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl)
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.gpio.pulse_duration)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.gate.ack_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.request_timeout_ms)
    }
}
