//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all stacker applications, plus the backend configuration schema
//! (`backend.toml`).
//!
//! # Usage
//!
//! ```rust,no_run
//! use stacker_common::config::{BackendConfig, ConfigLoader, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = BackendConfig::load(Path::new("backend.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    AXIS_LETTERS, DEFAULT_BAUD_RATE, DEFAULT_CHECK_INTERVAL, DEFAULT_HANDSHAKE_RETRY_MS,
    DEFAULT_MAX_WORKERS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SERIAL_TIMEOUT_MS, LINEAR_AXES,
    ROTATIONAL_AXES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all stacker applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "stacker-backend-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "stacker-backend".to_string(),
        }
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Backend configuration ──────────────────────────────────────────

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_check_interval() -> f64 {
    DEFAULT_CHECK_INTERVAL
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout_ms() -> u64 {
    DEFAULT_SERIAL_TIMEOUT_MS
}

fn default_handshake_retry_ms() -> u64 {
    DEFAULT_HANDSHAKE_RETRY_MS
}

fn default_true() -> bool {
    true
}

/// Complete backend configuration loaded from `backend.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Logging and instance name.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Intake loop and worker settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Messaging channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Hardware units registered at startup.
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

impl BackendConfig {
    /// Validate the full backend configuration.
    ///
    /// # Validation Rules
    /// 1. `shared.service_name` non-empty
    /// 2. engine intervals and worker bound > 0
    /// 3. serial transport names a port
    /// 4. unit ids are unique accepted axis letters matching the unit kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.engine.validate()?;
        self.channel.validate()?;

        let mut ids = HashSet::new();
        for unit in &self.units {
            unit.validate()?;
            if !ids.insert(unit.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate unit id: {}",
                    unit.id
                )));
            }
        }
        Ok(())
    }

    /// Units with `enabled = true`, in declaration order.
    pub fn enabled_units(&self) -> impl Iterator<Item = &UnitConfig> {
        self.units.iter().filter(|u| u.enabled)
    }
}

/// Intake loop and worker settings (`[engine]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Intake loop polling interval [ms].
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Travel distance between emergency-flag checks during long moves [axis units].
    #[serde(default = "default_check_interval")]
    pub check_interval: f64,

    /// Upper bound on concurrently running batch workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Intake polling interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.check_interval.is_finite() && self.check_interval > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "check_interval must be a positive number, got {}",
                self.check_interval
            )));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Transport carrying the messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Process stdin/stdout pipe pair.
    #[default]
    Stdio,
    /// Serial line.
    Serial,
}

/// Messaging channel settings (`[channel]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Transport to use.
    #[serde(default)]
    pub transport: TransportKind,

    /// Serial device path (required for `serial`).
    #[serde(default)]
    pub port: Option<String>,

    /// Serial line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Timeout for one serial read [ms].
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Period between FRONTEND hello retries [ms].
    #[serde(default = "default_handshake_retry_ms")]
    pub handshake_retry_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
            handshake_retry_ms: DEFAULT_HANDSHAKE_RETRY_MS,
        }
    }
}

impl ChannelConfig {
    /// Hello retry period as Duration.
    pub fn handshake_retry(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_ms)
    }

    /// Serial read timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Serial
            && self.port.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::ValidationError(
                "serial transport requires a port".to_string(),
            ));
        }
        if self.handshake_retry_ms == 0 {
            return Err(ConfigError::ValidationError(
                "handshake_retry_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kind of simulated or physical unit behind an axis letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Linear actuator (piezo, focus stage).
    Linear,
    /// Rotation stage.
    Rotary,
    /// Rotating sample bed with temperature control.
    HeatedBed,
    /// One axis of a shared XY stepper controller.
    XyStepper,
}

/// One hardware unit entry (`[[units]]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Axis letter identifying the unit.
    pub id: char,

    /// Unit kind.
    pub kind: UnitKind,

    /// Whether the unit is registered at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Conversion factor between axis units and motor steps.
    #[serde(default)]
    pub steps_per_unit: Option<f64>,

    /// Maximum drive speed [units/s].
    #[serde(default)]
    pub max_speed: Option<f64>,

    /// Initial drive speed [units/s].
    #[serde(default)]
    pub speed: Option<f64>,

    /// Drive acceleration [units/s²].
    #[serde(default)]
    pub acceleration: Option<f64>,

    /// Lower travel limit.
    #[serde(default)]
    pub min_position: Option<f64>,

    /// Upper travel limit.
    #[serde(default)]
    pub max_position: Option<f64>,

    /// Simulated travel time per axis unit [ms]; 0 = instantaneous.
    #[serde(default)]
    pub travel_time_per_unit_ms: f64,

    /// Shared controller name (for `xy_stepper`).
    #[serde(default)]
    pub controller: Option<String>,
}

impl UnitConfig {
    /// Create a unit entry with defaults for everything but id and kind.
    pub fn new(id: char, kind: UnitKind) -> Self {
        Self {
            id,
            kind,
            enabled: true,
            steps_per_unit: None,
            max_speed: None,
            speed: None,
            acceleration: None,
            min_position: None,
            max_position: None,
            travel_time_per_unit_ms: 0.0,
            controller: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !AXIS_LETTERS.contains(&self.id) {
            return Err(ConfigError::ValidationError(format!(
                "Unit id {:?} is not an accepted axis letter",
                self.id
            )));
        }

        let letter_ok = match self.kind {
            UnitKind::Linear | UnitKind::XyStepper => LINEAR_AXES.contains(&self.id),
            UnitKind::Rotary | UnitKind::HeatedBed => ROTATIONAL_AXES.contains(&self.id),
        };
        if !letter_ok {
            return Err(ConfigError::ValidationError(format!(
                "Unit {} of kind {:?} uses an axis letter of the wrong motion type",
                self.id, self.kind
            )));
        }

        if let (Some(min), Some(max)) = (self.min_position, self.max_position) {
            if min >= max {
                return Err(ConfigError::ValidationError(format!(
                    "Unit {}: min_position ({min}) must be below max_position ({max})",
                    self.id
                )));
            }
        }

        if self.travel_time_per_unit_ms < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Unit {}: travel_time_per_unit_ms cannot be negative",
                self.id
            )));
        }

        if self.kind == UnitKind::XyStepper && self.controller.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Unit {}: xy_stepper requires a controller name",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"")
                .unwrap()
                .level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = BackendConfig::load(Path::new("/nonexistent/path/backend.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = BackendConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_backend_config_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "stacker-test"

[engine]
poll_interval_ms = 5
check_interval = 2.5

[channel]
transport = "serial"
port = "/dev/ttyUSB0"

[[units]]
id = "X"
kind = "linear"
max_speed = 100.0

[[units]]
id = "L"
kind = "heated_bed"

[[units]]
id = "H"
kind = "xy_stepper"
controller = "base"
enabled = false
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = BackendConfig::load(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.engine.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.engine.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.channel.transport, TransportKind::Serial);
        assert_eq!(config.channel.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.units.len(), 3);
        assert_eq!(config.enabled_units().count(), 2);
        assert_eq!(config.units[1].kind, UnitKind::HeatedBed);
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = BackendConfig::from_toml("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.channel.transport, TransportKind::Stdio);
        assert!(config.units.is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = BackendConfig::from_toml("[engine]\nbogus = 1\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_duplicate_unit_id_rejected() {
        let config = BackendConfig {
            units: vec![
                UnitConfig::new('X', UnitKind::Linear),
                UnitConfig::new('X', UnitKind::Linear),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate unit id"));
    }

    #[test]
    fn test_unit_letter_must_match_kind() {
        let config = BackendConfig {
            units: vec![UnitConfig::new('X', UnitKind::Rotary)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BackendConfig {
            units: vec![UnitConfig::new('Q', UnitKind::Linear)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serial_requires_port() {
        let config = BackendConfig {
            channel: ChannelConfig {
                transport: TransportKind::Serial,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_xy_stepper_requires_controller() {
        let config = BackendConfig {
            units: vec![UnitConfig::new('H', UnitKind::XyStepper)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
