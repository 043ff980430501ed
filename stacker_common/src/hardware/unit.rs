//! `HardwareUnit` trait and capability types.
//!
//! # Lifecycle
//!
//! 1. Built once at backend startup from configuration
//! 2. `connect()` before the intake loop starts
//! 3. Motion / telemetry calls from worker threads
//! 4. `disconnect()` at shutdown (and around `M999` reconnects)
//!
//! # Locking Contract
//!
//! All methods take `&self`. Implementations guard their device state with
//! a unit-scoped lock held for one hardware transaction at a time, released
//! by guard drop. `emergency_stop()` must not wait on a lock held by an
//! in-flight move.

use super::error::HardwareError;
use bitflags::bitflags;
use serde::Serialize;
use std::sync::Arc;

bitflags! {
    /// Optional capabilities advertised by a unit.
    ///
    /// Used for logging and for selecting target units of machine commands
    /// (e.g. `M140` only addresses `TEMPERATURE` units).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u16 {
        /// `move_to` / `move_by`.
        const LINEAR      = 0x0001;
        /// `rotate_to` / `rotate_by`.
        const ROTARY      = 0x0002;
        /// `home`.
        const HOMING      = 0x0004;
        /// `start_jog` / `stop_jog`.
        const JOG         = 0x0008;
        /// Temperature readout and target.
        const TEMPERATURE = 0x0010;
        /// Position / speed / acceleration readout.
        const TELEMETRY   = 0x0020;
        /// Steps-per-unit conversion factor.
        const STEPS       = 0x0040;
    }
}

impl Capabilities {
    /// Flag names, for device info and logs.
    pub fn names(self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_string()).collect()
    }
}

/// Jog direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// `+1` → Forward, `-1` → Backward, anything else → `None`.
    pub fn from_sign(value: f64) -> Option<Self> {
        if value == 1.0 {
            Some(Self::Forward)
        } else if value == -1.0 {
            Some(Self::Backward)
        } else {
            None
        }
    }
}

/// Static description of a unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub id: char,
    #[serde(rename = "type")]
    pub unit_type: String,
    pub capabilities: Vec<String>,
    pub connected: bool,
}

/// Shared handle to a registered unit.
pub type SharedUnit = Arc<dyn HardwareUnit>;

/// Contract every hardware unit implements.
///
/// Required methods have no default body. Optional methods return
/// `HardwareError::NotSupported` unless the unit overrides them; new
/// hardware is added purely by implementing this trait.
pub trait HardwareUnit: Send + Sync {
    /// Single-letter axis identifier, unique in the fleet.
    fn id(&self) -> char;

    /// Type name (e.g. `"simulated_linear"`).
    fn unit_type(&self) -> &str;

    /// Capabilities this unit provides.
    fn capabilities(&self) -> Capabilities;

    // ─── Connection ─────────────────────────────────────────────────

    fn connect(&self) -> Result<(), HardwareError>;

    fn disconnect(&self) -> Result<(), HardwareError>;

    fn is_connected(&self) -> bool;

    // ─── Stops ──────────────────────────────────────────────────────

    /// Controlled stop of any motion.
    fn stop(&self) -> Result<(), HardwareError>;

    /// Immediate halt. Never gated by the Emergency Stop flag.
    fn emergency_stop(&self) -> Result<(), HardwareError>;

    // ─── Motion (optional) ──────────────────────────────────────────

    fn move_to(&self, _position: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("move_to"))
    }

    fn move_by(&self, _distance: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("move_by"))
    }

    fn rotate_to(&self, _angle: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("rotate_to"))
    }

    fn rotate_by(&self, _angle: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("rotate_by"))
    }

    fn home(&self) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("home"))
    }

    fn start_jog(&self, _direction: Direction) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("start_jog"))
    }

    fn stop_jog(&self) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("stop_jog"))
    }

    // ─── Telemetry (optional) ───────────────────────────────────────

    fn position(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("position"))
    }

    fn speed(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("speed"))
    }

    fn set_speed(&self, _speed: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("set_speed"))
    }

    fn acceleration(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("acceleration"))
    }

    fn temperature(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("temperature"))
    }

    fn target_temperature(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("target_temperature"))
    }

    fn set_target_temperature(&self, _temperature: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("set_target_temperature"))
    }

    fn steps_per_unit(&self) -> Result<f64, HardwareError> {
        Err(HardwareError::not_supported("steps_per_unit"))
    }

    fn set_steps_per_unit(&self, _steps: f64) -> Result<(), HardwareError> {
        Err(HardwareError::not_supported("set_steps_per_unit"))
    }

    /// Static description of the unit.
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id(),
            unit_type: self.unit_type().to_string(),
            capabilities: self.capabilities().names(),
            connected: self.is_connected(),
        }
    }
}
