//! Hardware capability contract.
//!
//! Every actuator or sensor driven by the backend implements
//! [`HardwareUnit`]. Required operations have no default body; optional
//! operations default to [`HardwareError::NotSupported`], which the
//! dispatcher treats as a silent per-unit skip.

pub mod error;
pub mod unit;

pub use error::HardwareError;
pub use unit::{Capabilities, DeviceInfo, Direction, HardwareUnit, SharedUnit};
