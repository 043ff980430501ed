//! Hardware error types.

use std::time::Duration;
use thiserror::Error;

/// Error types for hardware operations.
///
/// | Variant | Dispatcher reaction |
/// |---------|---------------------|
/// | `NotSupported` | silent skip, reported only if it leaves work unresolved |
/// | `NotConnected` / `EmergencyStopped` / `Aborted` / `InvalidArgument` | `exit_code = 1` |
/// | `Fatal` / `Timeout` | `exit_code = 1` and Emergency Stop |
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    /// Optional capability the unit does not provide.
    #[error("Operation not supported: {operation}")]
    NotSupported { operation: &'static str },

    /// Unit is not connected.
    #[error("Unit {unit} is not connected")]
    NotConnected { unit: char },

    /// Emergency Stop flag is set; the operation was skipped or cut short.
    #[error("Emergency stop active")]
    EmergencyStopped,

    /// Motion interrupted by a controlled stop.
    #[error("{operation} aborted by stop")]
    Aborted { operation: &'static str },

    /// Argument rejected by the unit (e.g. outside travel limits).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected device response or device fault.
    #[error("Hardware fault: {reason}")]
    Fatal { reason: String },

    /// Command/response exchange did not finish in time.
    #[error("Timeout during {operation} after {after:?}")]
    Timeout { operation: String, after: Duration },
}

impl HardwareError {
    pub const fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    /// Communication faults that must put the machine into Emergency Stop.
    pub fn escalates(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Timeout { .. })
    }
}
