//! Backend error type.

use stacker_common::channel::ChannelError;
use stacker_common::config::ConfigError;
use stacker_common::hardware::HardwareError;
use thiserror::Error;

/// Errors that stop the backend or abort its startup.
///
/// Per-command failures never surface here; they become `exit_code = 1`
/// result messages.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Messaging channel failure (I/O, framing, handshake).
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Hardware failure outside of command execution (startup, shutdown).
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Two units registered under the same axis letter.
    #[error("Duplicate unit id: {0}")]
    DuplicateUnit(char),

    /// A batch worker panicked. Fatal for the intake loop.
    #[error("Worker for batch {batch} panicked: {cause}")]
    WorkerPanicked { batch: u64, cause: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        let err: EngineError = ChannelError::Closed.into();
        assert!(matches!(err, EngineError::Channel(_)));

        let err: EngineError = HardwareError::fatal("no reply").into();
        assert_eq!(err.to_string(), "Hardware error: Hardware fault: no reply");
    }

    #[test]
    fn test_worker_panic_display() {
        let err = EngineError::WorkerPanicked {
            batch: 3,
            cause: "boom".into(),
        };
        assert_eq!(err.to_string(), "Worker for batch 3 panicked: boom");
    }
}
