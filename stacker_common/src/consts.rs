//! System-wide constants for the stacker workspace.
//!
//! Single source of truth for the command-language letter sets, the
//! reserved wire words and the default timing values. Imported by all
//! crates.

use std::time::Duration;

// ─── Command language ───────────────────────────────────────────────

/// Letters that introduce an attribute token (`S65`, `I0`, ...).
pub const ATTRIBUTE_LETTERS: [char; 4] = ['S', 'I', 'R', 'A'];

/// Letters that introduce an axis (movement payload) token.
pub const AXIS_LETTERS: [char; 10] = ['X', 'Y', 'Z', 'H', 'J', 'K', 'L', 'N', 'O', 'P'];

/// Axis letters accepted by linear movement (`G0`).
pub const LINEAR_AXES: [char; 6] = ['X', 'Y', 'Z', 'H', 'J', 'K'];

/// Axis letters accepted by rotational movement (`G1`).
pub const ROTATIONAL_AXES: [char; 1] = ['L'];

/// Emergency stop command identifier.
pub const EMERGENCY_STOP: &str = "M112";

/// Reset-from-emergency-stop command identifier.
pub const RESET: &str = "M999";

/// Commands that are always executed alone and first in their batch.
pub const PRIORITY_COMMANDS: [&str; 2] = [EMERGENCY_STOP, RESET];

// ─── Wire protocol ──────────────────────────────────────────────────

/// Record that terminates one application message on the wire.
pub const EOM: &str = "EOM";

/// Record that closes the connection after buffered messages are drained.
pub const SENTINEL: &str = "SENTINEL";

/// Greeting sent by the FRONTEND during the handshake.
pub const HANDSHAKE_HELLO: &str = "Hello there.";

/// Acknowledgement sent by the BACKEND during the handshake.
pub const HANDSHAKE_ACK: &str = "Hello there general Kenobi.";

// ─── Timing defaults ────────────────────────────────────────────────

/// Default intake loop polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Default period between FRONTEND hello retries in milliseconds.
pub const DEFAULT_HANDSHAKE_RETRY_MS: u64 = 100;

/// Default travel interval (in axis units) between emergency-flag checks.
pub const DEFAULT_CHECK_INTERVAL: f64 = 10.0;

/// Default upper bound on concurrently executing batch workers.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default timeout for one serial command/response exchange in milliseconds.
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;

/// Default intake polling interval as Duration.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

/// Default configuration file path for the backend binary.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/stacker/backend.toml";
