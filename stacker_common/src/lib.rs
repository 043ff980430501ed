//! Stacker Common Library
//!
//! Shared building blocks for the stacking setup workspace: the
//! Marlin-inspired command language, the hardware capability contract
//! that every actuator/sensor driver implements, the result message
//! returned for each executed command, and the sentinel-framed messaging
//! channel that connects a front end to the backend process.
//!
//! # Module Structure
//!
//! - [`consts`] - Command-language letters, wire sentinels, default intervals
//! - [`config`] - Configuration loading traits and types
//! - [`gcode`] - Command table and line parser
//! - [`hardware`] - Hardware capability contract (`HardwareUnit` trait)
//! - [`message`] - Result messages sent back to the front end
//! - [`channel`] - Framed duplex transport with startup handshake
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use stacker_common::gcode::parse;
//!
//! let parsed = parse("G0 X5 Y-3").unwrap();
//! assert_eq!(parsed.len(), 1);
//! ```

pub mod channel;
pub mod config;
pub mod consts;
pub mod gcode;
pub mod hardware;
pub mod message;
pub mod prelude;
