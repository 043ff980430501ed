//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use stacker_common::prelude::*;` and get
//! the most important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use stacker_common::prelude::*;
//!
//! let parsed = parse("M140 S65").unwrap();
//! assert!(parsed.contains("M140"));
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BackendConfig, ChannelConfig, ConfigError, ConfigLoader, EngineConfig, LogLevel,
    SharedConfig, TransportKind, UnitConfig, UnitKind,
};

// ─── Command language ───────────────────────────────────────────────
pub use crate::gcode::{
    AttributeMap, AttributeValue, CommandKind, CommandTable, ParseError, ParsedCommand, parse,
    parse_bytes,
};

// ─── Hardware ───────────────────────────────────────────────────────
pub use crate::hardware::{
    Capabilities, DeviceInfo, Direction, HardwareError, HardwareUnit, SharedUnit,
};

// ─── Messaging ──────────────────────────────────────────────────────
pub use crate::channel::{ChannelError, Endpoint, Role};
pub use crate::message::ResultMessage;

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{EMERGENCY_STOP, RESET};
