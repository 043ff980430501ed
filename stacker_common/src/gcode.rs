//! Marlin-inspired command language.
//!
//! This module contains the command-line parser and the static command
//! table that decides which axis and attribute letters may follow which
//! command, together with the value types they carry.
//!
//! - [`types`] - `AttributeValue`, `AttributeMap`, `ParsedCommand`
//! - [`table`] - `CommandTable` with the per-command rules
//! - [`error`] - `ParseError`
//! - [`parser`] - `parse` / `parse_bytes`

pub mod error;
pub mod parser;
pub mod table;
pub mod types;

pub use error::ParseError;
pub use parser::{parse, parse_bytes, parse_with};
pub use table::{
    CommandSpec, CommandTable, ValueType, is_attribute_letter, is_axis_letter, is_linear_axis,
    is_rotational_axis,
};
pub use types::{AttributeMap, AttributeValue, CommandKind, ParsedCommand};
