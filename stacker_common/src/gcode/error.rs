//! Parser error type.

use thiserror::Error;

/// Error types for command-line parsing.
///
/// Every variant is reported back to the caller with `exit_code = 1` and
/// leaves the engine state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Line is empty, not valid text, or contains an unknown token.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Attribute or axis token in a position the command table forbids.
    #[error("Attribute error: {0}")]
    Attribute(String),

    /// Attribute value cannot be coerced to any permitted type.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
}

impl ParseError {
    /// Short classification used in logs and result payloads.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "ParseError",
            Self::Attribute(_) => "AttributeError",
            Self::UnsupportedType(_) => "UnsupportedTypeError",
        }
    }
}
