//! Framed duplex messaging channel.
//!
//! # Wire Format
//!
//! Newline-terminated records:
//!
//! | Record | Meaning |
//! |--------|---------|
//! | one line of compact JSON | one item of the current message |
//! | `EOM` | end of the current message |
//! | `SENTINEL` | close the connection after draining |
//!
//! Compact JSON never contains a raw newline and neither bare word is
//! valid JSON, so the control records cannot appear inside data.
//!
//! - [`frame`] - `encode_message`, `FrameDecoder`
//! - [`endpoint`] - `Endpoint`, `Role`, handshake
//! - [`transport`] - stdio, child process, serial and in-memory transports

pub mod endpoint;
pub mod frame;
pub mod transport;

pub use endpoint::{Endpoint, Role};
pub use frame::{Frame, FrameDecoder, encode_message, encode_sentinel};
pub use transport::memory_pair;

use thiserror::Error;

/// Error types for channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport read/write failure.
    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record is not valid JSON or does not match the expected type.
    #[error("Channel codec error: {0}")]
    Codec(String),

    /// Startup handshake failed. Fatal to process startup.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Connection closed by SENTINEL, end of stream or `disconnect()`.
    #[error("Channel closed")]
    Closed,
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
