//! Result messages returned to the front end.
//!
//! Every executed command, successful or not, produces exactly one
//! [`ResultMessage`]. The payload is free-form JSON: plain text for simple
//! acknowledgements, structured objects for reports (`{axis: position}`
//! for `M114`, `{axis: {current, target}}` for `M105`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exit code of a successful command.
pub const EXIT_SUCCESS: u8 = 0;

/// Exit code of a failed command.
pub const EXIT_FAILURE: u8 = 1;

/// Outcome of one executed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// `0` success, `1` failure.
    pub exit_code: u8,
    /// Originating command identifier, empty if unknown.
    pub command_id: String,
    /// Text or structured payload.
    pub msg: Value,
    /// Echo of the input line.
    pub command: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl ResultMessage {
    pub fn new(
        exit_code: u8,
        command_id: impl Into<String>,
        msg: impl Into<Value>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            exit_code,
            command_id: command_id.into(),
            msg: msg.into(),
            command: command.into(),
            timestamp: Utc::now(),
        }
    }

    /// Successful result.
    pub fn success(
        command_id: impl Into<String>,
        msg: impl Into<Value>,
        command: impl Into<String>,
    ) -> Self {
        Self::new(EXIT_SUCCESS, command_id, msg, command)
    }

    /// Failed result.
    pub fn failure(
        command_id: impl Into<String>,
        msg: impl Into<Value>,
        command: impl Into<String>,
    ) -> Self {
        Self::new(EXIT_FAILURE, command_id, msg, command)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    /// Payload as text, if it is a plain string.
    pub fn text(&self) -> Option<&str> {
        self.msg.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors() {
        let ok = ResultMessage::success("G90", "Now in absolute positioning mode.", "G90");
        assert!(ok.is_success());
        assert_eq!(ok.text(), Some("Now in absolute positioning mode."));

        let err = ResultMessage::failure("", "Entry Q1 is not valid", "Q1");
        assert_eq!(err.exit_code, EXIT_FAILURE);
        assert!(err.command_id.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let msg = ResultMessage::success("M114", json!({"X": 1.5}), "M114");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["command_id"], "M114");
        assert_eq!(value["msg"]["X"], 1.5);
        assert_eq!(value["command"], "M114");
        assert!(value["timestamp"].is_string());

        let back: ResultMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }
}
