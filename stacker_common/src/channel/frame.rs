//! Message framing.

use super::ChannelError;
use crate::consts::{EOM, SENTINEL};
use serde::Serialize;
use serde_json::Value;

/// One decoded unit of the wire stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Items of one application message.
    Message(Vec<Value>),
    /// Peer requested connection close.
    Sentinel,
    /// A message that held a record which is not JSON. Its items are dropped.
    Malformed(String),
}

/// Encode `items` as one message (item records followed by `EOM`).
pub fn encode_message<T: Serialize>(items: &[T]) -> Result<Vec<u8>, ChannelError> {
    let mut out = Vec::new();
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.push(b'\n');
    }
    out.extend_from_slice(EOM.as_bytes());
    out.push(b'\n');
    Ok(out)
}

/// Encode the close record.
pub fn encode_sentinel() -> Vec<u8> {
    let mut out = SENTINEL.as_bytes().to_vec();
    out.push(b'\n');
    out
}

/// Incremental decoder turning raw bytes into frames.
///
/// Partial lines are buffered across `push` calls. `\r\n` line endings
/// (serial lines) are accepted. Blank lines are ignored.
///
/// A record that is not JSON poisons the message it belongs to: the rest
/// of that message is skipped and its `EOM` yields [`Frame::Malformed`].
/// Decoding carries on with the next message.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending: Vec<Value>,
    malformed: Option<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame completed by them.
    ///
    /// Items received before a `SENTINEL` without their `EOM` are still
    /// delivered as a message ahead of the sentinel frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }

            if line == EOM.as_bytes() {
                frames.push(self.finish());
            } else if line == SENTINEL.as_bytes() {
                if !self.pending.is_empty() || self.malformed.is_some() {
                    frames.push(self.finish());
                }
                frames.push(Frame::Sentinel);
            } else if self.malformed.is_none() {
                match serde_json::from_slice::<Value>(&line) {
                    Ok(value) => self.pending.push(value),
                    Err(e) => {
                        self.pending.clear();
                        self.malformed = Some(e.to_string());
                    }
                }
            }
        }
        frames
    }

    /// `true` when no partial record or message is buffered.
    pub fn is_idle(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_empty() && self.malformed.is_none()
    }

    fn finish(&mut self) -> Frame {
        let items = std::mem::take(&mut self.pending);
        match self.malformed.take() {
            Some(reason) => Frame::Malformed(reason),
            None => Frame::Message(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_layout() {
        let bytes = encode_message(&["G0 X5", "M105"]).unwrap();
        assert_eq!(bytes, b"\"G0 X5\"\n\"M105\"\nEOM\n".to_vec());
    }

    #[test]
    fn test_control_words_inside_data_stay_data() {
        let payload = vec!["EOM".to_string(), "SENTINEL".to_string(), "a\nEOM\nb".to_string()];
        let bytes = encode_message(&payload).unwrap();

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(
            frames,
            vec![Frame::Message(vec![json!("EOM"), json!("SENTINEL"), json!("a\nEOM\nb")])]
        );
    }

    #[test]
    fn test_split_across_pushes() {
        let bytes = encode_message(&[json!({"exit_code": 0})]).unwrap();
        let (a, b) = bytes.split_at(5);

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(a).is_empty());
        assert!(!decoder.is_idle());
        let frames = decoder.push(b);
        assert_eq!(frames, vec![Frame::Message(vec![json!({"exit_code": 0})])]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_sentinel_after_messages() {
        let mut bytes = encode_message(&["M114"]).unwrap();
        bytes.extend(b"\"M105\"\n");
        bytes.extend(encode_sentinel());

        let frames = FrameDecoder::new().push(&bytes);
        assert_eq!(
            frames,
            vec![
                Frame::Message(vec![json!("M114")]),
                Frame::Message(vec![json!("M105")]),
                Frame::Sentinel,
            ]
        );
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let frames = FrameDecoder::new().push(b"\r\n\"M114\"\r\nEOM\r\n");
        assert_eq!(frames, vec![Frame::Message(vec![json!("M114")])]);
    }

    #[test]
    fn test_garbage_record_poisons_only_its_message() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"\"G0 X1\"\nnot json\n\"G0 X2\"\nEOM\n\"M114\"\nEOM\n");

        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Malformed(reason) if !reason.is_empty()));
        assert_eq!(frames[1], Frame::Message(vec![json!("M114")]));
        assert!(decoder.is_idle());
    }

    #[test]
    fn test_garbage_before_sentinel() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"{oops\n").is_empty());
        assert!(!decoder.is_idle());

        let frames = decoder.push(&encode_sentinel());
        assert!(matches!(frames[0], Frame::Malformed(_)));
        assert_eq!(frames[1], Frame::Sentinel);
    }

    #[test]
    fn test_empty_message() {
        let bytes = encode_message::<Value>(&[]).unwrap();
        let frames = FrameDecoder::new().push(&bytes);
        assert_eq!(frames, vec![Frame::Message(vec![])]);
    }
}
