//! Messaging channel integration tests.
//!
//! Handshake between both roles, SENTINEL shutdown and the payload
//! round-trip property over the in-memory transport.

use proptest::prelude::*;
use serde_json::{Value, json};
use stacker_common::channel::{
    ChannelError, Endpoint, Frame, FrameDecoder, Role, encode_message, memory_pair,
};
use stacker_common::consts::{HANDSHAKE_ACK, HANDSHAKE_HELLO};
use stacker_common::message::ResultMessage;
use std::io::{self, Cursor};
use std::thread;
use std::time::Duration;

// ── Helpers ──

const RETRY: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(5);

fn handshaken_pair() -> (Endpoint, Endpoint) {
    let (mut front, mut back) = memory_pair();
    let backend = thread::spawn(move || {
        back.handshake(RETRY).unwrap();
        back
    });
    front.handshake(RETRY).unwrap();
    let back = backend.join().unwrap();
    (front, back)
}

// ── Handshake ──

#[test]
fn handshake_completes_for_both_roles() {
    let (front, back) = handshaken_pair();
    assert!(front.handshake_complete());
    assert!(back.handshake_complete());
    assert_eq!(front.role(), Role::Frontend);
    assert_eq!(back.role(), Role::Backend);
    assert!(front.is_connected() && back.is_connected());
}

#[test]
fn frontend_rejects_unexpected_reply() {
    let (mut front, mut back) = memory_pair();
    let backend = thread::spawn(move || {
        let hello = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
        assert_eq!(hello, vec![HANDSHAKE_HELLO.to_string()]);
        back.send(&["Who are you?"]).unwrap();
        back
    });

    let err = front.handshake(Duration::from_millis(200)).unwrap_err();
    assert!(matches!(err, ChannelError::Handshake(_)), "{err:?}");
    assert!(!front.handshake_complete());
    drop(backend.join().unwrap());
}

#[test]
fn backend_rejects_unexpected_greeting() {
    let (mut front, mut back) = memory_pair();
    front.send(&["M105"]).unwrap();
    let err = back.handshake(RETRY).unwrap_err();
    assert!(matches!(err, ChannelError::Handshake(_)));
}

#[test]
fn backend_replies_with_acknowledgement() {
    let (mut front, mut back) = memory_pair();
    front.send(&[HANDSHAKE_HELLO]).unwrap();
    back.handshake(RETRY).unwrap();

    let reply = front.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(reply, vec![HANDSHAKE_ACK.to_string()]);
}

// ── Traffic ──

#[test]
fn result_messages_cross_the_channel() {
    let (mut front, mut back) = handshaken_pair();
    front.send(&["M114"]).unwrap();

    let batch = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(batch, vec!["M114".to_string()]);

    let result = ResultMessage::success("M114", json!({"X": 0.0}), "M114");
    back.send(&[result.clone()]).unwrap();

    let received = front.receive_timeout::<ResultMessage>(WAIT).unwrap().unwrap();
    assert_eq!(received, vec![result]);
}

#[test]
fn sentinel_closes_after_drain() {
    let (mut front, mut back) = handshaken_pair();
    front.send(&["G0 X1"]).unwrap();
    front.send_sentinel().unwrap();

    let batch = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(batch, vec!["G0 X1".to_string()]);
    assert!(matches!(
        back.receive_timeout::<String>(WAIT),
        Err(ChannelError::Closed)
    ));
    assert!(!back.is_connected());
}

#[test]
fn wrong_item_type_is_codec_error() {
    let (mut front, mut back) = handshaken_pair();
    front.send(&[json!({"not": "a line"})]).unwrap();
    let result = back.receive_timeout::<String>(WAIT);
    assert!(matches!(result, Err(ChannelError::Codec(_))));
}

#[test]
fn message_after_line_noise_still_arrives() {
    let mut bytes = b"\x07garbled\r\nEOM\n".to_vec();
    bytes.extend(encode_message(&["G0 X1", "M114"]).unwrap());
    let mut back = Endpoint::new(Cursor::new(bytes), io::sink(), Role::Backend);

    let noise = back.receive_timeout::<String>(WAIT);
    assert!(matches!(noise, Err(ChannelError::Codec(_))), "{noise:?}");

    let batch = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(batch, vec!["G0 X1".to_string(), "M114".to_string()]);
    assert!(matches!(
        back.receive_timeout::<String>(WAIT),
        Err(ChannelError::Closed)
    ));
}

#[test]
fn greeting_is_traffic_once_real_messages_flow() {
    let (mut front, mut back) = handshaken_pair();

    // A retry that was still in flight when the exchange ended.
    front.send(&[HANDSHAKE_HELLO]).unwrap();
    front.send(&["M114"]).unwrap();
    let batch = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(batch, vec!["M114".to_string()]);

    front.send(&[HANDSHAKE_HELLO]).unwrap();
    let batch = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
    assert_eq!(batch, vec![HANDSHAKE_HELLO.to_string()]);
}

// ── Properties ──

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Encoding then decoding yields the same payload.
    #[test]
    fn framing_round_trips(items in prop::collection::vec(".*", 0..8)) {
        let bytes = encode_message(&items).unwrap();
        let frames = FrameDecoder::new().push(&bytes);
        let expected: Vec<Value> = items.iter().map(|s| json!(s)).collect();
        prop_assert_eq!(frames, vec![Frame::Message(expected)]);
    }

    /// The end-of-message record never appears inside encoded data.
    #[test]
    fn eom_never_inside_data(items in prop::collection::vec(".*", 1..8)) {
        let bytes = encode_message(&items).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        prop_assert_eq!(lines.len(), items.len() + 1);
        prop_assert!(lines[..items.len()].iter().all(|l| *l != "EOM" && *l != "SENTINEL"));
        prop_assert_eq!(lines[items.len()], "EOM");
    }

    /// Sending then receiving over an endpoint pair yields the same payload.
    #[test]
    fn endpoint_round_trips(items in prop::collection::vec(".*", 0..8)) {
        let (mut front, mut back) = memory_pair();
        front.send(&items).unwrap();
        let got = back.receive_timeout::<String>(WAIT).unwrap().unwrap();
        prop_assert_eq!(got, items);
    }
}
