//! Channel endpoint with startup handshake.
//!
//! An [`Endpoint`] owns the writing half of a transport and a reader thread
//! that decodes the reading half into a queue of frames. Receiving never
//! blocks the caller unless it asks to (`receive_timeout`).
//!
//! # Handshake
//!
//! | Role | Behaviour |
//! |------|-----------|
//! | `Backend` | wait for the hello, reply with the acknowledgement, drain |
//! | `Frontend` | send the hello every retry period until the acknowledgement arrives, drain |
//!
//! Any other reply is a [`ChannelError::Handshake`]. Greetings still in
//! flight when the exchange ends are dropped until the first other message
//! arrives; after that a greeting is ordinary traffic.

use super::ChannelError;
use super::frame::{Frame, FrameDecoder, encode_message, encode_sentinel};
use crate::consts::{HANDSHAKE_ACK, HANDSHAKE_HELLO};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Side of the connection an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Frontend,
    Backend,
}

impl FromStr for Role {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FRONTEND" => Ok(Self::Frontend),
            "BACKEND" => Ok(Self::Backend),
            other => Err(ChannelError::Handshake(format!("Unknown role {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frontend => write!(f, "FRONTEND"),
            Self::Backend => write!(f, "BACKEND"),
        }
    }
}

/// Event produced by the reader thread.
enum Inbound {
    Frame(Frame),
    Failed(String),
    Eof,
}

/// One side of a framed duplex connection.
pub struct Endpoint {
    role: Role,
    writer: Option<Box<dyn Write + Send>>,
    inbox: Receiver<Inbound>,
    /// Decoded messages, or the codec error of a malformed one.
    pending: VecDeque<Result<Vec<Value>, String>>,
    connected: Arc<AtomicBool>,
    handshake_complete: bool,
    greeting_window: bool,
    sentinel_received: bool,
}

impl Endpoint {
    /// Wrap a transport. Spawns the reader thread immediately.
    pub fn new<R, W>(reader: R, writer: W, role: Role) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, inbox) = mpsc::channel();
        let connected = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&connected);

        let spawned = thread::Builder::new()
            .name(format!("channel-{}", role.to_string().to_lowercase()))
            .spawn(move || read_loop(reader, tx, flag));
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn channel reader");
            connected.store(false, Ordering::SeqCst);
        }

        Self {
            role,
            writer: Some(Box::new(writer)),
            inbox,
            pending: VecDeque::new(),
            connected,
            handshake_complete: false,
            greeting_window: false,
            sentinel_received: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// `false` after SENTINEL, end of stream, a transport failure or
    /// `disconnect()`. Messages received earlier can still be read.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.sentinel_received && self.writer.is_some()
    }

    /// `true` once the peer has sent SENTINEL.
    pub fn sentinel_received(&self) -> bool {
        self.sentinel_received
    }

    /// Send one message made of `items`.
    pub fn send<T: Serialize>(&mut self, items: &[T]) -> Result<(), ChannelError> {
        let bytes = encode_message(items)?;
        self.write_all(&bytes)
    }

    /// Ask the peer to close after draining.
    pub fn send_sentinel(&mut self) -> Result<(), ChannelError> {
        debug!(role = %self.role, "Sending sentinel");
        self.write_all(&encode_sentinel())
    }

    /// Close the writing half. Already received messages stay readable.
    pub fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// `true` if a message can be read without blocking.
    pub fn message_waiting(&mut self) -> bool {
        self.pump();
        !self.pending.is_empty()
    }

    /// Next message, if one is waiting.
    ///
    /// A message holding a record that is not JSON is reported once as
    /// `Err(Codec)`; later messages are unaffected.
    pub fn receive<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>, ChannelError> {
        self.pump();
        self.pop_pending()
    }

    /// Next message, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `Ok(None)` on timeout and `Err(Closed)` if the connection is
    /// closed with nothing left to read.
    pub fn receive_timeout<T: DeserializeOwned>(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Vec<T>>, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if !self.pending.is_empty() {
                return self.pop_pending();
            }
            if !self.connected.load(Ordering::SeqCst) || self.sentinel_received {
                return Err(ChannelError::Closed);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.inbox.recv_timeout(remaining) {
                Ok(event) => self.accept(event),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    self.connected.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// Perform the startup handshake for this endpoint's role.
    ///
    /// `retry` is the FRONTEND hello period and the BACKEND poll period.
    pub fn handshake(&mut self, retry: Duration) -> Result<(), ChannelError> {
        match self.role {
            Role::Backend => self.backend_handshake(retry)?,
            Role::Frontend => self.frontend_handshake(retry)?,
        }
        self.handshake_complete = true;
        self.greeting_window = true;

        let mut drained = 0usize;
        while self.message_waiting() {
            self.pending.pop_front();
            drained += 1;
        }
        info!(role = %self.role, drained, "Handshake complete");
        Ok(())
    }

    fn backend_handshake(&mut self, retry: Duration) -> Result<(), ChannelError> {
        loop {
            let Some(items) = self.receive_timeout::<Value>(retry)? else {
                continue;
            };
            return match items.first().and_then(Value::as_str) {
                Some(HANDSHAKE_HELLO) => self.send(&[HANDSHAKE_ACK]),
                other => Err(ChannelError::Handshake(format!(
                    "Unexpected message: {other:?}"
                ))),
            };
        }
    }

    fn frontend_handshake(&mut self, retry: Duration) -> Result<(), ChannelError> {
        loop {
            self.send(&[HANDSHAKE_HELLO])?;
            let Some(items) = self.receive_timeout::<Value>(retry)? else {
                continue;
            };
            return match items.first().and_then(Value::as_str) {
                Some(HANDSHAKE_ACK) => Ok(()),
                other => Err(ChannelError::Handshake(format!(
                    "Unexpected message: {other:?}"
                ))),
            };
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;
        let result = writer.write_all(bytes).and_then(|()| writer.flush());
        if let Err(e) = result {
            if e.kind() == ErrorKind::BrokenPipe {
                warn!(role = %self.role, "Pipe closed unexpectedly");
                self.disconnect();
                return Err(ChannelError::Closed);
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn pump(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(event) => self.accept(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    fn accept(&mut self, event: Inbound) {
        match event {
            Inbound::Frame(Frame::Message(items)) => {
                // Late FRONTEND hello retries still in flight after the exchange.
                if self.greeting_window && is_greeting(&items) {
                    debug!(role = %self.role, "Discarding late handshake greeting");
                    return;
                }
                self.greeting_window = false;
                self.pending.push_back(Ok(items));
            }
            Inbound::Frame(Frame::Malformed(reason)) => {
                warn!(role = %self.role, %reason, "Malformed message skipped");
                self.greeting_window = false;
                self.pending.push_back(Err(reason));
            }
            Inbound::Frame(Frame::Sentinel) => {
                debug!(role = %self.role, "Sentinel received");
                self.sentinel_received = true;
            }
            Inbound::Failed(reason) => {
                warn!(role = %self.role, %reason, "Channel reader stopped");
                self.connected.store(false, Ordering::SeqCst);
            }
            Inbound::Eof => self.connected.store(false, Ordering::SeqCst),
        }
    }

    fn pop_pending<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>, ChannelError> {
        let items = match self.pending.pop_front() {
            None => return Ok(None),
            Some(Err(reason)) => return Err(ChannelError::Codec(reason)),
            Some(Ok(items)) => items,
        };
        items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(ChannelError::from))
            .collect::<Result<Vec<T>, _>>()
            .map(Some)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("connected", &self.is_connected())
            .field("handshake_complete", &self.handshake_complete)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_greeting(items: &[Value]) -> bool {
    matches!(items, [Value::String(s)] if s == HANDSHAKE_HELLO || s == HANDSHAKE_ACK)
}

fn read_loop<R: Read>(mut reader: R, tx: Sender<Inbound>, connected: Arc<AtomicBool>) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Inbound::Eof);
                return;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut) => {
                if !connected.load(Ordering::SeqCst) {
                    return;
                }
                continue;
            }
            Err(e) => {
                let _ = tx.send(Inbound::Failed(e.to_string()));
                return;
            }
        };

        for frame in decoder.push(&buf[..n]) {
            let closing = frame == Frame::Sentinel;
            if tx.send(Inbound::Frame(frame)).is_err() || closing {
                return;
            }
        }
    }
}
