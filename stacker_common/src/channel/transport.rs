//! Transports carrying the channel.
//!
//! | Transport | Use |
//! |-----------|-----|
//! | stdio | backend side of a spawned process pipe |
//! | child process | front end side of the same pipe |
//! | serial | front end and backend on different machines |
//! | memory | tests, front end and backend in one process |

use super::ChannelError;
use super::endpoint::{Endpoint, Role};
use std::io::{self, Read, Write};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use tracing::{info, warn};

impl Endpoint {
    /// Endpoint over this process' stdin/stdout.
    pub fn stdio(role: Role) -> Self {
        Endpoint::new(io::stdin(), io::stdout(), role)
    }

    /// Endpoint over the piped stdin/stdout of a spawned child.
    pub fn child(child: &mut Child, role: Role) -> Result<Self, ChannelError> {
        let stdout = child.stdout.take().ok_or_else(|| {
            ChannelError::Io(io::Error::other("child stdout is not piped"))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChannelError::Io(io::Error::other("child stdin is not piped")))?;
        Ok(Endpoint::new(stdout, stdin, role))
    }

    /// Endpoint over a serial line.
    pub fn serial(
        port: &str,
        baud_rate: u32,
        timeout: Duration,
        role: Role,
    ) -> Result<Self, ChannelError> {
        let writer = serialport::new(port, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| {
                warn!(port, error = %e, "Failed to open serial port");
                ChannelError::Io(e.into())
            })?;
        let reader = writer.try_clone().map_err(|e| ChannelError::Io(e.into()))?;
        info!(port, baud_rate, "Serial channel opened");
        Ok(Endpoint::new(reader, writer, role))
    }
}

/// Connected FRONTEND/BACKEND endpoints backed by in-memory pipes.
pub fn memory_pair() -> (Endpoint, Endpoint) {
    let (front_writer, back_reader) = pipe();
    let (back_writer, front_reader) = pipe();
    (
        Endpoint::new(front_reader, front_writer, Role::Frontend),
        Endpoint::new(back_reader, back_writer, Role::Backend),
    )
}

/// Unidirectional in-memory byte pipe. Dropping the writer ends the stream.
fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel();
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            offset: 0,
        },
    )
}

struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    offset: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.offset);
        buf[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
