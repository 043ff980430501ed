//! # Stacker
//!
//! Line front end. Spawns `stacker_backend` with piped stdio, performs the
//! FRONTEND handshake, forwards operator lines read from stdin and prints
//! every result message as one JSON line on stdout.
//!
//! Lines read within one poll interval travel as one batch. On end of
//! input or Ctrl-C the front end sends SENTINEL, prints the results still
//! in flight and waits for the backend to exit.
//!
//! # Usage
//!
//! ```bash
//! echo "G0 X5" | stacker --backend target/release/stacker_backend
//! stacker -c config/backend.toml -v
//! ```

#![deny(warnings)]

use clap::Parser;
use stacker_common::channel::{ChannelError, Endpoint, Role};
use stacker_common::consts::{DEFAULT_HANDSHAKE_RETRY_MS, DEFAULT_POLL_INTERVAL_MS};
use stacker_common::message::ResultMessage;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Stacker - line front end for the stacking setup
#[derive(Parser, Debug)]
#[command(name = "stacker")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Forward operator command lines to the stacker backend")]
#[command(long_about = None)]
struct Args {
    /// Backend executable
    #[arg(long, value_name = "PATH", default_value = "stacker_backend")]
    backend: PathBuf,

    /// Backend configuration file, passed through to the backend
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Period between handshake greetings [ms]
    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_RETRY_MS)]
    handshake_retry_ms: u64,

    /// Input polling interval [ms]
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_ms: u64,

    /// Enable verbose logging (also passed to the backend)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("Stacker failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("Stacker v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut child = spawn_backend(&args)?;
    let mut endpoint = Endpoint::child(&mut child, Role::Frontend)?;
    endpoint.handshake(Duration::from_millis(args.handshake_retry_ms))?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let input = spawn_stdin_reader()?;
    let poll = Duration::from_millis(args.poll_ms);
    let outcome = forward(&mut endpoint, &input, &running, poll);

    match endpoint.send_sentinel() {
        Ok(()) | Err(ChannelError::Closed) => {}
        Err(e) => warn!("Failed to send sentinel: {}", e),
    }
    drain(&mut endpoint, &mut child, poll)?;
    endpoint.disconnect();

    let status = child.wait()?;
    info!("Backend exited with {}", status);
    outcome?;
    if !status.success() {
        return Err(format!("backend exited with {status}").into());
    }
    Ok(())
}

fn spawn_backend(args: &Args) -> io::Result<Child> {
    let mut command = Command::new(&args.backend);
    if let Some(config) = &args.config {
        command.arg("--config").arg(config);
    }
    if args.verbose {
        command.arg("--verbose");
    }
    if args.json {
        command.arg("--json");
    }
    info!("Spawning backend {:?}", args.backend);
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
}

/// Read operator lines on a background thread.
fn spawn_stdin_reader() -> io::Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("End of operator input");
        })?;
    Ok(rx)
}

/// Forward input batches and print results until input ends, the backend
/// closes the channel or the running flag is cleared.
fn forward(
    endpoint: &mut Endpoint,
    input: &Receiver<String>,
    running: &AtomicBool,
    poll: Duration,
) -> Result<(), ChannelError> {
    while running.load(Ordering::SeqCst) {
        let mut batch = Vec::new();
        let mut input_closed = false;
        loop {
            match input.try_recv() {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => batch.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    input_closed = true;
                    break;
                }
            }
        }
        if !batch.is_empty() {
            debug!("Sending {} line(s)", batch.len());
            endpoint.send(&batch)?;
        }
        if input_closed {
            return Ok(());
        }

        while let Some(results) = endpoint.receive::<ResultMessage>()? {
            print_results(&results);
        }
        if !endpoint.is_connected() {
            warn!("Backend closed the channel");
            return Ok(());
        }
        thread::sleep(poll);
    }
    Ok(())
}

/// Print results still in flight until the backend closes or exits.
fn drain(endpoint: &mut Endpoint, child: &mut Child, poll: Duration) -> io::Result<()> {
    loop {
        match endpoint.receive_timeout::<ResultMessage>(poll) {
            Ok(Some(results)) => print_results(&results),
            Ok(None) => {
                if child.try_wait()?.is_some() {
                    return Ok(());
                }
            }
            Err(ChannelError::Closed) => return Ok(()),
            Err(e) => {
                warn!("Dropping undecodable result message: {}", e);
            }
        }
    }
}

fn print_results(results: &[ResultMessage]) {
    for result in results {
        match serde_json::to_string(result) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode result: {}", e),
        }
    }
}

/// Setup tracing subscriber based on CLI arguments.
///
/// Logs go to stderr; stdout carries the result lines.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}
