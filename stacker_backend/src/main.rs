//! # Stacker Backend Binary
//!
//! Command engine process. Talks to the front end over stdin/stdout (or a
//! serial line), logs to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Default simulated fleet on stdio
//! stacker_backend
//!
//! # Explicit configuration, verbose JSON logs
//! stacker_backend --config config/backend.toml -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use stacker_backend::{Dispatcher, EmergencyStop, SharedMode, Supervisor, build_fleet};
use stacker_common::channel::{Endpoint, Role};
use stacker_common::config::{BackendConfig, ConfigError, ConfigLoader, TransportKind};
use stacker_common::consts::DEFAULT_CONFIG_PATH;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Stacker Backend - command engine for the stacking setup
#[derive(Parser, Debug)]
#[command(name = "stacker_backend")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Command engine for the stacking setup")]
#[command(long_about = None)]
struct Args {
    /// Path to backend configuration file (backend.toml).
    /// Without it the default file is used if present, else built-in defaults.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("Backend failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);

    info!("Stacker Backend v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    info!("Service: {}", config.shared.service_name);

    let safety = EmergencyStop::new();
    let registry = build_fleet(&config, &safety)?;
    registry.connect_all()?;
    registry.log_fleet();

    let mut endpoint = match config.channel.transport {
        TransportKind::Stdio => Endpoint::stdio(Role::Backend),
        TransportKind::Serial => {
            let port = config.channel.port.as_deref().unwrap_or_default();
            Endpoint::serial(
                port,
                config.channel.baud_rate,
                config.channel.timeout(),
                Role::Backend,
            )?
        }
    };
    endpoint.handshake(config.channel.handshake_retry())?;

    let (outbox, results) = mpsc::channel();
    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        safety,
        SharedMode::default(),
        outbox,
    );
    let mut supervisor = Supervisor::new(endpoint, dispatcher, results, config.engine.clone());

    let running = supervisor.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    let outcome = supervisor.run();
    if let Err(e) = &outcome {
        error!("Intake loop error: {}", e);
    }
    supervisor.shutdown()?;
    outcome?;

    info!("Stacker Backend shutdown complete");
    Ok(())
}

/// Load the configuration file, falling back to defaults when no file was
/// named and the default path does not exist.
fn load_config(path: Option<&Path>) -> Result<BackendConfig, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            BackendConfig::load(path)
        }
        None => match BackendConfig::load(Path::new(DEFAULT_CONFIG_PATH)) {
            Err(ConfigError::FileNotFound) => {
                warn!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                Ok(BackendConfig::default())
            }
            other => other,
        },
    }
}

/// Setup tracing subscriber based on CLI arguments.
///
/// Logs go to stderr; stdout carries the messaging channel.
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
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
