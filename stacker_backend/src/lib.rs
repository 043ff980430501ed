//! # Stacker Backend Library
//!
//! Command engine for the stacking setup: parses operator lines, sequences
//! them into batches and dispatches them to the hardware fleet under a
//! single Emergency Stop flag.
//!
//! # Module Structure
//!
//! - [`safety`] - Emergency Stop flag shared by every thread
//! - [`state`] - Engine state machine (Idle / Executing / EmergencyStopped)
//! - [`registry`] - Registered hardware units with flag-gated access
//! - [`dispatcher`] - Command semantics, one result per command
//! - [`reports`] - Periodic keep-alive / position / temperature reporters
//! - [`supervisor`] - Intake loop and batch worker pool
//! - [`drivers`] - Hardware driver implementations
//! - [`fleet`] - Registry construction from configuration
//! - [`error`] - Backend error type
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     stacker_backend                              │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │  Endpoint   │◄──►│  Supervisor  │───►│  Batch workers      │  │
//! │  │ (channel)   │    │ (intake loop)│    │  (Dispatcher)       │  │
//! │  └─────────────┘    └──────┬───────┘    └──────────┬──────────┘  │
//! │                            │ M112 / M999           │             │
//! │                            ▼                       ▼             │
//! │                   ┌────────────────┐    ┌─────────────────────┐  │
//! │                   │ EmergencyStop  │───►│  HardwareRegistry   │  │
//! │                   │ flag           │    │  (HardwareUnit)     │  │
//! │                   └────────────────┘    └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(warnings)]

pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod fleet;
pub mod registry;
pub mod reports;
pub mod safety;
pub mod state;
pub mod supervisor;

// Re-export key types for convenience
pub use crate::dispatcher::{Dispatcher, PositioningMode, SharedMode};
pub use crate::error::EngineError;
pub use crate::fleet::build_fleet;
pub use crate::registry::HardwareRegistry;
pub use crate::safety::EmergencyStop;
pub use crate::state::{EngineEvent, EngineState, EngineStateMachine, TransitionResult};
pub use crate::supervisor::Supervisor;
