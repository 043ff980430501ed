//! Hardware driver implementations.
//!
//! This module contains all driver implementations of the
//! `HardwareUnit` contract:
//!
//! - [`simulation`] - Software stages for development and testing
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `stacker_common::hardware::HardwareUnit`
//! 3. Add a `UnitKind` mapping in `fleet.rs`

pub mod simulation;
