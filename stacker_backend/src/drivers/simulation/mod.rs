//! Simulation driver module.
//!
//! This module provides software stages for development and testing
//! without physical hardware: linear stages, rotation stages, a heated
//! sample bed and XY stepper axes sharing one controller.

mod controller;
mod unit;

pub use controller::{AMBIENT_TEMPERATURE, ChannelState, Jog, SimController};
pub use unit::{MAX_BED_TEMPERATURE, SimulatedUnit};

use crate::safety::EmergencyStop;
use stacker_common::config::UnitConfig;
use stacker_common::hardware::SharedUnit;
use std::sync::Arc;

/// Factory function to create a simulated unit on `controller`.
pub fn create_unit(
    config: &UnitConfig,
    controller: Arc<SimController>,
    check_interval: f64,
    safety: &EmergencyStop,
) -> SharedUnit {
    Arc::new(SimulatedUnit::new(
        config,
        controller,
        check_interval,
        safety.clone(),
    ))
}
