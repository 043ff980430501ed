//! Simulated motion controller.
//!
//! A controller owns the state of one or more axis channels behind a single
//! lock. Units that share a controller (the two axes of an XY stepper base)
//! therefore serialize their hardware transactions, like a real controller
//! that accepts one command at a time.

use parking_lot::{Mutex, MutexGuard};
use stacker_common::hardware::Direction;
use std::time::{Duration, Instant};

/// Longest wait for the controller lock during an emergency halt.
pub const HALT_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Active jog of one channel.
#[derive(Debug, Clone, Copy)]
pub struct Jog {
    pub direction: Direction,
    pub started: Instant,
}

/// Mutable state of one axis channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Position [units] or angle [deg].
    pub position: f64,
    /// Drive speed [units/s].
    pub speed: f64,
    pub acceleration: f64,
    pub steps_per_unit: f64,
    pub homed: bool,
    pub jog: Option<Jog>,
    /// Bed temperature [°C].
    pub temperature: f64,
    pub target_temperature: f64,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            position: 0.0,
            speed: 1.0,
            acceleration: 1.0,
            steps_per_unit: 1.0,
            homed: false,
            jog: None,
            temperature: AMBIENT_TEMPERATURE,
            target_temperature: AMBIENT_TEMPERATURE,
        }
    }
}

/// Start temperature of a heated bed [°C].
pub const AMBIENT_TEMPERATURE: f64 = 21.0;

impl ChannelState {
    /// Position including the distance covered by an active jog.
    pub fn live_position(&self, limits: (f64, f64)) -> f64 {
        match self.jog {
            Some(jog) => {
                let travelled = jog.started.elapsed().as_secs_f64() * self.speed;
                let signed = match jog.direction {
                    Direction::Forward => travelled,
                    Direction::Backward => -travelled,
                };
                (self.position + signed).clamp(limits.0, limits.1)
            }
            None => self.position,
        }
    }

    /// End an active jog, committing the distance covered.
    pub fn finish_jog(&mut self, limits: (f64, f64)) {
        self.position = self.live_position(limits);
        self.jog = None;
    }
}

/// Simulated controller shared by one or more units.
#[derive(Debug)]
pub struct SimController {
    name: String,
    channels: Mutex<Vec<ChannelState>>,
}

impl SimController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Allocate a channel and return its index.
    pub fn attach(&self, initial: ChannelState) -> usize {
        let mut channels = self.channels.lock();
        channels.push(initial);
        channels.len() - 1
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Lock the controller for one transaction.
    pub fn lock(&self) -> MutexGuard<'_, Vec<ChannelState>> {
        self.channels.lock()
    }

    /// Lock the controller, giving up after `timeout`.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, Vec<ChannelState>>> {
        self.channels.try_lock_for(timeout)
    }
}
