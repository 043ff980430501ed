//! Simulated hardware unit.
//!
//! Motion is split into steps of at most `check_interval` axis units. The
//! controller lock is held for one step only and the Emergency Stop flag is
//! checked between steps, so an in-flight move stops within one interval
//! and never blocks `emergency_stop()`.

use super::controller::{ChannelState, HALT_LOCK_TIMEOUT, Jog, SimController};
use crate::safety::EmergencyStop;
use stacker_common::config::{UnitConfig, UnitKind};
use stacker_common::hardware::{Capabilities, Direction, HardwareError, HardwareUnit};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Upper bound accepted by `set_target_temperature` [°C].
pub const MAX_BED_TEMPERATURE: f64 = 200.0;

/// Fraction of the remaining gap closed on every temperature read.
const HEATING_RATE: f64 = 0.5;

/// Software stage implementing the capability contract.
#[derive(Debug)]
pub struct SimulatedUnit {
    id: char,
    kind: UnitKind,
    controller: Arc<SimController>,
    channel: usize,
    limits: (f64, f64),
    max_speed: f64,
    travel_time_per_unit_ms: f64,
    check_interval: f64,
    safety: EmergencyStop,
    halt: AtomicBool,
    connected: AtomicBool,
}

impl SimulatedUnit {
    /// Create a unit on `controller` from its configuration entry.
    pub fn new(
        config: &UnitConfig,
        controller: Arc<SimController>,
        check_interval: f64,
        safety: EmergencyStop,
    ) -> Self {
        let initial = ChannelState {
            speed: config.speed.unwrap_or(1.0),
            acceleration: config.acceleration.unwrap_or(1.0),
            steps_per_unit: config.steps_per_unit.unwrap_or(1.0),
            ..Default::default()
        };
        let channel = controller.attach(initial);

        Self {
            id: config.id,
            kind: config.kind,
            controller,
            channel,
            limits: (
                config.min_position.unwrap_or(f64::NEG_INFINITY),
                config.max_position.unwrap_or(f64::INFINITY),
            ),
            max_speed: config.max_speed.unwrap_or(f64::INFINITY),
            travel_time_per_unit_ms: config.travel_time_per_unit_ms,
            check_interval,
            safety,
            halt: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn controller(&self) -> &SimController {
        &self.controller
    }

    fn require(&self, cap: Capabilities, operation: &'static str) -> Result<(), HardwareError> {
        if !self.capabilities().contains(cap) {
            return Err(HardwareError::not_supported(operation));
        }
        if !self.is_connected() {
            return Err(HardwareError::NotConnected { unit: self.id });
        }
        Ok(())
    }

    /// Run `f` on this unit's channel under the controller lock.
    fn with_state<T>(&self, f: impl FnOnce(&mut ChannelState) -> T) -> Result<T, HardwareError> {
        let mut channels = self.controller.lock();
        let state = channels.get_mut(self.channel).ok_or_else(|| {
            HardwareError::fatal(format!(
                "controller {} has no channel {}",
                self.controller.name(),
                self.channel
            ))
        })?;
        Ok(f(state))
    }

    fn check_positive(&self, what: &str, value: f64) -> Result<(), HardwareError> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(HardwareError::InvalidArgument(format!(
                "{what} must be positive on unit {}, got {value}",
                self.id
            )))
        }
    }

    /// Drive the channel to the position returned by `target(current)`.
    fn travel(
        &self,
        operation: &'static str,
        target: impl FnOnce(f64) -> f64,
    ) -> Result<(), HardwareError> {
        self.halt.store(false, Ordering::SeqCst);
        let limits = self.limits;
        let target = self.with_state(|s| {
            s.finish_jog(limits);
            target(s.position)
        })?;

        if !target.is_finite() || target < limits.0 || target > limits.1 {
            return Err(HardwareError::InvalidArgument(format!(
                "{operation} target {target} outside travel range [{}, {}] of unit {}",
                limits.0, limits.1, self.id
            )));
        }

        debug!("Unit {} {} → {}", self.id, operation, target);
        loop {
            if self.safety.is_set() {
                warn!("Unit {} {} cut short by emergency stop", self.id, operation);
                return Err(HardwareError::EmergencyStopped);
            }
            if self.halt.load(Ordering::SeqCst) {
                return Err(HardwareError::Aborted { operation });
            }

            let interval = self.check_interval;
            let (step, done) = self.with_state(|s| {
                let remaining = target - s.position;
                if remaining.abs() <= interval {
                    s.position = target;
                    (remaining.abs(), true)
                } else {
                    s.position += interval.copysign(remaining);
                    (interval, false)
                }
            })?;
            trace!("Unit {} stepped {}", self.id, step);

            self.pause(step);
            if done {
                return Ok(());
            }
        }
    }

    /// Simulated travel time for `distance`.
    fn pause(&self, distance: f64) {
        let ms = distance * self.travel_time_per_unit_ms;
        if ms > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(ms / 1000.0));
        }
    }

    fn halt_jog(&self, wait: Option<Duration>) {
        let limits = self.limits;
        let guard = match wait {
            Some(timeout) => self.controller.try_lock_for(timeout),
            None => Some(self.controller.lock()),
        };
        match guard {
            Some(mut channels) => {
                if let Some(state) = channels.get_mut(self.channel) {
                    state.finish_jog(limits);
                }
            }
            None => warn!("Unit {}: controller busy, jog left to halt flag", self.id),
        }
    }
}

impl HardwareUnit for SimulatedUnit {
    fn id(&self) -> char {
        self.id
    }

    fn unit_type(&self) -> &str {
        match self.kind {
            UnitKind::Linear => "simulated_linear",
            UnitKind::Rotary => "simulated_rotary",
            UnitKind::HeatedBed => "simulated_heated_bed",
            UnitKind::XyStepper => "simulated_xy_stepper",
        }
    }

    fn capabilities(&self) -> Capabilities {
        match self.kind {
            UnitKind::Linear | UnitKind::XyStepper => {
                Capabilities::LINEAR
                    | Capabilities::HOMING
                    | Capabilities::JOG
                    | Capabilities::TELEMETRY
                    | Capabilities::STEPS
            }
            UnitKind::Rotary => {
                Capabilities::ROTARY
                    | Capabilities::HOMING
                    | Capabilities::JOG
                    | Capabilities::TELEMETRY
                    | Capabilities::STEPS
            }
            UnitKind::HeatedBed => {
                Capabilities::ROTARY
                    | Capabilities::HOMING
                    | Capabilities::TELEMETRY
                    | Capabilities::TEMPERATURE
            }
        }
    }

    // ─── Connection ─────────────────────────────────────────────────

    fn connect(&self) -> Result<(), HardwareError> {
        self.halt.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), HardwareError> {
        self.halt.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // ─── Stops ──────────────────────────────────────────────────────

    fn stop(&self) -> Result<(), HardwareError> {
        self.halt.store(true, Ordering::SeqCst);
        self.halt_jog(None);
        Ok(())
    }

    fn emergency_stop(&self) -> Result<(), HardwareError> {
        self.halt.store(true, Ordering::SeqCst);
        self.halt_jog(Some(HALT_LOCK_TIMEOUT));
        Ok(())
    }

    // ─── Motion ─────────────────────────────────────────────────────

    fn move_to(&self, position: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::LINEAR, "move_to")?;
        self.travel("move_to", |_| position)
    }

    fn move_by(&self, distance: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::LINEAR, "move_by")?;
        self.travel("move_by", |current| current + distance)
    }

    fn rotate_to(&self, angle: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::ROTARY, "rotate_to")?;
        self.travel("rotate_to", |_| angle)
    }

    fn rotate_by(&self, angle: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::ROTARY, "rotate_by")?;
        self.travel("rotate_by", |current| current + angle)
    }

    fn home(&self) -> Result<(), HardwareError> {
        self.require(Capabilities::HOMING, "home")?;
        let limits = self.limits;
        let home = 0.0_f64.clamp(limits.0, limits.1);
        self.travel("home", |_| home)?;
        self.with_state(|s| s.homed = true)
    }

    fn start_jog(&self, direction: Direction) -> Result<(), HardwareError> {
        self.require(Capabilities::JOG, "start_jog")?;
        self.halt.store(false, Ordering::SeqCst);
        let limits = self.limits;
        self.with_state(|s| {
            s.finish_jog(limits);
            s.jog = Some(Jog {
                direction,
                started: Instant::now(),
            });
        })
    }

    fn stop_jog(&self) -> Result<(), HardwareError> {
        self.require(Capabilities::JOG, "stop_jog")?;
        let limits = self.limits;
        self.with_state(|s| s.finish_jog(limits))
    }

    // ─── Telemetry ──────────────────────────────────────────────────

    fn position(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::TELEMETRY, "position")?;
        let limits = self.limits;
        self.with_state(|s| s.live_position(limits))
    }

    fn speed(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::TELEMETRY, "speed")?;
        self.with_state(|s| s.speed)
    }

    fn set_speed(&self, speed: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::TELEMETRY, "set_speed")?;
        self.check_positive("speed", speed)?;
        if speed > self.max_speed {
            return Err(HardwareError::InvalidArgument(format!(
                "speed {speed} exceeds max_speed {} of unit {}",
                self.max_speed, self.id
            )));
        }
        let limits = self.limits;
        self.with_state(|s| {
            // Jog distance so far is committed at the old speed.
            if let Some(jog) = s.jog {
                s.finish_jog(limits);
                s.jog = Some(Jog {
                    direction: jog.direction,
                    started: Instant::now(),
                });
            }
            s.speed = speed;
        })
    }

    fn acceleration(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::TELEMETRY, "acceleration")?;
        self.with_state(|s| s.acceleration)
    }

    fn temperature(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::TEMPERATURE, "temperature")?;
        self.with_state(|s| {
            s.temperature += (s.target_temperature - s.temperature) * HEATING_RATE;
            s.temperature
        })
    }

    fn target_temperature(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::TEMPERATURE, "target_temperature")?;
        self.with_state(|s| s.target_temperature)
    }

    fn set_target_temperature(&self, temperature: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::TEMPERATURE, "set_target_temperature")?;
        if !(0.0..=MAX_BED_TEMPERATURE).contains(&temperature) {
            return Err(HardwareError::InvalidArgument(format!(
                "target temperature {temperature} outside [0, {MAX_BED_TEMPERATURE}]"
            )));
        }
        self.with_state(|s| s.target_temperature = temperature)
    }

    fn steps_per_unit(&self) -> Result<f64, HardwareError> {
        self.require(Capabilities::STEPS, "steps_per_unit")?;
        self.with_state(|s| s.steps_per_unit)
    }

    fn set_steps_per_unit(&self, steps: f64) -> Result<(), HardwareError> {
        self.require(Capabilities::STEPS, "set_steps_per_unit")?;
        self.check_positive("steps_per_unit", steps)?;
        self.with_state(|s| s.steps_per_unit = steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // ── Helpers ──

    fn unit(id: char, kind: UnitKind) -> (SimulatedUnit, EmergencyStop) {
        let safety = EmergencyStop::new();
        let mut config = UnitConfig::new(id, kind);
        config.min_position = Some(-100.0);
        config.max_position = Some(100.0);
        let unit = SimulatedUnit::new(
            &config,
            Arc::new(SimController::new(id.to_string())),
            10.0,
            safety.clone(),
        );
        unit.connect().unwrap();
        (unit, safety)
    }

    #[test]
    fn test_linear_motion() {
        let (x, _) = unit('X', UnitKind::Linear);
        x.move_by(5.0).unwrap();
        x.move_by(-2.5).unwrap();
        assert_eq!(x.position().unwrap(), 2.5);
        x.move_to(42.0).unwrap();
        assert_eq!(x.position().unwrap(), 42.0);
        assert!(x.rotate_by(1.0).unwrap_err().is_not_supported());
    }

    #[test]
    fn test_rotary_rejects_linear_moves() {
        let (l, _) = unit('L', UnitKind::Rotary);
        assert!(l.move_by(1.0).unwrap_err().is_not_supported());
        l.rotate_to(90.0).unwrap();
        assert_eq!(l.position().unwrap(), 90.0);
    }

    #[test]
    fn test_not_connected() {
        let (x, _) = unit('X', UnitKind::Linear);
        x.disconnect().unwrap();
        assert_eq!(
            x.move_by(1.0).unwrap_err(),
            HardwareError::NotConnected { unit: 'X' }
        );
    }

    #[test]
    fn test_travel_limits() {
        let (z, _) = unit('Z', UnitKind::Linear);
        let err = z.move_to(150.0).unwrap_err();
        assert!(matches!(err, HardwareError::InvalidArgument(_)));
        assert_eq!(z.position().unwrap(), 0.0);
    }

    #[test]
    fn test_emergency_flag_blocks_motion_before_first_step() {
        let (x, safety) = unit('X', UnitKind::Linear);
        safety.trigger();
        assert_eq!(x.move_by(50.0).unwrap_err(), HardwareError::EmergencyStopped);
        assert_eq!(x.position().unwrap(), 0.0);
    }

    #[test]
    fn test_emergency_flag_interrupts_long_move() {
        let safety = EmergencyStop::new();
        let mut config = UnitConfig::new('Y', UnitKind::Linear);
        config.travel_time_per_unit_ms = 2.0;
        let y = Arc::new(SimulatedUnit::new(
            &config,
            Arc::new(SimController::new("y")),
            1.0,
            safety.clone(),
        ));
        y.connect().unwrap();

        let mover = Arc::clone(&y);
        let handle = thread::spawn(move || mover.move_by(1000.0));
        thread::sleep(Duration::from_millis(30));
        safety.trigger();
        y.emergency_stop().unwrap();

        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), HardwareError::EmergencyStopped);
        let reached = y.position().unwrap();
        assert!(reached > 0.0 && reached < 1000.0, "stopped at {reached}");
    }

    #[test]
    fn test_stop_aborts_move() {
        let safety = EmergencyStop::new();
        let mut config = UnitConfig::new('Z', UnitKind::Linear);
        config.travel_time_per_unit_ms = 2.0;
        let z = Arc::new(SimulatedUnit::new(
            &config,
            Arc::new(SimController::new("z")),
            1.0,
            safety,
        ));
        z.connect().unwrap();

        let mover = Arc::clone(&z);
        let handle = thread::spawn(move || mover.move_by(1000.0));
        thread::sleep(Duration::from_millis(20));
        z.stop().unwrap();
        assert!(matches!(
            handle.join().unwrap(),
            Err(HardwareError::Aborted { operation: "move_by" })
        ));
    }

    #[test]
    fn test_heated_bed() {
        let (bed, _) = unit('L', UnitKind::HeatedBed);
        assert!(bed.start_jog(Direction::Forward).unwrap_err().is_not_supported());
        bed.set_target_temperature(65.0).unwrap();
        assert_eq!(bed.target_temperature().unwrap(), 65.0);
        let first = bed.temperature().unwrap();
        let second = bed.temperature().unwrap();
        assert!(first < second && second < 65.0);
        assert!(bed.set_target_temperature(500.0).is_err());
    }

    #[test]
    fn test_jog_moves_until_stopped() {
        let (h, _) = unit('H', UnitKind::XyStepper);
        h.set_speed(1000.0).unwrap();
        h.start_jog(Direction::Forward).unwrap();
        thread::sleep(Duration::from_millis(20));
        h.stop_jog().unwrap();
        let stopped_at = h.position().unwrap();
        assert!(stopped_at > 0.0);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(h.position().unwrap(), stopped_at);
    }

    #[test]
    fn test_speed_and_steps_validation() {
        let mut config = UnitConfig::new('X', UnitKind::Linear);
        config.max_speed = Some(10.0);
        let x = SimulatedUnit::new(
            &config,
            Arc::new(SimController::new("x")),
            10.0,
            EmergencyStop::new(),
        );
        x.connect().unwrap();
        x.set_speed(5.0).unwrap();
        assert_eq!(x.speed().unwrap(), 5.0);
        assert!(x.set_speed(11.0).is_err());
        assert!(x.set_speed(-1.0).is_err());
        x.set_steps_per_unit(0.5).unwrap();
        assert_eq!(x.steps_per_unit().unwrap(), 0.5);
        assert!(x.set_steps_per_unit(0.0).is_err());
    }

    #[test]
    fn test_home_returns_to_zero() {
        let (x, _) = unit('X', UnitKind::Linear);
        x.move_by(-35.0).unwrap();
        x.home().unwrap();
        assert_eq!(x.position().unwrap(), 0.0);
    }
}
