//! Shared fixtures for backend integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use stacker_backend::{Dispatcher, EmergencyStop, HardwareRegistry, SharedMode};
use stacker_common::gcode::parse;
use stacker_common::hardware::{Capabilities, Direction, HardwareError, HardwareUnit, SharedUnit};
use stacker_common::message::ResultMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

// ─── RecordingUnit ──────────────────────────────────────────────────

/// Unit that records every call instead of driving hardware.
///
/// Motion calls return the configured fault, if any, and can be slowed
/// down to simulate long moves. A slow move ends early once
/// `emergency_stop()` is called.
pub struct RecordingUnit {
    id: char,
    caps: Capabilities,
    calls: Mutex<Vec<String>>,
    connected: AtomicBool,
    halted: AtomicBool,
    fault: Mutex<Option<HardwareError>>,
    move_time: Duration,
    panics: bool,
}

impl RecordingUnit {
    pub fn new(id: char, caps: Capabilities) -> Arc<Self> {
        Self::build(id, caps, None, Duration::ZERO)
    }

    pub fn linear(id: char) -> Arc<Self> {
        Self::new(
            id,
            Capabilities::LINEAR | Capabilities::HOMING | Capabilities::TELEMETRY,
        )
    }

    pub fn rotary(id: char) -> Arc<Self> {
        Self::new(
            id,
            Capabilities::ROTARY | Capabilities::HOMING | Capabilities::TELEMETRY,
        )
    }

    /// Linear unit whose motion calls fail with `fault`.
    pub fn faulty(id: char, fault: HardwareError) -> Arc<Self> {
        Self::build(id, Capabilities::LINEAR, Some(fault), Duration::ZERO)
    }

    /// Linear unit whose moves take `move_time` unless halted.
    pub fn slow(id: char, move_time: Duration) -> Arc<Self> {
        Self::build(id, Capabilities::LINEAR, None, move_time)
    }

    /// Linear unit whose motion calls panic.
    pub fn panicking(id: char) -> Arc<Self> {
        let mut unit = Self::build(id, Capabilities::LINEAR, None, Duration::ZERO);
        if let Some(inner) = Arc::get_mut(&mut unit) {
            inner.panics = true;
        }
        unit
    }

    fn build(
        id: char,
        caps: Capabilities,
        fault: Option<HardwareError>,
        move_time: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            caps,
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            fault: Mutex::new(fault),
            move_time,
            panics: false,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn log(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn motion(&self, capability: Capabilities, call: String) -> Result<(), HardwareError> {
        if !self.caps.contains(capability) {
            return Err(HardwareError::not_supported("motion"));
        }
        if self.panics {
            panic!("unit {} lost its mind", self.id);
        }
        if let Some(fault) = self.fault.lock().clone() {
            return Err(fault);
        }
        self.halted.store(false, Ordering::SeqCst);
        self.log(call);

        let step = Duration::from_millis(5);
        let mut elapsed = Duration::ZERO;
        while elapsed < self.move_time {
            if self.halted.load(Ordering::SeqCst) {
                return Err(HardwareError::EmergencyStopped);
            }
            std::thread::sleep(step);
            elapsed += step;
        }
        Ok(())
    }
}

impl HardwareUnit for RecordingUnit {
    fn id(&self) -> char {
        self.id
    }

    fn unit_type(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn connect(&self) -> Result<(), HardwareError> {
        self.log("connect".into());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), HardwareError> {
        self.log("disconnect".into());
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Result<(), HardwareError> {
        self.log("stop".into());
        Ok(())
    }

    fn emergency_stop(&self) -> Result<(), HardwareError> {
        self.halted.store(true, Ordering::SeqCst);
        self.log("emergency_stop".into());
        Ok(())
    }

    fn move_to(&self, position: f64) -> Result<(), HardwareError> {
        self.motion(Capabilities::LINEAR, format!("move_to({position})"))
    }

    fn move_by(&self, distance: f64) -> Result<(), HardwareError> {
        self.motion(Capabilities::LINEAR, format!("move_by({distance})"))
    }

    fn rotate_to(&self, angle: f64) -> Result<(), HardwareError> {
        self.motion(Capabilities::ROTARY, format!("rotate_to({angle})"))
    }

    fn rotate_by(&self, angle: f64) -> Result<(), HardwareError> {
        self.motion(Capabilities::ROTARY, format!("rotate_by({angle})"))
    }

    fn home(&self) -> Result<(), HardwareError> {
        if !self.caps.contains(Capabilities::HOMING) {
            return Err(HardwareError::not_supported("home"));
        }
        self.log("home".into());
        Ok(())
    }

    fn start_jog(&self, direction: Direction) -> Result<(), HardwareError> {
        self.log(format!("start_jog({direction:?})"));
        Ok(())
    }

    fn position(&self) -> Result<f64, HardwareError> {
        if !self.caps.contains(Capabilities::TELEMETRY) {
            return Err(HardwareError::not_supported("position"));
        }
        Ok(0.0)
    }
}

// ─── Engine construction ────────────────────────────────────────────

/// Dispatcher over connected `units`, plus the receiving end of its outbox.
pub fn dispatcher_with(units: &[Arc<RecordingUnit>]) -> (Dispatcher, Receiver<ResultMessage>) {
    let safety = EmergencyStop::new();
    let mut registry = HardwareRegistry::new(safety.clone());
    for unit in units {
        let shared: SharedUnit = unit.clone();
        registry.register(shared).expect("unique unit ids");
    }
    registry.connect_all().expect("recording units connect");
    for unit in units {
        unit.clear_calls();
    }

    let (tx, rx) = mpsc::channel();
    let dispatcher = Dispatcher::new(Arc::new(registry), safety, SharedMode::default(), tx);
    (dispatcher, rx)
}

/// Parse and dispatch one line.
pub fn run(dispatcher: &Dispatcher, line: &str) -> Vec<ResultMessage> {
    let parsed = parse(line).expect("test line parses");
    dispatcher.dispatch(&parsed, line)
}
