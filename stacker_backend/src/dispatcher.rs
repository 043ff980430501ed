//! Command dispatcher.
//!
//! Turns parsed command lines into hardware calls and produces exactly one
//! [`ResultMessage`] per executed command.
//!
//! # Batch order
//!
//! 1. A priority command (`M112`, `M999`) anywhere in the batch runs alone;
//!    the rest of the batch is discarded.
//! 2. Machine commands (`M…`) of every line, in line order.
//! 3. Movement commands (`G…`) of every line, in line order.
//!
//! # Failure policy
//!
//! Per-unit failures are caught here and turned into report entries.
//! `NotSupported` is skipped silently unless it leaves an axis unresolved.
//! Escalating faults (`Fatal`, `Timeout`) set the Emergency Stop flag and
//! halt every unit.

use crate::registry::HardwareRegistry;
use crate::reports::{ReportKind, ReportSource, Reporters};
use crate::safety::EmergencyStop;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value, json};
use stacker_common::consts::{EMERGENCY_STOP, RESET};
use stacker_common::gcode::{AttributeMap, AttributeValue, CommandKind, ParsedCommand};
use stacker_common::hardware::{Capabilities, Direction, HardwareError, SharedUnit};
use stacker_common::message::{EXIT_FAILURE, EXIT_SUCCESS, ResultMessage};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

/// Exit code and payload of one executed command.
type Outcome = (u8, Value);

/// Keep-alive payload sent by `M113`.
pub const KEEP_ALIVE_MESSAGE: &str = "The backend is still alive!!";

/// Interpretation of movement values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositioningMode {
    /// `G90`: values are target positions.
    Absolute,
    /// `G91`: values are offsets from the current position.
    #[default]
    Relative,
}

/// Positioning mode shared by every dispatcher clone.
pub type SharedMode = Arc<RwLock<PositioningMode>>;

/// Command dispatcher. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HardwareRegistry>,
    safety: EmergencyStop,
    mode: SharedMode,
    reporters: Arc<Reporters>,
    outbox: Sender<ResultMessage>,
}

impl Dispatcher {
    /// Create a dispatcher. `outbox` receives asynchronous results
    /// (periodic reports).
    pub fn new(
        registry: Arc<HardwareRegistry>,
        safety: EmergencyStop,
        mode: SharedMode,
        outbox: Sender<ResultMessage>,
    ) -> Self {
        let reporters = Arc::new(Reporters::new(safety.clone(), outbox.clone()));
        Self {
            registry,
            safety,
            mode,
            reporters,
            outbox,
        }
    }

    pub fn registry(&self) -> &Arc<HardwareRegistry> {
        &self.registry
    }

    pub fn safety(&self) -> &EmergencyStop {
        &self.safety
    }

    pub fn reporters(&self) -> &Reporters {
        &self.reporters
    }

    pub fn outbox(&self) -> &Sender<ResultMessage> {
        &self.outbox
    }

    pub fn positioning_mode(&self) -> PositioningMode {
        *self.mode.read()
    }

    /// Command every unit to halt immediately.
    pub fn halt_all(&self) {
        self.registry.emergency_stop_all();
    }

    /// Execute one parsed line and collect its results.
    pub fn dispatch(&self, parsed: &ParsedCommand, line: &str) -> Vec<ResultMessage> {
        let mut results = Vec::with_capacity(parsed.len());
        self.dispatch_batch(&[(line.to_string(), parsed.clone())], &mut |msg| {
            results.push(msg)
        });
        results
    }

    /// Execute a batch of parsed lines, emitting each result as it is produced.
    pub fn dispatch_batch(
        &self,
        batch: &[(String, ParsedCommand)],
        emit: &mut dyn FnMut(ResultMessage),
    ) {
        if let Some((line, parsed)) = priority_line(batch).map(|i| &batch[i]) {
            if batch.len() > 1 {
                warn!("Priority command in {:?} discards the rest of its batch", line);
            }
            if let Some(msg) = self.execute_priority(parsed, line) {
                emit(msg);
            }
            return;
        }

        for (line, parsed) in batch {
            for (id, attributes) in parsed.iter() {
                match CommandKind::of(id) {
                    CommandKind::Machine => emit(self.execute(id, attributes, line)),
                    CommandKind::Unknown => emit(ResultMessage::failure(
                        id,
                        format!("Unknown command {id}"),
                        line.as_str(),
                    )),
                    CommandKind::Movement | CommandKind::Priority => {}
                }
            }
        }

        for (line, parsed) in batch {
            for (id, attributes) in parsed.iter() {
                if CommandKind::of(id) == CommandKind::Movement {
                    emit(self.execute(id, attributes, line));
                }
            }
        }
    }

    /// Execute the priority command of `parsed`, if any. `M112` wins over `M999`.
    pub fn execute_priority(&self, parsed: &ParsedCommand, line: &str) -> Option<ResultMessage> {
        let (id, outcome) = if parsed.contains(EMERGENCY_STOP) {
            (EMERGENCY_STOP, self.emergency_stop())
        } else if let Some(attributes) = parsed.get(RESET) {
            (RESET, self.reset(attributes))
        } else {
            return None;
        };
        Some(ResultMessage::new(outcome.0, id, outcome.1, line))
    }

    fn execute(&self, id: &str, attributes: &AttributeMap, line: &str) -> ResultMessage {
        debug!("Executing {} {:?}", id, attributes);
        let (exit_code, msg) = match id {
            "G0" | "G1" => self.movement(id, attributes),
            "G28" => self.home_all(),
            "G90" => self.set_mode(PositioningMode::Absolute),
            "G91" => self.set_mode(PositioningMode::Relative),
            "M0" => self.stop_all(Value::from("Machine stopped.")),
            "M92" => self.steps_per_unit(attributes),
            "M105" => temperature_report(&self.registry),
            "M114" => position_report(&self.registry),
            "M140" => self.set_bed_temperature(attributes),
            "M811" => self.jog(attributes),
            "M812" => self.set_speed(attributes),
            "M813" if attributes.is_empty() => self.stop_all(Value::Null),
            "M813" => self.per_axis("stops", attributes, |unit, _| unit.stop()),
            "M112" => self.emergency_stop(),
            "M999" => self.reset(attributes),
            other => match ReportKind::from_command(other) {
                Some(kind) => self.configure_reporter(kind, attributes),
                None => (EXIT_FAILURE, Value::from(format!("Unknown command {other}"))),
            },
        };
        if exit_code != EXIT_SUCCESS {
            debug!("{} failed: {}", id, msg);
        }
        ResultMessage::new(exit_code, id, msg, line)
    }

    // ─── Movement ───────────────────────────────────────────────────

    fn movement(&self, id: &str, axes: &AttributeMap) -> Outcome {
        if axes.is_empty() {
            return (EXIT_FAILURE, Value::from(format!("No axes given for {id}")));
        }
        let mode = self.positioning_mode();
        let rotary = id == "G1";

        let mut unresolved = Unresolved::default();
        for (&axis, value) in axes {
            let result = self.unit_for(axis).and_then(|unit| {
                let amount = numeric(value)?;
                self.registry.guarded(|| match (rotary, mode) {
                    (false, PositioningMode::Relative) => unit.move_by(amount),
                    (false, PositioningMode::Absolute) => unit.move_to(amount),
                    (true, PositioningMode::Relative) => unit.rotate_by(amount),
                    (true, PositioningMode::Absolute) => unit.rotate_to(amount),
                })
            });
            if let Err(e) = result {
                self.record(axis, value.to_json(), e, &mut unresolved);
            }
        }
        unresolved.into_outcome("Not all movements were executed", Value::Null)
    }

    fn home_all(&self) -> Outcome {
        self.for_each_unit(
            |unit| self.registry.guarded(|| unit.home()),
            Value::Null,
        )
    }

    fn set_mode(&self, target: PositioningMode) -> Outcome {
        let name = match target {
            PositioningMode::Absolute => "absolute",
            PositioningMode::Relative => "relative",
        };
        let mut mode = self.mode.write();
        if *mode == target {
            (
                EXIT_SUCCESS,
                Value::from(format!("Already in {name} positioning mode.")),
            )
        } else {
            *mode = target;
            info!("Positioning mode set to {}", name);
            (
                EXIT_SUCCESS,
                Value::from(format!("Now in {name} positioning mode.")),
            )
        }
    }

    // ─── Machine ────────────────────────────────────────────────────

    fn stop_all(&self, ok: Value) -> Outcome {
        self.for_each_unit(|unit| unit.stop(), ok)
    }

    fn steps_per_unit(&self, axes: &AttributeMap) -> Outcome {
        if !axes.is_empty() {
            return self.per_axis("step factor changes", axes, |unit, value| {
                let steps = numeric(value)?;
                self.registry.guarded(|| unit.set_steps_per_unit(steps))
            });
        }
        collect_report(&self.registry, "Could not read all step factors", |unit| {
            unit.steps_per_unit().map(Value::from)
        })
    }

    fn set_bed_temperature(&self, attributes: &AttributeMap) -> Outcome {
        let Some(value) = attributes.get(&'S') else {
            return (EXIT_FAILURE, Value::from("No temperature given"));
        };
        let Some(temperature) = value.as_f64() else {
            return (
                EXIT_FAILURE,
                Value::from(format!("Invalid temperature {value}")),
            );
        };

        let beds: Vec<&SharedUnit> = self
            .registry
            .with_capability(Capabilities::TEMPERATURE)
            .collect();
        let targets = match attributes.get(&'I') {
            None => beds,
            Some(index) => {
                let selected = index
                    .as_i64()
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| beds.get(i).copied());
                match selected {
                    Some(unit) => vec![unit],
                    None => {
                        return (
                            EXIT_FAILURE,
                            Value::from(format!("No temperature unit with index {index}")),
                        );
                    }
                }
            }
        };
        if targets.is_empty() {
            return (
                EXIT_FAILURE,
                Value::from("No temperature-capable unit registered"),
            );
        }

        let mut unresolved = Unresolved::default();
        for unit in targets {
            let result = self
                .registry
                .guarded(|| unit.set_target_temperature(temperature));
            if let Err(e) = result {
                self.record(unit.id(), Value::from(temperature), e, &mut unresolved);
            }
        }
        unresolved.into_outcome("Not all temperature changes were executed", Value::Null)
    }

    fn jog(&self, axes: &AttributeMap) -> Outcome {
        self.per_axis("jog commands", axes, |unit, value| {
            let amount = numeric(value)?;
            if amount == 0.0 {
                return self.registry.guarded(|| unit.stop_jog());
            }
            let direction = Direction::from_sign(amount).ok_or_else(|| {
                HardwareError::InvalidArgument(format!(
                    "jog value must be 1, -1 or 0, got {value}"
                ))
            })?;
            self.registry.guarded(|| unit.start_jog(direction))
        })
    }

    fn set_speed(&self, axes: &AttributeMap) -> Outcome {
        self.per_axis("speed changes", axes, |unit, value| {
            let speed = numeric(value)?;
            self.registry.guarded(|| unit.set_speed(speed))
        })
    }

    fn configure_reporter(&self, kind: ReportKind, attributes: &AttributeMap) -> Outcome {
        let registry = Arc::clone(&self.registry);
        let source: ReportSource = match kind {
            ReportKind::KeepAlive => {
                Arc::new(|| (EXIT_SUCCESS, Value::from(KEEP_ALIVE_MESSAGE)))
            }
            ReportKind::Position => Arc::new(move || position_report(&registry)),
            ReportKind::Temperature => Arc::new(move || temperature_report(&registry)),
        };
        self.reporters.configure(kind, attributes, source)
    }

    // ─── Priority ───────────────────────────────────────────────────

    fn emergency_stop(&self) -> Outcome {
        error!("Emergency stop requested");
        self.safety.trigger();
        self.halt_all();
        (EXIT_SUCCESS, Value::Null)
    }

    /// `M999`: disconnect, clear the flag, reconnect. `S0` clears only.
    fn reset(&self, attributes: &AttributeMap) -> Outcome {
        let reconnect = attributes
            .get(&'S')
            .and_then(AttributeValue::as_bool)
            .unwrap_or(true);
        warn!("Reset requested (reconnect={})", reconnect);

        if reconnect {
            if let Err(e) = self.registry.disconnect_all() {
                warn!("Disconnect before reset incomplete: {}", e);
            }
        }
        self.safety.clear();

        if reconnect {
            if let Err(e) = self.registry.connect_all() {
                error!("Reset failed, hardware did not reconnect: {}", e);
                self.safety.trigger();
                self.halt_all();
                return (
                    EXIT_FAILURE,
                    Value::from(format!("Reset failed, hardware did not reconnect: {e}")),
                );
            }
        }
        info!("Reset complete");
        (EXIT_SUCCESS, Value::Null)
    }

    // ─── Helpers ────────────────────────────────────────────────────

    fn unit_for(&self, axis: char) -> Result<&SharedUnit, HardwareError> {
        self.registry.get(axis).ok_or_else(|| {
            HardwareError::InvalidArgument(format!("No unit registered for axis {axis}"))
        })
    }

    /// Apply `op` to the unit of every axis entry.
    fn per_axis(
        &self,
        what: &str,
        axes: &AttributeMap,
        op: impl Fn(&SharedUnit, &AttributeValue) -> Result<(), HardwareError>,
    ) -> Outcome {
        if axes.is_empty() {
            return (EXIT_FAILURE, Value::from("No axes given"));
        }
        let mut unresolved = Unresolved::default();
        for (&axis, value) in axes {
            if let Err(e) = self.unit_for(axis).and_then(|unit| op(unit, value)) {
                self.record(axis, value.to_json(), e, &mut unresolved);
            }
        }
        unresolved.into_outcome(&format!("Not all {what} were executed"), Value::Null)
    }

    /// Apply `op` to every unit, skipping units that do not support it.
    fn for_each_unit(
        &self,
        op: impl Fn(&SharedUnit) -> Result<(), HardwareError>,
        ok: Value,
    ) -> Outcome {
        let mut unresolved = Unresolved::default();
        for unit in self.registry.iter() {
            match op(unit) {
                Ok(()) => {}
                Err(e) if e.is_not_supported() => {
                    debug!("Unit {}: {}", unit.id(), e);
                }
                Err(e) => self.record(unit.id(), Value::Null, e, &mut unresolved),
            }
        }
        unresolved.into_outcome("Not all units completed the command", ok)
    }

    /// Record a per-unit failure, escalating communication faults.
    fn record(&self, id: char, value: Value, err: HardwareError, unresolved: &mut Unresolved) {
        if err.is_not_supported() {
            debug!("Unit {}: {}", id, err);
        } else if err.escalates() {
            error!("Unit {} fault escalates to emergency stop: {}", id, err);
            if self.safety.trigger() {
                self.halt_all();
            }
        } else {
            warn!("Unit {}: {}", id, err);
        }
        unresolved.push(id, value, &err);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("mode", &self.positioning_mode())
            .field("reporters", &self.reporters)
            .finish()
    }
}

/// Entries a command could not resolve, with the reason per entry.
#[derive(Default)]
struct Unresolved {
    entries: Map<String, Value>,
    reasons: Map<String, Value>,
}

impl Unresolved {
    fn push(&mut self, id: char, value: Value, err: &HardwareError) {
        self.entries.insert(id.to_string(), value);
        self.reasons.insert(id.to_string(), Value::from(err.to_string()));
    }

    fn into_outcome(self, error: &str, ok: Value) -> Outcome {
        if self.entries.is_empty() {
            (EXIT_SUCCESS, ok)
        } else {
            (
                EXIT_FAILURE,
                json!({
                    "error": error,
                    "unresolved": self.entries,
                    "reasons": self.reasons,
                }),
            )
        }
    }
}

/// Index of the line whose priority command runs for `batch`.
///
/// The first line carrying `M112` wins; `M999` is used only when no line
/// asks for an emergency stop.
pub fn priority_line(batch: &[(String, ParsedCommand)]) -> Option<usize> {
    batch
        .iter()
        .position(|(_, p)| p.contains(EMERGENCY_STOP))
        .or_else(|| batch.iter().position(|(_, p)| p.contains(RESET)))
}

fn numeric(value: &AttributeValue) -> Result<f64, HardwareError> {
    value
        .as_f64()
        .ok_or_else(|| HardwareError::InvalidArgument(format!("{value} is not a number")))
}

/// Build `{id: value}` over every unit supporting `read`.
fn collect_report(
    registry: &HardwareRegistry,
    error: &str,
    read: impl Fn(&SharedUnit) -> Result<Value, HardwareError>,
) -> Outcome {
    let mut report = Map::new();
    let mut reasons = Map::new();
    for unit in registry.iter() {
        match registry.guarded(|| read(unit)) {
            Ok(value) => {
                report.insert(unit.id().to_string(), value);
            }
            Err(e) if e.is_not_supported() => {
                debug!("Unit {}: {}", unit.id(), e);
            }
            Err(e) => {
                reasons.insert(unit.id().to_string(), Value::from(e.to_string()));
            }
        }
    }
    if reasons.is_empty() {
        (EXIT_SUCCESS, Value::Object(report))
    } else {
        (
            EXIT_FAILURE,
            json!({ "error": error, "report": report, "reasons": reasons }),
        )
    }
}

/// `M114` payload: `{id: position}`.
pub fn position_report(registry: &HardwareRegistry) -> Outcome {
    collect_report(registry, "Could not get all positions", |unit| {
        unit.position().map(Value::from)
    })
}

/// `M105` payload: `{id: {"current": t, "target": t}}`.
pub fn temperature_report(registry: &HardwareRegistry) -> Outcome {
    collect_report(registry, "Could not get all temperatures", |unit| {
        let current = unit.temperature()?;
        let target = unit.target_temperature()?;
        Ok(json!({ "current": current, "target": target }))
    })
}
