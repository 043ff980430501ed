//! Periodic reporters (`M113`, `M154`, `M155`).
//!
//! Each reporter is a background thread that pushes one result message
//! into the outbox every `S` seconds. `S0` stops it, a missing `S` asks for
//! the current interval. Reporters stay silent while the Emergency Stop
//! flag is set and exit when the outbox closes or on [`Reporters::stop_all`].

use crate::safety::EmergencyStop;
use parking_lot::Mutex;
use serde_json::Value;
use stacker_common::gcode::AttributeMap;
use stacker_common::message::{EXIT_FAILURE, EXIT_SUCCESS, ResultMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Produces the payload of one periodic report.
pub type ReportSource = Arc<dyn Fn() -> (u8, Value) + Send + Sync>;

/// Kind of periodic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// `M113`: keep-alive heartbeat.
    KeepAlive,
    /// `M154`: position report.
    Position,
    /// `M155`: temperature report.
    Temperature,
}

impl ReportKind {
    pub fn from_command(id: &str) -> Option<Self> {
        match id {
            "M113" => Some(Self::KeepAlive),
            "M154" => Some(Self::Position),
            "M155" => Some(Self::Temperature),
            _ => None,
        }
    }

    /// Command identifier of the configuring command.
    pub const fn command_id(self) -> &'static str {
        match self {
            Self::KeepAlive => "M113",
            Self::Position => "M154",
            Self::Temperature => "M155",
        }
    }

    /// Command echoed in every report.
    pub const fn echo(self) -> &'static str {
        match self {
            Self::KeepAlive => "M113",
            Self::Position => "M114",
            Self::Temperature => "M105",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::KeepAlive => "keep alive",
            Self::Position => "auto position",
            Self::Temperature => "auto temperature",
        }
    }
}

struct Slot {
    interval: f64,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Running periodic reporters, at most one per kind.
pub struct Reporters {
    slots: Mutex<HashMap<ReportKind, Slot>>,
    safety: EmergencyStop,
    outbox: Sender<ResultMessage>,
}

impl Reporters {
    pub fn new(safety: EmergencyStop, outbox: Sender<ResultMessage>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            safety,
            outbox,
        }
    }

    /// Apply an `M113`/`M154`/`M155` command. Returns exit code and payload.
    pub fn configure(
        &self,
        kind: ReportKind,
        attributes: &AttributeMap,
        source: ReportSource,
    ) -> (u8, Value) {
        let label = kind.label();
        let Some(value) = attributes.get(&'S') else {
            return match self.interval(kind) {
                Some(interval) => (EXIT_SUCCESS, Value::from(interval)),
                None => (
                    EXIT_FAILURE,
                    Value::from(format!(
                        "The {label} timer interval was asked but no timer is set"
                    )),
                ),
            };
        };

        let Some(seconds) = value.as_f64().filter(|s| s.is_finite() && *s >= 0.0) else {
            return (
                EXIT_FAILURE,
                Value::from(format!("Invalid {label} interval: {value}")),
            );
        };

        if seconds == 0.0 {
            return if self.stop(kind) {
                (EXIT_SUCCESS, Value::Null)
            } else {
                (
                    EXIT_FAILURE,
                    Value::from(format!(
                        "Tried to stop the {label} timer but no timer is set"
                    )),
                )
            };
        }

        let Ok(period) = Duration::try_from_secs_f64(seconds) else {
            return (
                EXIT_FAILURE,
                Value::from(format!("Invalid {label} interval: {value}")),
            );
        };

        self.stop(kind);
        match self.start(kind, period, source) {
            Ok(()) => (EXIT_SUCCESS, Value::Null),
            Err(e) => (
                EXIT_FAILURE,
                Value::from(format!("Could not start the {label} timer: {e}")),
            ),
        }
    }

    /// Interval of the running reporter of `kind` [s].
    pub fn interval(&self, kind: ReportKind) -> Option<f64> {
        self.slots.lock().get(&kind).map(|slot| slot.interval)
    }

    pub fn is_running(&self, kind: ReportKind) -> bool {
        self.slots.lock().contains_key(&kind)
    }

    /// Stop the reporter of `kind`. Returns `false` if none was running.
    pub fn stop(&self, kind: ReportKind) -> bool {
        let Some(slot) = self.slots.lock().remove(&kind) else {
            return false;
        };
        drop(slot.stop);
        if slot.handle.join().is_err() {
            warn!("{} reporter panicked", kind.command_id());
        }
        info!("{} reporter stopped", kind.command_id());
        true
    }

    /// Stop every reporter.
    pub fn stop_all(&self) {
        for kind in [ReportKind::KeepAlive, ReportKind::Position, ReportKind::Temperature] {
            self.stop(kind);
        }
    }

    fn start(&self, kind: ReportKind, period: Duration, source: ReportSource) -> std::io::Result<()> {
        let (stop, stopped) = mpsc::channel::<()>();
        let safety = self.safety.clone();
        let outbox = self.outbox.clone();

        let handle = thread::Builder::new()
            .name(format!("report-{}", kind.command_id().to_lowercase()))
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if safety.is_set() {
                        continue;
                    }
                    let (exit_code, msg) = source();
                    let report = ResultMessage::new(exit_code, kind.command_id(), msg, kind.echo());
                    if outbox.send(report).is_err() {
                        debug!("{} reporter: outbox closed", kind.command_id());
                        break;
                    }
                }
            })?;

        let seconds = period.as_secs_f64();
        info!("{} reporter started, every {}s", kind.command_id(), seconds);
        self.slots.lock().insert(
            kind,
            Slot {
                interval: seconds,
                stop,
                handle,
            },
        );
        Ok(())
    }
}

impl Drop for Reporters {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl std::fmt::Debug for Reporters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running: Vec<ReportKind> = self.slots.lock().keys().copied().collect();
        f.debug_struct("Reporters").field("running", &running).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacker_common::gcode::AttributeValue;
    use std::sync::mpsc::Receiver;

    // ── Helpers ──

    fn reporters() -> (Reporters, EmergencyStop, Receiver<ResultMessage>) {
        let safety = EmergencyStop::new();
        let (tx, rx) = mpsc::channel();
        (Reporters::new(safety.clone(), tx), safety, rx)
    }

    fn seconds(s: f64) -> AttributeMap {
        AttributeMap::from([('S', AttributeValue::Float(s))])
    }

    fn alive() -> ReportSource {
        Arc::new(|| (EXIT_SUCCESS, Value::from("alive")))
    }

    #[test]
    fn test_start_report_and_stop() {
        let (reporters, _, rx) = reporters();
        let (code, _) = reporters.configure(ReportKind::KeepAlive, &seconds(0.01), alive());
        assert_eq!(code, EXIT_SUCCESS);

        let report = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(report.command_id, "M113");
        assert_eq!(report.text(), Some("alive"));

        assert_eq!(
            reporters.configure(ReportKind::KeepAlive, &AttributeMap::new(), alive()),
            (EXIT_SUCCESS, Value::from(0.01))
        );
        assert_eq!(
            reporters.configure(ReportKind::KeepAlive, &seconds(0.0), alive()).0,
            EXIT_SUCCESS
        );
        assert!(!reporters.is_running(ReportKind::KeepAlive));
    }

    #[test]
    fn test_stop_and_query_without_timer_fail() {
        let (reporters, _, _rx) = reporters();
        assert_eq!(
            reporters.configure(ReportKind::Position, &seconds(0.0), alive()).0,
            EXIT_FAILURE
        );
        assert_eq!(
            reporters
                .configure(ReportKind::Position, &AttributeMap::new(), alive())
                .0,
            EXIT_FAILURE
        );
    }

    #[test]
    fn test_negative_interval_rejected() {
        let (reporters, _, _rx) = reporters();
        assert_eq!(
            reporters.configure(ReportKind::Temperature, &seconds(-1.0), alive()).0,
            EXIT_FAILURE
        );
        assert!(!reporters.is_running(ReportKind::Temperature));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let (reporters, _, _rx) = reporters();
        reporters.configure(ReportKind::KeepAlive, &seconds(1.0), alive());

        let (code, msg) = reporters.configure(ReportKind::KeepAlive, &seconds(1e20), alive());
        assert_eq!(code, EXIT_FAILURE);
        assert!(msg.as_str().unwrap().starts_with("Invalid keep alive interval"));
        // The running timer is left alone.
        assert_eq!(reporters.interval(ReportKind::KeepAlive), Some(1.0));
        reporters.stop_all();
    }

    #[test]
    fn test_report_echo_and_restart() {
        let (reporters, _, rx) = reporters();
        reporters.configure(ReportKind::Position, &seconds(5.0), alive());
        reporters.configure(ReportKind::Position, &seconds(0.01), alive());
        assert_eq!(reporters.interval(ReportKind::Position), Some(0.01));

        let report = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(report.command_id, "M154");
        assert_eq!(report.command, "M114");
        reporters.stop_all();
    }

    #[test]
    fn test_silent_while_emergency_flag_set() {
        let (reporters, safety, rx) = reporters();
        safety.trigger();
        reporters.configure(ReportKind::KeepAlive, &seconds(0.01), alive());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        safety.clear();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
