//! Safety supervisor: intake loop and batch workers.
//!
//! The intake loop owns the channel endpoint and the engine state machine.
//! Every poll it
//!
//! 1. reacts to an Emergency Stop flag set outside the loop (escalated fault),
//! 2. reaps finished workers, re-raising a worker panic as a fatal error,
//! 3. starts queued batches while fewer than `max_workers` run,
//! 4. flushes queued results to the front end as one message,
//! 5. reads and parses the next message.
//!
//! Priority commands run in the loop itself, never in a worker, so `M112`
//! takes effect while other batches are still moving hardware.

use crate::dispatcher::{Dispatcher, priority_line};
use crate::error::EngineError;
use crate::state::{EngineEvent, EngineState, EngineStateMachine, TransitionResult};
use stacker_common::channel::{ChannelError, Endpoint};
use stacker_common::config::EngineConfig;
use stacker_common::consts::EMERGENCY_STOP;
use stacker_common::gcode::{self, ParsedCommand};
use stacker_common::message::ResultMessage;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Parsed lines of one received message.
type Lines = Arc<Vec<(String, ParsedCommand)>>;

struct Batch {
    id: u64,
    lines: Lines,
}

struct Worker {
    batch: u64,
    lines: Lines,
    handle: JoinHandle<()>,
}

/// Intake loop, worker pool and engine state.
pub struct Supervisor {
    endpoint: Endpoint,
    dispatcher: Dispatcher,
    results: Receiver<ResultMessage>,
    outbox: Sender<ResultMessage>,
    config: EngineConfig,
    state: EngineStateMachine,
    running: Arc<AtomicBool>,
    backlog: VecDeque<Batch>,
    workers: Vec<Worker>,
    next_batch: u64,
}

impl Supervisor {
    /// Create a supervisor.
    ///
    /// `results` must be the receiving half of the dispatcher's outbox.
    pub fn new(
        endpoint: Endpoint,
        dispatcher: Dispatcher,
        results: Receiver<ResultMessage>,
        config: EngineConfig,
    ) -> Self {
        let outbox = dispatcher.outbox().clone();
        Self {
            endpoint,
            dispatcher,
            results,
            outbox,
            config,
            state: EngineStateMachine::new(),
            running: Arc::new(AtomicBool::new(false)),
            backlog: VecDeque::new(),
            workers: Vec::new(),
            next_batch: 0,
        }
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run the intake loop.
    ///
    /// Blocks until the peer closes the channel or the running flag is
    /// cleared, then waits for in-flight batches and flushes their results.
    ///
    /// # Errors
    /// Returns `EngineError::WorkerPanicked` if a worker panicked and
    /// `EngineError::Channel` on transport failure.
    pub fn run(&mut self) -> Result<(), EngineError> {
        info!(
            "Starting intake loop (poll={}ms, max_workers={})",
            self.config.poll_interval_ms, self.config.max_workers
        );
        self.running.store(true, Ordering::SeqCst);

        let result = self.intake_loop();
        let drained = self.drain();
        info!("Intake loop stopped after {} batch(es)", self.next_batch);
        result.and(drained)
    }

    /// Stop reporters, halt and disconnect hardware, close the channel.
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        info!("Shutdown requested");
        self.running.store(false, Ordering::SeqCst);
        self.dispatcher.reporters().stop_all();

        for unit in self.dispatcher.registry().iter() {
            if let Err(e) = unit.stop() {
                warn!("Unit {} failed to stop: {}", unit.id(), e);
            }
        }
        let drained = self.drain();

        if let Err(e) = self.dispatcher.registry().disconnect_all() {
            warn!("Hardware disconnect incomplete: {}", e);
        }
        match self.endpoint.send_sentinel() {
            Ok(()) | Err(ChannelError::Closed) => {}
            Err(e) => warn!("Failed to send sentinel: {}", e),
        }
        self.endpoint.disconnect();
        drained
    }

    fn intake_loop(&mut self) -> Result<(), EngineError> {
        let poll = self.config.poll_interval();
        while self.running.load(Ordering::SeqCst) {
            self.watch_emergency();
            self.reap_workers()?;
            self.start_backlog();
            self.flush()?;

            match self.endpoint.receive::<String>() {
                Ok(Some(lines)) => {
                    self.intake(lines);
                    self.flush()?;
                    continue;
                }
                Ok(None) if !self.endpoint.is_connected() => {
                    info!("Channel closed by peer");
                    break;
                }
                Ok(None) => {}
                Err(ChannelError::Codec(reason)) => {
                    warn!("Malformed message: {}", reason);
                    self.reply(ResultMessage::failure(
                        "",
                        format!("Malformed message: {reason}"),
                        "",
                    ));
                }
                Err(ChannelError::Closed) => break,
                Err(e) => return Err(e.into()),
            }
            thread::sleep(poll);
        }
        Ok(())
    }

    /// React to a flag set by an escalated fault rather than by `M112`.
    fn watch_emergency(&mut self) {
        if self.dispatcher.safety().is_set() && !self.state.is_emergency_stopped() {
            error!("Emergency stop initiated");
            self.dispatcher.halt_all();
            self.transition(EngineEvent::EmergencyStop);
            self.reply(ResultMessage::failure(
                EMERGENCY_STOP,
                "Emergency stop initiated",
                EMERGENCY_STOP,
            ));
        }
    }

    fn intake(&mut self, lines: Vec<String>) {
        debug!("Received {} line(s)", lines.len());
        let mut accepted = Vec::with_capacity(lines.len());
        for line in lines {
            match gcode::parse(&line) {
                Ok(parsed) => accepted.push((line, parsed)),
                Err(e) => {
                    debug!("Rejected {:?}: {}", line, e);
                    self.reply(ResultMessage::failure("", e.to_string(), line));
                }
            }
        }

        if let Some(pos) = priority_line(&accepted) {
            let (line, parsed) = accepted.swap_remove(pos);
            if !accepted.is_empty() {
                warn!(
                    "Priority command {:?} discards {} other line(s)",
                    line,
                    accepted.len()
                );
            }
            self.execute_priority(&line, &parsed);
            return;
        }
        if accepted.is_empty() {
            return;
        }

        if self.dispatcher.safety().is_set() {
            self.refuse(&accepted, "while the emergency stop is set");
            return;
        }
        if let TransitionResult::Rejected(reason) = self.state.handle_event(EngineEvent::BatchAccepted)
        {
            warn!("Batch refused: {}", reason);
            self.refuse(&accepted, "in the current engine state");
            return;
        }

        let id = self.next_batch;
        self.next_batch += 1;
        debug!("Batch {} queued with {} line(s)", id, accepted.len());
        self.backlog.push_back(Batch {
            id,
            lines: Arc::new(accepted),
        });
        self.start_backlog();
    }

    fn execute_priority(&mut self, line: &str, parsed: &ParsedCommand) {
        let Some(msg) = self.dispatcher.execute_priority(parsed, line) else {
            return;
        };
        if msg.command_id == EMERGENCY_STOP {
            self.transition(EngineEvent::EmergencyStop);
        } else if msg.is_success() {
            self.transition(EngineEvent::Reset);
        }
        self.reply(msg);
    }

    /// Answer every command of `lines` with a failure.
    fn refuse(&self, lines: &[(String, ParsedCommand)], why: &str) {
        for (line, parsed) in lines {
            for id in parsed.ids() {
                self.reply(ResultMessage::failure(
                    id,
                    format!("Cannot execute command {id} {why}"),
                    line.as_str(),
                ));
            }
        }
    }

    // ─── Workers ────────────────────────────────────────────────────

    fn start_backlog(&mut self) {
        while self.workers.len() < self.config.max_workers {
            let Some(batch) = self.backlog.pop_front() else {
                break;
            };
            let dispatcher = self.dispatcher.clone();
            let outbox = self.outbox.clone();
            let lines = Arc::clone(&batch.lines);

            let spawned = thread::Builder::new()
                .name(format!("batch-{}", batch.id))
                .spawn(move || {
                    dispatcher.dispatch_batch(&lines, &mut |msg| {
                        let _ = outbox.send(msg);
                    });
                });

            match spawned {
                Ok(handle) => {
                    debug!("Batch {} started", batch.id);
                    self.workers.push(Worker {
                        batch: batch.id,
                        lines: batch.lines,
                        handle,
                    });
                }
                Err(e) => {
                    error!("Failed to start worker for batch {}: {}", batch.id, e);
                    self.refuse(&batch.lines, "because no worker could be started");
                    self.transition(EngineEvent::BatchResolved);
                }
            }
        }
    }

    fn reap_workers(&mut self) -> Result<(), EngineError> {
        let mut i = 0;
        while i < self.workers.len() {
            if self.workers[i].handle.is_finished() {
                let worker = self.workers.swap_remove(i);
                self.resolve(worker)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Join a worker; a panic becomes a result message and a fatal error.
    fn resolve(&mut self, worker: Worker) -> Result<(), EngineError> {
        let outcome = worker.handle.join();
        self.transition(EngineEvent::BatchResolved);
        let Err(payload) = outcome else {
            debug!("Batch {} resolved", worker.batch);
            return Ok(());
        };

        let cause = panic_message(payload.as_ref());
        error!("Worker for batch {} panicked: {}", worker.batch, cause);
        self.dispatcher.safety().trigger();
        self.dispatcher.halt_all();
        self.transition(EngineEvent::EmergencyStop);

        let command = worker
            .lines
            .iter()
            .map(|(line, _)| line.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        self.reply(ResultMessage::failure(
            "",
            format!("Worker for batch {} panicked: {cause}", worker.batch),
            command,
        ));
        self.flush()?;
        Err(EngineError::WorkerPanicked {
            batch: worker.batch,
            cause,
        })
    }

    /// Wait for every queued and running batch, then flush.
    fn drain(&mut self) -> Result<(), EngineError> {
        let mut first = None;
        while !self.backlog.is_empty() || !self.workers.is_empty() {
            self.start_backlog();
            for worker in std::mem::take(&mut self.workers) {
                if let Err(e) = self.resolve(worker) {
                    first.get_or_insert(e);
                }
            }
        }
        let flushed = self.flush();
        first.map_or(flushed, Err)
    }

    // ─── Results ────────────────────────────────────────────────────

    fn reply(&self, msg: ResultMessage) {
        // The supervisor holds a receiver, so the queue cannot be closed.
        let _ = self.outbox.send(msg);
    }

    /// Send every queued result as one message.
    fn flush(&mut self) -> Result<(), EngineError> {
        let batch: Vec<ResultMessage> = self.results.try_iter().collect();
        if batch.is_empty() {
            return Ok(());
        }
        match self.endpoint.send(&batch) {
            Ok(()) => Ok(()),
            Err(ChannelError::Closed) => {
                warn!("Dropping {} result(s): channel closed", batch.len());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(&mut self, event: EngineEvent) {
        match self.state.handle_event(event) {
            TransitionResult::Ok(state) => debug!("{:?} → {:?}", event, state),
            TransitionResult::Rejected(reason) => warn!("{:?} rejected: {}", event, reason),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state.state())
            .field("workers", &self.workers.len())
            .field("backlog", &self.backlog.len())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
