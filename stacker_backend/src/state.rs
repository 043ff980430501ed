//! Engine state machine.
//!
//! Idle → Executing while at least one batch is in flight, back to Idle
//! when the last batch resolves. Any state → EmergencyStopped on `M112` or
//! an escalated fault; only `M999` leaves EmergencyStopped.

use serde::Serialize;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// No batch in flight.
    Idle,
    /// One or more batch workers running.
    Executing,
    /// Emergency Stop flag set; motion refused until reset.
    EmergencyStopped,
}

/// Result of an EngineState transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded, carrying the new state.
    Ok(EngineState),
    /// Transition rejected with a reason.
    Rejected(&'static str),
}

/// Event that can trigger a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Non-empty batch handed to a worker.
    BatchAccepted,
    /// Worker finished its batch.
    BatchResolved,
    /// `M112` or escalated hardware fault.
    EmergencyStop,
    /// `M999`.
    Reset,
}

/// EngineState manager with the count of batches in flight.
#[derive(Debug, Clone)]
pub struct EngineStateMachine {
    state: EngineState,
    active_batches: usize,
}

impl EngineStateMachine {
    /// New machine in Idle state.
    pub const fn new() -> Self {
        Self {
            state: EngineState::Idle,
            active_batches: 0,
        }
    }

    #[inline]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Batches accepted and not yet resolved.
    #[inline]
    pub const fn active_batches(&self) -> usize {
        self.active_batches
    }

    #[inline]
    pub const fn is_emergency_stopped(&self) -> bool {
        matches!(self.state, EngineState::EmergencyStopped)
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: EngineEvent) -> TransitionResult {
        use EngineEvent::*;
        use EngineState::*;

        let next = match (self.state, event) {
            (EmergencyStopped, BatchAccepted) => {
                return TransitionResult::Rejected(
                    "EmergencyStopped: batches refused until reset",
                );
            }
            (Idle | Executing, BatchAccepted) => {
                self.active_batches += 1;
                Executing
            }

            (Idle, BatchResolved) => {
                return TransitionResult::Rejected("Idle: no batch in flight");
            }
            (Executing, BatchResolved) => {
                self.active_batches = self.active_batches.saturating_sub(1);
                if self.active_batches == 0 { Idle } else { Executing }
            }
            // Workers cut short by the stop still report back.
            (EmergencyStopped, BatchResolved) => {
                self.active_batches = self.active_batches.saturating_sub(1);
                EmergencyStopped
            }

            (_, EmergencyStop) => EmergencyStopped,

            (EmergencyStopped, Reset) => {
                if self.active_batches == 0 { Idle } else { Executing }
            }
            (state, Reset) => state,
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

impl Default for EngineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
