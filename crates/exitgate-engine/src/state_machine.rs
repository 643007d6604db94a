//! Gate state machine.
//!
//! Tracks what the lane believes the barrier is doing and refuses transitions
//! that make no sense, so a bug in the lane worker shows up as an error
//! instead of a gate left in an unknown position.
//!
//! # States
//!
//! - `Closed`: barrier down, lane idle
//! - `Opening`: open command in flight
//! - `Open`: barrier up, auto-close armed
//! - `Closing`: close command in flight
//! - `Error`: actuator fault latched, opens refused
//! - `Degraded`: store unreachable, exits refused, manual control retained
//!
//! # Valid Transitions
//!
//! - Closed → Opening → Open → Closing → Closed
//! - Opening → Closed (open failed below the fault threshold)
//! - Closing → Open (close failed below the fault threshold)
//! - Open/Closing → Opening (re-trigger while the arm is up)
//! - Closed → Closing (idempotent manual close)
//! - Closed ⇄ Degraded, Degraded → Opening/Closing (manual override)
//! - Error → Closing/Closed (recovery)
//! - any state except Error → Error
//!
//! # Examples
//!
//! ```
//! use exitgate_engine::{GateState, GateStateMachine};
//!
//! let mut machine = GateStateMachine::new();
//! machine.transition_to(GateState::Opening).unwrap();
//! machine.transition_to(GateState::Open).unwrap();
//!
//! assert_eq!(machine.current_state(), GateState::Open);
//! assert!(machine.transition_to(GateState::Degraded).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};

/// Transitions kept for diagnostics.
const MAX_HISTORY_SIZE: usize = 100;

/// Position of the barrier as seen by the lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Closed,
    Opening,
    Open,
    Closing,
    /// Actuator fault latched after repeated failures.
    Error,
    /// Store unreachable for longer than the degraded threshold.
    Degraded,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            GateState::Closed => "CLOSED",
            GateState::Opening => "OPENING",
            GateState::Open => "OPEN",
            GateState::Closing => "CLOSING",
            GateState::Error => "ERROR",
            GateState::Degraded => "DEGRADED",
        };
        f.write_str(state_str)
    }
}

impl GateState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use exitgate_engine::GateState;
    ///
    /// assert!(GateState::Closed.can_transition_to(GateState::Opening));
    /// assert!(!GateState::Closed.can_transition_to(GateState::Open));
    /// assert!(!GateState::Error.can_transition_to(GateState::Opening));
    /// ```
    pub fn can_transition_to(self, target: GateState) -> bool {
        matches!(
            (self, target),
            // From Closed
            (GateState::Closed, GateState::Opening | GateState::Closing | GateState::Degraded)
            // From Opening
            | (GateState::Opening, GateState::Open | GateState::Closed)
            // From Open
            | (GateState::Open, GateState::Closing | GateState::Opening)
            // From Closing
            | (GateState::Closing, GateState::Closed | GateState::Open | GateState::Opening)
            // From Error
            | (GateState::Error, GateState::Closing | GateState::Closed)
            // From Degraded
            | (GateState::Degraded, GateState::Closed | GateState::Opening | GateState::Closing)
        ) || (target == GateState::Error && self != GateState::Error)
    }

    /// Returns `true` while the barrier may be up.
    pub fn is_raised(self) -> bool {
        matches!(self, GateState::Opening | GateState::Open | GateState::Closing)
    }
}

/// A single state transition.
#[derive(Debug, Clone, Serialize)]
pub struct GateTransition {
    pub from: GateState,
    pub to: GateState,

    /// When the transition occurred (not serialized).
    #[serde(skip)]
    pub timestamp: Instant,
}

impl GateTransition {
    pub fn new(from: GateState, to: GateState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Gate state machine with a bounded transition history.
///
/// Not thread-safe; owned by the lane worker.
#[derive(Debug)]
pub struct GateStateMachine {
    current_state: GateState,
    state_entered_at: Instant,
    history: VecDeque<GateTransition>,
}

impl GateStateMachine {
    /// Create a new state machine in the Closed state.
    pub fn new() -> Self {
        Self::starting_in(GateState::Closed)
    }

    /// Create a state machine in an arbitrary state, with empty history.
    pub fn starting_in(state: GateState) -> Self {
        Self {
            current_state: state,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current_state(&self) -> GateState {
        self.current_state
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<GateTransition> {
        &self.history
    }

    /// Get the last N state transitions, oldest first.
    pub fn last_transitions(&self, count: usize) -> Vec<GateTransition> {
        self.history
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTransition` if the transition is not
    /// valid for the current state; the machine is left unchanged.
    pub fn transition_to(&mut self, new_state: GateState) -> EngineResult<GateTransition> {
        if !self.current_state.can_transition_to(new_state) {
            return Err(EngineError::InvalidTransition {
                from: self.current_state,
                to: new_state,
            });
        }

        let transition = GateTransition::new(self.current_state, new_state);
        self.perform_state_change(new_state, transition.clone());
        Ok(transition)
    }

    /// Force the machine back to Closed, whatever the current state.
    ///
    /// Used by operator resets.
    pub fn reset(&mut self) -> GateTransition {
        let transition = GateTransition::new(self.current_state, GateState::Closed);
        self.perform_state_change(GateState::Closed, transition.clone());
        transition
    }

    fn perform_state_change(&mut self, new_state: GateState, transition: GateTransition) {
        self.current_state = new_state;
        self.state_entered_at = Instant::now();

        self.history.push_back(transition);
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
    }
}

impl Default for GateStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
