//! Lane events published to collaborators (audio cue, audit log, displays).

use serde::Serialize;

use crate::result::ExitResult;
use crate::state_machine::GateState;

/// Audio cue requested from the buzzer collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Error,
}

/// Event broadcast by a lane.
///
/// Slow subscribers lag and lose events; the lane never waits for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LaneEvent {
    Feedback { tone: Tone },
    GateChanged { from: GateState, to: GateState },
    ExitProcessed { identifier: String, result: ExitResult },
}

impl LaneEvent {
    pub fn tone(&self) -> Option<Tone> {
        match self {
            Self::Feedback { tone } => Some(*tone),
            _ => None,
        }
    }
}
