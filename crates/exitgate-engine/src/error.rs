use exitgate_hardware::HardwareError;
use exitgate_storage::StoreError;
use thiserror::Error;

use crate::state_machine::GateState;

/// Errors returned by lane operations other than exits.
///
/// Exits never fail with an error; their failures are reported through
/// [`ExitResult`](crate::ExitResult) codes.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transition not allowed by the gate state machine
    #[error("Invalid gate transition from {from} to {to}")]
    InvalidTransition { from: GateState, to: GateState },

    /// Actuator failure or fault latch
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Store failure during lane start-up
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The lane worker is gone
    #[error("Lane stopped")]
    LaneStopped,
}

impl EngineError {
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }
}

/// Specialized result type for lane operations
pub type EngineResult<T> = Result<T, EngineError>;
