//! Snapshots returned by the lane's reporting commands.

use exitgate_core::ControlMode;
use exitgate_hardware::DriverStatus;
use exitgate_storage::{CacheStats, ExitSummary};
use serde::Serialize;

use crate::state_machine::{GateState, GateTransition};

/// Transitions included in a [`GateStatus`].
pub const STATUS_HISTORY_LEN: usize = 10;

/// Answer to `gate.status()`.
#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub state: GateState,
    /// Milliseconds spent in `state`.
    pub in_state_ms: u64,
    /// Milliseconds until the armed auto-close fires.
    pub auto_close_in_ms: Option<u64>,
    pub driver: DriverStatus,
    /// Most recent transitions, oldest first.
    pub history: Vec<GateTransition>,
}

/// Answer to `diagnostics()`.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub gate_id: String,
    pub control_mode: ControlMode,
    pub gpio_available: bool,
    pub state: GateState,
    pub consecutive_errors: u32,
    pub ts_connected: bool,
    pub mc: Option<CacheStats>,
    pub pending_attachments: usize,
    pub dropped_attachments: u64,
    pub today: Option<ExitSummary>,
}
