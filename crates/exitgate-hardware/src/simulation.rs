//! Simulated gate for development, tests and hardware fall-back.
//!
//! [`SimulatedGate`] records every call and succeeds unless told otherwise
//! through its [`SimulatedGateHandle`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use exitgate_core::ControlMode;
use tracing::info;

use crate::error::{HardwareError, Result};
use crate::traits::GateActuator;

/// One call received by the simulated gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCall {
    Open,
    Close,
    Pulse(Duration),
}

#[derive(Debug, Default)]
struct SimState {
    calls: Vec<GateCall>,
    fail_next: u32,
    raised: bool,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // the state is plain data; a poisoned guard is still consistent
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Gate actuator without hardware.
///
/// # Examples
///
/// ```
/// use exitgate_hardware::simulation::{GateCall, SimulatedGate};
/// use exitgate_hardware::traits::GateActuator;
///
/// #[tokio::main]
/// async fn main() -> exitgate_hardware::Result<()> {
///     let (mut gate, handle) = SimulatedGate::new();
///
///     gate.open().await?;
///     assert!(handle.is_raised());
///
///     handle.fail_next(1);
///     assert!(gate.close().await.is_err());
///     assert_eq!(handle.calls(), vec![GateCall::Open, GateCall::Close]);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SimulatedGate {
    state: Arc<Mutex<SimState>>,
    name: String,
}

impl SimulatedGate {
    /// Create a simulated gate and the handle that observes it.
    pub fn new() -> (Self, SimulatedGateHandle) {
        Self::with_name("Simulated Gate")
    }

    /// Create a simulated gate with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, SimulatedGateHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let gate = Self {
            state: Arc::clone(&state),
            name: name.into(),
        };
        (gate, SimulatedGateHandle { state })
    }

    fn record(&self, call: GateCall) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(call);

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(HardwareError::communication(format!(
                "simulated {call:?} failure"
            )));
        }

        match call {
            GateCall::Open => state.raised = true,
            GateCall::Close | GateCall::Pulse(_) => state.raised = false,
        }
        info!(gate = %self.name, ?call, "simulated gate");
        Ok(())
    }
}

impl GateActuator for SimulatedGate {
    async fn open(&mut self) -> Result<()> {
        self.record(GateCall::Open)
    }

    async fn close(&mut self) -> Result<()> {
        self.record(GateCall::Close)
    }

    async fn pulse(&mut self, duration: Duration) -> Result<()> {
        tokio::time::sleep(duration).await;
        self.record(GateCall::Pulse(duration))
    }

    fn control_mode(&self) -> ControlMode {
        ControlMode::Simulation
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Observer and fault injector of a [`SimulatedGate`].
#[derive(Debug, Clone)]
pub struct SimulatedGateHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGateHandle {
    /// Make the next `count` calls fail with a communication error.
    pub fn fail_next(&self, count: u32) {
        lock(&self.state).fail_next = count;
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<GateCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of `open` calls received.
    pub fn open_count(&self) -> usize {
        self.count(GateCall::Open)
    }

    /// Number of `close` calls received.
    pub fn close_count(&self) -> usize {
        self.count(GateCall::Close)
    }

    /// Returns `true` while the barrier is up.
    pub fn is_raised(&self) -> bool {
        lock(&self.state).raised
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        lock(&self.state).calls.clear();
    }

    fn count(&self, call: GateCall) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }
}
