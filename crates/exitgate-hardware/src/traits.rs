//! Gate actuator trait.
//!
//! All methods use native `async fn` (Edition 2024 RPITIT). The trait is not
//! object-safe; concrete dispatch goes through
//! [`AnyGateActuator`](crate::devices::AnyGateActuator).

#![allow(async_fn_in_trait)]

use std::time::Duration;

use exitgate_core::ControlMode;

use crate::error::Result;

/// A transport that raises and lowers the barrier.
///
/// # Contract
///
/// - `open` returns `Ok` only after the transport confirmed the write.
/// - `close` is idempotent and always drives the line inactive / sends CLOSE.
/// - `pulse` holds the active level for `duration`, then reverts.
pub trait GateActuator: Send + Sync {
    /// Drive the barrier up.
    async fn open(&mut self) -> Result<()>;

    /// Drive the barrier down.
    async fn close(&mut self) -> Result<()>;

    /// Raise the barrier for `duration`, then lower it.
    async fn pulse(&mut self, duration: Duration) -> Result<()>;

    /// Transport kind of this actuator.
    fn control_mode(&self) -> ControlMode;

    /// Human readable name for logs and diagnostics.
    fn name(&self) -> &str;
}
