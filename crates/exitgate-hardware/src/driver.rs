//! Gate driver: an actuator plus failure accounting.
//!
//! The driver counts consecutive transport failures. Once the count reaches
//! `max_consecutive_errors` it latches into a faulted state and refuses
//! `open` and `pulse` until a `close` succeeds or [`GateDriver::reset`] is
//! called. `close` is always attempted so the barrier can be brought down.

use std::path::Path;
use std::time::Duration;

use exitgate_core::{ControlMode, LaneConfig};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::devices::AnyGateActuator;
use crate::error::{HardwareError, Result};
use crate::gpio::{DigitalOutputGate, SYSFS_GPIO_ROOT, gpio_available};
use crate::serial::SerialGate;
use crate::simulation::{SimulatedGate, SimulatedGateHandle};
use crate::traits::GateActuator;

/// Snapshot of the driver for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverStatus {
    pub control_mode: ControlMode,
    pub device: String,
    pub gpio_available: bool,
    /// Last command that succeeded left the barrier up.
    pub raised: bool,
    pub consecutive_errors: u32,
    pub faulted: bool,
    pub last_error: Option<String>,
    pub total_opens: u64,
    pub total_closes: u64,
    pub total_failures: u64,
}

/// Gate actuator with consecutive-error tracking.
#[derive(Debug)]
pub struct GateDriver {
    actuator: AnyGateActuator,
    max_consecutive_errors: u32,
    pulse_duration: Duration,
    consecutive_errors: u32,
    faulted: bool,
    raised: bool,
    last_error: Option<String>,
    gpio_available: bool,
    total_opens: u64,
    total_closes: u64,
    total_failures: u64,
}

impl GateDriver {
    /// Wrap an actuator.
    pub fn new(actuator: impl Into<AnyGateActuator>, max_consecutive_errors: u32) -> Self {
        Self {
            actuator: actuator.into(),
            max_consecutive_errors: max_consecutive_errors.max(1),
            pulse_duration: Duration::from_millis(
                exitgate_core::constants::DEFAULT_PULSE_DURATION_MS,
            ),
            consecutive_errors: 0,
            faulted: false,
            raised: false,
            last_error: None,
            gpio_available: false,
            total_opens: 0,
            total_closes: 0,
            total_failures: 0,
        }
    }

    /// Driver over a [`SimulatedGate`], with the handle observing it.
    pub fn simulated(max_consecutive_errors: u32) -> (Self, SimulatedGateHandle) {
        let (gate, handle) = SimulatedGate::new();
        (Self::new(gate, max_consecutive_errors), handle)
    }

    /// Build the driver selected by `config.gate.control_mode`.
    ///
    /// If the selected transport fails to initialize the driver falls back
    /// to simulation and logs the failure at error level.
    pub fn from_config(config: &LaneConfig) -> Self {
        Self::from_config_with_root(config, SYSFS_GPIO_ROOT)
    }

    /// Same as [`from_config`](Self::from_config) with a custom sysfs root.
    pub fn from_config_with_root(config: &LaneConfig, gpio_root: impl AsRef<Path>) -> Self {
        let gpio_root = gpio_root.as_ref();
        let max_errors = config.gate.max_consecutive_errors;

        let actuator: Result<AnyGateActuator> = match config.gate.control_mode {
            ControlMode::Gpio => DigitalOutputGate::with_root(&config.gpio, gpio_root).map(Into::into),
            ControlMode::Serial => SerialGate::open_port(&config.gate).map(Into::into),
            ControlMode::Simulation => Ok(SimulatedGate::new().0.into()),
        };

        let mut driver = match actuator {
            Ok(actuator) => Self::new(actuator, max_errors),
            Err(e) => {
                error!(
                    requested = %config.gate.control_mode,
                    error = %e,
                    "gate hardware unavailable, falling back to SIMULATION mode"
                );
                Self::new(SimulatedGate::new().0, max_errors)
            }
        };

        driver.pulse_duration = config.pulse_duration();
        driver.gpio_available = gpio_available(gpio_root);
        info!(
            mode = %driver.control_mode(),
            device = driver.actuator.name(),
            "gate driver ready"
        );
        driver
    }

    /// Set the default pulse width.
    pub fn with_pulse_duration(mut self, duration: Duration) -> Self {
        self.pulse_duration = duration;
        self
    }

    /// Transport in use.
    pub fn control_mode(&self) -> ControlMode {
        self.actuator.control_mode()
    }

    /// Returns `true` while the driver refuses `open`.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Raise the barrier.
    ///
    /// # Errors
    /// Returns `HardwareError::Faulted` without touching the transport while
    /// latched, otherwise the transport error.
    pub async fn open(&mut self) -> Result<()> {
        self.ensure_not_faulted()?;
        let result = self.actuator.open().await;
        self.total_opens += 1;
        self.record(result, true)
    }

    /// Lower the barrier; a success clears the fault latch.
    ///
    /// # Errors
    /// Returns the transport error.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.actuator.close().await;
        self.total_closes += 1;
        let was_faulted = self.faulted;
        self.record(result, false)?;
        if was_faulted {
            info!("gate driver fault cleared by successful close");
        }
        Ok(())
    }

    /// Raise the barrier for `duration` (or the configured pulse width).
    ///
    /// # Errors
    /// As [`open`](Self::open).
    pub async fn pulse(&mut self, duration: Option<Duration>) -> Result<()> {
        self.ensure_not_faulted()?;
        let duration = duration.unwrap_or(self.pulse_duration);
        let result = self.actuator.pulse(duration).await;
        self.total_opens += 1;
        self.record(result, false)
    }

    /// Clear the fault latch and the consecutive-error counter.
    pub fn reset(&mut self) {
        if self.faulted || self.consecutive_errors > 0 {
            info!(
                consecutive_errors = self.consecutive_errors,
                "gate driver reset"
            );
        }
        self.faulted = false;
        self.consecutive_errors = 0;
        self.last_error = None;
    }

    /// Open, hold for `hold`, close.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub async fn self_test(&mut self, hold: Duration) -> Result<()> {
        info!(hold_ms = hold.as_millis() as u64, "gate self test");
        self.open().await?;
        tokio::time::sleep(hold).await;
        self.close().await
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> DriverStatus {
        DriverStatus {
            control_mode: self.control_mode(),
            device: self.actuator.name().to_string(),
            gpio_available: self.gpio_available,
            raised: self.raised,
            consecutive_errors: self.consecutive_errors,
            faulted: self.faulted,
            last_error: self.last_error.clone(),
            total_opens: self.total_opens,
            total_closes: self.total_closes,
            total_failures: self.total_failures,
        }
    }

    fn ensure_not_faulted(&self) -> Result<()> {
        if self.faulted {
            return Err(HardwareError::faulted(self.consecutive_errors));
        }
        Ok(())
    }

    fn record(&mut self, result: Result<()>, raised: bool) -> Result<()> {
        match result {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.faulted = false;
                self.raised = raised;
                Ok(())
            }
            Err(e) => {
                self.consecutive_errors += 1;
                self.total_failures += 1;
                self.last_error = Some(e.to_string());
                if self.consecutive_errors >= self.max_consecutive_errors {
                    if !self.faulted {
                        error!(
                            consecutive_errors = self.consecutive_errors,
                            error = %e,
                            "gate driver faulted"
                        );
                    }
                    self.faulted = true;
                } else {
                    warn!(
                        consecutive_errors = self.consecutive_errors,
                        error = %e,
                        "gate command failed"
                    );
                }
                Err(e)
            }
        }
    }
}
