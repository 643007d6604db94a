//! Digital output actuator over the sysfs GPIO interface.
//!
//! The line is exported and configured as an output once at init; each
//! `open`/`close` is a single write to `gpio{pin}/value`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use exitgate_core::{ControlMode, GpioConfig};
use tracing::{debug, info};

use crate::error::{HardwareError, Result};
use crate::traits::GateActuator;

/// Default sysfs GPIO root.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Returns `true` if a sysfs GPIO interface exists under `root`.
pub fn gpio_available(root: impl AsRef<Path>) -> bool {
    root.as_ref().join("export").exists()
}

/// Gate relay on a single digital output line.
#[derive(Debug)]
pub struct DigitalOutputGate {
    pin: u32,
    active_high: bool,
    value_path: PathBuf,
    name: String,
}

impl DigitalOutputGate {
    /// Export and configure `config.gate_pin` under the default sysfs root.
    ///
    /// # Errors
    /// Returns `HardwareError::InitializationFailed` if the line cannot be
    /// exported or configured as an output.
    pub fn new(config: &GpioConfig) -> Result<Self> {
        Self::with_root(config, SYSFS_GPIO_ROOT)
    }

    /// Same as [`new`](Self::new) with a custom sysfs root.
    pub fn with_root(config: &GpioConfig, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let pin = config.gate_pin;
        let line_dir = root.join(format!("gpio{pin}"));

        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| {
                HardwareError::initialization_failed(format!("cannot export GPIO {pin}: {e}"))
            })?;
        }
        if !line_dir.exists() {
            return Err(HardwareError::initialization_failed(format!(
                "GPIO {pin} not present after export"
            )));
        }

        fs::write(line_dir.join("direction"), "out").map_err(|e| {
            HardwareError::initialization_failed(format!("cannot set GPIO {pin} direction: {e}"))
        })?;

        let gate = Self {
            pin,
            active_high: config.active_high,
            value_path: line_dir.join("value"),
            name: format!("GPIO{pin}"),
        };

        // start with the barrier down
        gate.write_level(false)?;
        info!(pin, active_high = config.active_high, "GPIO gate initialized");
        Ok(gate)
    }

    /// Pin driven by this gate.
    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn write_level(&self, active: bool) -> Result<()> {
        let high = active == self.active_high;
        fs::write(&self.value_path, if high { "1" } else { "0" }).map_err(|e| {
            HardwareError::communication(format!("GPIO {} write failed: {e}", self.pin))
        })?;
        debug!(pin = self.pin, active, "GPIO level set");
        Ok(())
    }
}

impl GateActuator for DigitalOutputGate {
    async fn open(&mut self) -> Result<()> {
        self.write_level(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.write_level(false)
    }

    async fn pulse(&mut self, duration: Duration) -> Result<()> {
        self.write_level(true)?;
        tokio::time::sleep(duration).await;
        self.write_level(false)
    }

    fn control_mode(&self) -> ControlMode {
        ControlMode::Gpio
    }

    fn name(&self) -> &str {
        &self.name
    }
}
