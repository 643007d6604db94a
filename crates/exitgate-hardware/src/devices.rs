//! Enum wrapper for gate actuator dispatch.
//!
//! Native `async fn` in traits is not object-safe, so `Box<dyn GateActuator>`
//! is not available. [`AnyGateActuator`] provides concrete dispatch over the
//! supported transports instead.

use std::time::Duration;

use exitgate_core::ControlMode;

use crate::Result;
use crate::gpio::DigitalOutputGate;
use crate::serial::SerialGate;
use crate::simulation::SimulatedGate;
use crate::traits::GateActuator;

/// Any supported gate actuator.
///
/// # Examples
///
/// ```
/// use exitgate_hardware::devices::AnyGateActuator;
/// use exitgate_hardware::simulation::SimulatedGate;
/// use exitgate_hardware::traits::GateActuator;
///
/// #[tokio::main]
/// async fn main() -> exitgate_hardware::Result<()> {
///     let (gate, handle) = SimulatedGate::new();
///     let mut actuator = AnyGateActuator::Simulation(gate);
///
///     actuator.open().await?;
///     assert_eq!(handle.open_count(), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyGateActuator {
    /// Relay on a digital output line.
    DigitalOutput(DigitalOutputGate),
    /// Controller on a serial port.
    Serial(SerialGate),
    /// No hardware.
    Simulation(SimulatedGate),
}

impl GateActuator for AnyGateActuator {
    async fn open(&mut self) -> Result<()> {
        match self {
            Self::DigitalOutput(device) => device.open().await,
            Self::Serial(device) => device.open().await,
            Self::Simulation(device) => device.open().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::DigitalOutput(device) => device.close().await,
            Self::Serial(device) => device.close().await,
            Self::Simulation(device) => device.close().await,
        }
    }

    async fn pulse(&mut self, duration: Duration) -> Result<()> {
        match self {
            Self::DigitalOutput(device) => device.pulse(duration).await,
            Self::Serial(device) => device.pulse(duration).await,
            Self::Simulation(device) => device.pulse(duration).await,
        }
    }

    fn control_mode(&self) -> ControlMode {
        match self {
            Self::DigitalOutput(device) => device.control_mode(),
            Self::Serial(device) => device.control_mode(),
            Self::Simulation(device) => device.control_mode(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::DigitalOutput(device) => device.name(),
            Self::Serial(device) => device.name(),
            Self::Simulation(device) => device.name(),
        }
    }
}

impl From<DigitalOutputGate> for AnyGateActuator {
    fn from(device: DigitalOutputGate) -> Self {
        Self::DigitalOutput(device)
    }
}

impl From<SerialGate> for AnyGateActuator {
    fn from(device: SerialGate) -> Self {
        Self::Serial(device)
    }
}

impl From<SimulatedGate> for AnyGateActuator {
    fn from(device: SimulatedGate) -> Self {
        Self::Simulation(device)
    }
}
