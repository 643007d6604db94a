//! Gate actuator abstraction for the exitgate exit lane.
//!
//! The barrier is driven by one of three transports:
//!
//! - [`DigitalOutputGate`]: a relay on a sysfs GPIO line, active level configurable
//! - [`SerialGate`]: ASCII `OPEN\r\n` / `CLOSE\r\n` commands with an optional acknowledgement
//! - [`SimulatedGate`]: no hardware; records calls and succeeds
//!
//! All three implement [`GateActuator`] with native `async fn` and are
//! dispatched through [`AnyGateActuator`]. [`GateDriver`] wraps the actuator
//! and latches into a faulted state after repeated failures.
//!
//! ```
//! use exitgate_hardware::GateDriver;
//!
//! #[tokio::main]
//! async fn main() -> exitgate_hardware::Result<()> {
//!     let (mut driver, handle) = GateDriver::simulated(3);
//!
//!     driver.open().await?;
//!     driver.close().await?;
//!     assert_eq!(handle.open_count(), 1);
//!     Ok(())
//! }
//! ```

pub mod devices;
pub mod driver;
pub mod error;
pub mod gpio;
pub mod serial;
pub mod simulation;
pub mod traits;

pub use devices::AnyGateActuator;
pub use driver::{DriverStatus, GateDriver};
pub use error::{HardwareError, Result};
pub use exitgate_core::ControlMode;
pub use gpio::{DigitalOutputGate, gpio_available};
pub use serial::SerialGate;
pub use simulation::{GateCall, SimulatedGate, SimulatedGateHandle};
pub use traits::GateActuator;
