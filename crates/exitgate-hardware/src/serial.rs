//! Serial actuator: ASCII commands to a gate controller.
//!
//! Writes are blocking calls on the `serialport` handle and run on the
//! blocking pool. With acknowledgements enabled, the controller must answer
//! each command with one line before the ack deadline.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use exitgate_core::constants::{SERIAL_CLOSE_COMMAND, SERIAL_OPEN_COMMAND};
use exitgate_core::{ControlMode, GateConfig};
use serialport::SerialPort;
use tracing::{debug, info};

use crate::error::{HardwareError, Result};
use crate::traits::GateActuator;

const MAX_ACK_LENGTH: usize = 64;

/// Outcome of an acknowledgement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Rejected(String),
}

/// Interpret an acknowledgement line sent by the controller.
///
/// Lines starting with `ERR` or `NAK` reject the command; anything else
/// confirms it.
pub fn parse_ack(line: &str) -> Ack {
    let line = line.trim();
    let upper = line.to_ascii_uppercase();
    if upper.starts_with("ERR") || upper.starts_with("NAK") {
        Ack::Rejected(line.to_string())
    } else {
        Ack::Ok
    }
}

/// Gate controller on a serial port.
pub struct SerialGate {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    path: String,
    ack_timeout: Option<Duration>,
}

impl std::fmt::Debug for SerialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialGate")
            .field("path", &self.path)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl SerialGate {
    /// Open `config.serial_port` at `config.baud_rate`.
    ///
    /// # Errors
    /// Returns the mapped `serialport` error if the port cannot be opened.
    pub fn open_port(config: &GateConfig) -> Result<Self> {
        let ack_timeout = Duration::from_millis(config.ack_timeout_ms);
        let port = serialport::new(&config.serial_port, config.baud_rate)
            .timeout(ack_timeout)
            .open()?;

        info!(
            port = %config.serial_port,
            baud = config.baud_rate,
            ack = config.serial_ack,
            "serial gate initialized"
        );

        Ok(Self {
            port: Arc::new(Mutex::new(port)),
            path: config.serial_port.clone(),
            ack_timeout: config.serial_ack.then_some(ack_timeout),
        })
    }

    async fn send(&self, command: &'static [u8]) -> Result<()> {
        let port = Arc::clone(&self.port);
        let ack_timeout = self.ack_timeout;
        let path = self.path.clone();

        let ack = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut port = port
                .lock()
                .map_err(|_| HardwareError::communication(format!("{path}: port lock poisoned")))?;
            port.write_all(command)?;
            port.flush()?;

            match ack_timeout {
                Some(deadline) => read_line(&mut **port, deadline).map(Some),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| HardwareError::communication(format!("serial task failed: {e}")))??;

        if let Some(line) = ack {
            if let Ack::Rejected(reason) = parse_ack(&line) {
                return Err(HardwareError::communication(format!(
                    "controller rejected command: {reason}"
                )));
            }
            debug!(ack = %line.trim(), "serial acknowledgement");
        }
        Ok(())
    }
}

fn read_line(port: &mut dyn SerialPort, deadline: Duration) -> Result<String> {
    let started = Instant::now();
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while started.elapsed() < deadline && line.len() < MAX_ACK_LENGTH {
        match port.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) if byte[0] == b'\n' => {
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }

    Err(HardwareError::timeout(deadline.as_millis() as u64))
}

impl GateActuator for SerialGate {
    async fn open(&mut self) -> Result<()> {
        self.send(SERIAL_OPEN_COMMAND).await
    }

    async fn close(&mut self) -> Result<()> {
        self.send(SERIAL_CLOSE_COMMAND).await
    }

    async fn pulse(&mut self, duration: Duration) -> Result<()> {
        self.send(SERIAL_OPEN_COMMAND).await?;
        tokio::time::sleep(duration).await;
        self.send(SERIAL_CLOSE_COMMAND).await
    }

    fn control_mode(&self) -> ControlMode {
        ControlMode::Serial
    }

    fn name(&self) -> &str {
        &self.path
    }
}
