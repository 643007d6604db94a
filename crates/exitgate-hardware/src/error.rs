//! Error types for gate actuator operations.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while driving the gate barrier.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Transport is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Acknowledgement did not arrive in time.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation is not supported by this actuator.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Write or read on the transport failed.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Transport could not be initialized.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// Actuator configuration error.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Driver latched into ERROR after repeated failures.
    #[error("Gate driver faulted after {consecutive_errors} consecutive errors")]
    Faulted { consecutive_errors: u32 },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a new faulted error.
    pub fn faulted(consecutive_errors: u32) -> Self {
        Self::Faulted { consecutive_errors }
    }

    /// Returns `true` if the driver refused the call because it is latched.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted { .. })
    }
}

impl From<serialport::Error> for HardwareError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::disconnected(err.description),
            serialport::ErrorKind::InvalidInput => Self::configuration(err.description),
            _ => Self::communication(err.description),
        }
    }
}
