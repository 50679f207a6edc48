//! Port-specific error types.
//!
//! Transport failures are kept separate from protocol-level errors so the
//! transaction engine can decide how each one surfaces to callers.

use thiserror::Error;

/// Errors that can occur while talking to the serial transport.
#[derive(Debug, Error)]
pub enum PortError {
    /// The serial port path does not exist on this system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred during port operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port configuration was rejected by the driver.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation did not complete in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The device went away (unplugged, or the stream reported end-of-data).
    #[error("Device disconnected")]
    Disconnected,

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Timeout error from a duration.
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Whether this error means the link itself is gone rather than one
    /// operation failing.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
