//! Port errors

use thiserror::Error;

/// Errors that can occur while opening or using an [`AsyncPort`](crate::AsyncPort)
///
/// Steady-state I/O failures on the background reader/writer are never
/// returned through this type; they are delivered to the registered
/// [`PortObserver`](crate::PortObserver) instead.
#[derive(Error, Debug)]
pub enum PortError {
    /// The device could not be opened
    #[error("Failed to open port: {0}")]
    Open(String),

    /// The device exists but access was refused
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Operation on a port that is shutting down or closed
    #[error("Port is closed")]
    PortClosed,

    /// Caller-supplied value out of range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration file could not be parsed or written
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or other I/O failure outside the background workers
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortError {
    /// Classify an I/O error raised while opening a device
    pub(crate) fn from_open_io(path: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            PortError::Permission(format!("{}: {}", path, err))
        } else {
            PortError::Open(format!("{}: {}", path, err))
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PortError>;
