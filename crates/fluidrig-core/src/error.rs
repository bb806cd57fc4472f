//! Error types for the hardware layer.
//!
//! Hardware failures are absorbed at the device boundary: a failed
//! connect or write marks the device unavailable and the next rescan
//! retries. Nothing in this module is fatal to the process.

use thiserror::Error;

/// A failure while talking to a controller board.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A write to an open connection failed.
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// An operation required an open connection.
    #[error("device is not connected")]
    NotConnected,
}
