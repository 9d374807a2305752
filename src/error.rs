//! # Error Handling
//!
//! This module defines the `MeterError` enum, the crate-level error returned by
//! the transport, the read-cycle orchestrator and the sink constructors. The
//! protocol layers keep their own error enums and convert into `MeterError`
//! via `From`.

use crate::config::ConfigError;
use crate::dlms::apdu::ApduError;
use crate::dlms::crypto::CryptoError;
use crate::meter::frame::FrameError;
use thiserror::Error;

/// Represents the different error types that can occur in the meter reader.
#[derive(Debug, Error)]
pub enum MeterError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// The serial device could not be opened five times in a row.
    #[error("Failed to open serial port {port} {attempts} times in a row")]
    OpenAttemptsExhausted { port: String, attempts: u32 },

    /// The buffer read from the link is not a wrapper frame.
    #[error("Invalid wrapper frame: {0}")]
    Frame(#[from] FrameError),

    /// Decryption of the frame payload failed.
    #[error("Decryption failed: {0}")]
    Crypto(#[from] CryptoError),

    /// The decrypted payload is not a decodable data-notification.
    #[error("APDU decoding failed: {0}")]
    Apdu(#[from] ApduError),

    /// The configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The logger could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// A sink could not be set up.
    #[error("Sink {sink} error: {reason}")]
    Sink { sink: &'static str, reason: String },

    /// A catch‑all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl MeterError {
    /// Whether this error must terminate the process.
    ///
    /// Startup errors are fatal. Inside the read cycle only exhausting the
    /// open attempts on the serial device is.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeterError::OpenAttemptsExhausted { .. }
                | MeterError::Config(_)
                | MeterError::Logging(_)
                | MeterError::Sink { .. }
        )
    }
}

impl From<std::io::Error> for MeterError {
    fn from(e: std::io::Error) -> Self {
        MeterError::SerialPortError(e.to_string())
    }
}

impl From<tokio_serial::Error> for MeterError {
    fn from(e: tokio_serial::Error) -> Self {
        MeterError::SerialPortError(e.to_string())
    }
}
