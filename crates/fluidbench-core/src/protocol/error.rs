//! Protocol errors

use thiserror::Error;

use super::valve::ValveStatus;

/// Errors raised by the serial transport layer
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("not connected to a serial port")]
    NotConnected,

    #[error("port '{0}' is not present on this system")]
    PortUnavailable(String),

    #[error("active port '{0}' disappeared")]
    PortLost(String),

    #[error("failed to open port '{port}': {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("serial driver error: {0}")]
    SerialError(String),
}

/// Errors raised when decoding a valve frame
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Errors raised by the rotary valve controller
#[derive(Error, Debug)]
pub enum ValveError {
    #[error("valve not initialized")]
    NotInitialized,

    #[error("invalid valve position {0} (valid range is 1-12)")]
    InvalidPosition(u8),

    #[error("position mismatch: requested {requested}, device reports {reported}")]
    PositionMismatch { requested: u8, reported: u8 },

    #[error("valve reported: {0}")]
    DeviceStatus(ValveStatus),

    #[error("no valid response after all retries")]
    Timeout,
}

/// Errors raised by the syringe pump controller
#[derive(Error, Debug)]
pub enum PumpError {
    #[error("not connected to a serial port")]
    NotConnected,

    #[error(
        "invalid pump calibration: volume range {volume_range} ml, \
         {total_steps} total steps (both must be positive)"
    )]
    InvalidCalibration { volume_range: f64, total_steps: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
