//! Rotary valve protocol
//!
//! Controller for the 12-position rotary selector valve. Every exchange is a
//! fixed 8-byte frame (see [`super::frame`]); the device answers a rotate
//! command by echoing the target position and answers a status query with a
//! one-byte status code in the payload slot.
//!
//! Positions are 1-based in this API and 0-based on the wire. A rotate only
//! counts as successful when BOTH the position echo matches the target AND a
//! follow-up status query returns success; the echo alone is not trusted.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use super::frame::{hex_dump, Frame, FrameBuilder, FRAME_LEN};
use super::transport::Transport;
use super::ValveError;

/// Rotate to a target position
pub const ROTATE_CMD: u8 = 0x66;
/// Query the current position
pub const QUERY_POSITION_CMD: u8 = 0x33;
/// Query the position held before the last power loss
pub const QUERY_LAST_POSITION_CMD: u8 = 0x44;
/// Query the device status
pub const STATUS_CMD: u8 = 0x55;

/// Lowest addressable position
pub const MIN_POSITION: u8 = 1;
/// Highest addressable position
pub const MAX_POSITION: u8 = 12;

/// Status codes reported by the valve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveStatus {
    /// 0x00: command executed successfully
    Success,
    /// 0x01: the device rejected the command byte
    InvalidCommand,
    /// 0x02: the device is busy executing a previous command
    Busy,
    /// 0x03: the device rejected a parameter
    InvalidParameter,
    /// 0x04: the device reported an internal timeout
    Timeout,
    /// 0x05 or no valid response at all
    Unknown,
}

impl ValveStatus {
    /// Decode a status byte; anything unrecognized maps to `Unknown`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ValveStatus::Success,
            0x01 => ValveStatus::InvalidCommand,
            0x02 => ValveStatus::Busy,
            0x03 => ValveStatus::InvalidParameter,
            0x04 => ValveStatus::Timeout,
            _ => ValveStatus::Unknown,
        }
    }

    /// Wire encoding of this status
    pub fn as_byte(self) -> u8 {
        match self {
            ValveStatus::Success => 0x00,
            ValveStatus::InvalidCommand => 0x01,
            ValveStatus::Busy => 0x02,
            ValveStatus::InvalidParameter => 0x03,
            ValveStatus::Timeout => 0x04,
            ValveStatus::Unknown => 0x05,
        }
    }
}

impl fmt::Display for ValveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ValveStatus::Success => "command executed successfully",
            ValveStatus::InvalidCommand => "invalid command",
            ValveStatus::Busy => "device busy",
            ValveStatus::InvalidParameter => "invalid parameter",
            ValveStatus::Timeout => "device timeout",
            ValveStatus::Unknown => "unknown error",
        };
        f.write_str(message)
    }
}

/// Retry parameters for the valve command loop
#[derive(Debug, Clone, Copy)]
pub struct ValveTiming {
    /// Attempts per command before giving up
    pub retries: u32,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Per-attempt read timeout handed to the transport
    pub read_timeout: Duration,
}

impl Default for ValveTiming {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay: Duration::from_secs(1),
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// Controller for one rotary valve on the shared serial link
///
/// Starts uninitialized; [`ValveController::initialize`] binds the device
/// address and the controller becomes ready only once the device confirms a
/// successful status. The address is never unbound afterwards.
pub struct ValveController {
    transport: Arc<dyn Transport>,
    address: Option<u8>,
    last_known_position: Option<u8>,
    last_status: ValveStatus,
    timing: ValveTiming,
}

impl ValveController {
    /// Create an uninitialized controller with default timing
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_timing(transport, ValveTiming::default())
    }

    /// Create an uninitialized controller with custom retry timing
    pub fn with_timing(transport: Arc<dyn Transport>, timing: ValveTiming) -> Self {
        Self {
            transport,
            address: None,
            last_known_position: None,
            last_status: ValveStatus::Unknown,
            timing,
        }
    }

    /// Bound device address, once initialized
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    /// Whether `initialize` has succeeded for this controller
    pub fn is_ready(&self) -> bool {
        self.address.is_some()
    }

    /// Position confirmed by the most recent successful operation (1-based)
    pub fn last_known_position(&self) -> Option<u8> {
        self.last_known_position
    }

    /// Status code from the most recent status query
    pub fn last_status(&self) -> ValveStatus {
        self.last_status
    }

    /// Bind the device address and confirm the device answers with success
    ///
    /// The controller only becomes ready when the status query comes back
    /// [`ValveStatus::Success`]; any other outcome leaves it uninitialized.
    pub fn initialize(&mut self, address: u8) -> Result<(), ValveError> {
        let status = self.query_status(address);
        self.last_status = status;
        if status == ValveStatus::Success {
            self.address = Some(address);
            info!(address, "valve initialized");
            Ok(())
        } else {
            error!(address, %status, "valve initialization failed");
            Err(ValveError::DeviceStatus(status))
        }
    }

    /// Query the device status
    ///
    /// Degrades to [`ValveStatus::Unknown`] when uninitialized or when no
    /// valid response arrives; it never fails hard.
    pub fn check_status(&mut self) -> ValveStatus {
        let Some(address) = self.address else {
            error!("valve not initialized, cannot query status");
            return ValveStatus::Unknown;
        };
        let status = self.query_status(address);
        self.last_status = status;
        status
    }

    fn query_status(&self, address: u8) -> ValveStatus {
        let frame = FrameBuilder::new(STATUS_CMD, address).build();
        match self.send_frame(&frame) {
            Some(response) => ValveStatus::from_byte(response.payload()),
            None => ValveStatus::Unknown,
        }
    }

    /// Rotate to a target position (1-12)
    ///
    /// Out-of-range positions are rejected before any I/O. Success requires
    /// the device to echo the target position AND a follow-up status query
    /// to return success.
    pub fn rotate_to_position(&mut self, position: u8) -> Result<(), ValveError> {
        if !(MIN_POSITION..=MAX_POSITION).contains(&position) {
            error!(
                position,
                "invalid valve position, must be {MIN_POSITION}-{MAX_POSITION}"
            );
            return Err(ValveError::InvalidPosition(position));
        }
        let Some(address) = self.address else {
            error!("valve not initialized, cannot rotate");
            return Err(ValveError::NotInitialized);
        };

        // The wire protocol numbers positions from zero
        let target = position - 1;
        let frame = FrameBuilder::new(ROTATE_CMD, address).payload(target).build();
        let response = self.send_frame(&frame).ok_or(ValveError::Timeout)?;

        if response.payload() != target {
            error!(
                requested = position,
                reported = response.payload() + 1,
                "rotate failed: device reports a different position"
            );
            return Err(ValveError::PositionMismatch {
                requested: position,
                reported: response.payload() + 1,
            });
        }

        let status = self.check_status();
        if status != ValveStatus::Success {
            error!(position, %status, "rotate failed");
            return Err(ValveError::DeviceStatus(status));
        }

        self.last_known_position = Some(position);
        info!(position, "rotated to position");
        Ok(())
    }

    /// Query the current position (1-12)
    pub fn get_current_position(&mut self) -> Result<u8, ValveError> {
        let position = self.query_position(QUERY_POSITION_CMD)?;
        self.last_known_position = Some(position);
        info!(position, "current position");
        Ok(position)
    }

    /// Query the position the valve held before it last lost power (1-12)
    pub fn get_last_position(&mut self) -> Result<u8, ValveError> {
        let position = self.query_position(QUERY_LAST_POSITION_CMD)?;
        info!(position, "position before power loss");
        Ok(position)
    }

    fn query_position(&mut self, command: u8) -> Result<u8, ValveError> {
        let Some(address) = self.address else {
            error!("valve not initialized, cannot query position");
            return Err(ValveError::NotInitialized);
        };

        let frame = FrameBuilder::new(command, address)
            .reserved([0x01, 0x00, 0x00])
            .build();
        let response = self.send_frame(&frame).ok_or(ValveError::Timeout)?;

        // The payload is only trusted once the device confirms success
        let status = self.check_status();
        if status != ValveStatus::Success {
            error!(%status, "position query failed");
            return Err(ValveError::DeviceStatus(status));
        }

        Ok(response.payload() + 1)
    }

    /// Send a frame and collect the 8-byte response, retrying the whole
    /// write+read exchange up to `timing.retries` times
    ///
    /// Recoverable write failures, empty reads and wrong-length responses
    /// all consume an attempt. Exhausting the retries yields `None`, logged
    /// as an error; callers turn that into a timeout or an unknown status,
    /// never a panic.
    fn send_frame(&self, frame: &Frame) -> Option<Frame> {
        let bytes = frame.as_bytes();
        if frame.command() == ROTATE_CMD {
            info!(
                frame = %hex_dump(bytes),
                position = frame.payload() + 1,
                "sending rotate command (wire uses 0-based positions)"
            );
        } else {
            info!(frame = %hex_dump(bytes), "sending valve command");
        }

        for attempt in 1..=self.timing.retries {
            match self.transport.write_bytes(bytes) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(attempt, retries = self.timing.retries, "write failed, retrying");
                    self.backoff(attempt);
                    continue;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        retries = self.timing.retries,
                        error = %e,
                        "transport error, retrying"
                    );
                    self.backoff(attempt);
                    continue;
                }
            }

            let response = match self.transport.read_with_retry(
                FRAME_LEN,
                self.timing.retries,
                self.timing.read_timeout,
            ) {
                Ok(response) => response,
                Err(e) => {
                    warn!(attempt, error = %e, "read failed, retrying");
                    self.backoff(attempt);
                    continue;
                }
            };

            if response.is_empty() {
                warn!(attempt, retries = self.timing.retries, "no response, retrying");
                self.backoff(attempt);
                continue;
            }

            info!(frame = %hex_dump(&response), "received valve response");

            match Frame::from_bytes(&response) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    warn!(attempt, error = %e, "bad response, retrying");
                    self.backoff(attempt);
                }
            }
        }

        error!(
            frame = %hex_dump(bytes),
            retries = self.timing.retries,
            "valve command failed after all retries"
        );
        None
    }

    fn backoff(&self, attempt: u32) {
        if attempt < self.timing.retries {
            thread::sleep(self.timing.retry_delay);
        }
    }
}
