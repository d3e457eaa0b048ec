//! Valve frame encoding/decoding
//!
//! Implements the fixed-length binary frame format of the rotary valve:
//!
//! - byte 0: start byte (0x03)
//! - byte 1: command
//! - byte 2: device address
//! - bytes 3-5: reserved (0x00 except for the position queries, which carry
//!   0x01 in byte 3)
//! - byte 6: payload (position or status code)
//! - byte 7: XOR checksum of bytes 0-6
//!
//! Outgoing frames are always checksummed. Incoming frames are only
//! length-validated; the device-side checksum is not re-verified on receipt.
//! That asymmetry matches the deployed firmware and is pinned by a test
//! rather than silently tightened. Use [`Frame::verify_checksum`] for the
//! stricter check.

use super::error::FrameError;

/// Fixed start byte of every valve frame
pub const START_BYTE: u8 = 0x03;

/// Total frame length in bytes, checksum included
pub const FRAME_LEN: usize = 8;

/// XOR-fold a byte sequence into a single checksum byte
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// A complete 8-byte valve frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Decode a frame from raw bytes, validating only the length
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() != FRAME_LEN {
            return Err(FrameError::LengthMismatch {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(data);
        Ok(Self { bytes })
    }

    /// Command byte
    pub fn command(&self) -> u8 {
        self.bytes[1]
    }

    /// Device address byte
    pub fn address(&self) -> u8 {
        self.bytes[2]
    }

    /// Payload byte (position or status code, depending on the command)
    pub fn payload(&self) -> u8 {
        self.bytes[6]
    }

    /// Trailing checksum byte as transmitted
    pub fn checksum(&self) -> u8 {
        self.bytes[7]
    }

    /// Recompute the checksum over bytes 0-6 and compare with byte 7
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.bytes[..FRAME_LEN - 1]) == self.bytes[7]
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Builder for outgoing valve frames
pub struct FrameBuilder {
    command: u8,
    address: u8,
    reserved: [u8; 3],
    payload: u8,
}

impl FrameBuilder {
    /// Start a frame for the given command and device address
    pub fn new(command: u8, address: u8) -> Self {
        Self {
            command,
            address,
            reserved: [0; 3],
            payload: 0,
        }
    }

    /// Set the payload byte
    pub fn payload(mut self, payload: u8) -> Self {
        self.payload = payload;
        self
    }

    /// Set the three reserved bytes (the position queries carry 0x01 in the
    /// first one)
    pub fn reserved(mut self, reserved: [u8; 3]) -> Self {
        self.reserved = reserved;
        self
    }

    /// Assemble the frame and append the checksum
    pub fn build(self) -> Frame {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = START_BYTE;
        bytes[1] = self.command;
        bytes[2] = self.address;
        bytes[3..6].copy_from_slice(&self.reserved);
        bytes[6] = self.payload;
        bytes[7] = checksum(&bytes[..FRAME_LEN - 1]);
        Frame { bytes }
    }
}

/// Assemble a standard frame: `[0x03, command, address, 0, 0, 0, payload]`
/// plus the trailing checksum
pub fn build_frame(command: u8, address: u8, payload: u8) -> Frame {
    FrameBuilder::new(command, address).payload(payload).build()
}

/// Render bytes as a spaced hex string for the protocol log
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
