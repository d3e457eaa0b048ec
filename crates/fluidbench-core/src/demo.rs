//! Demo mode - simulated instrument stack
//!
//! A transport double that behaves like a real valve+pump pair on the other
//! end of the cable, for exercising the full stack without hardware. The
//! simulated valve tracks its position and answers frames exactly like the
//! device; the pump acknowledges every command with a terminated line.
//! Optional flakiness drops responses at a configurable rate to exercise the
//! retry paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::protocol::valve::{
    QUERY_LAST_POSITION_CMD, QUERY_POSITION_CMD, ROTATE_CMD, STATUS_CMD,
};
use crate::protocol::{
    Frame, FrameBuilder, Transport, TransportError, ValveStatus, FRAME_LEN, START_BYTE,
};

struct LabState {
    /// Current valve position, 0-based as on the wire
    position: u8,
    /// Position held before the simulated power loss
    last_position: u8,
    /// Queued response chunks, one per read
    pending: VecDeque<Vec<u8>>,
    rng: StdRng,
}

/// Simulated valve + pump pair behind a [`Transport`] implementation
pub struct SimulatedLab {
    valve_address: u8,
    drop_rate: f64,
    state: Mutex<LabState>,
}

impl SimulatedLab {
    /// A well-behaved instrument pair with the valve at `valve_address`
    pub fn new(valve_address: u8) -> Self {
        Self::with_drop_rate(valve_address, 0.0)
    }

    /// An instrument pair that silently drops responses at `drop_rate`
    /// (0.0 - 1.0), as a flaky cable would
    pub fn with_drop_rate(valve_address: u8, drop_rate: f64) -> Self {
        Self {
            valve_address,
            drop_rate,
            state: Mutex::new(LabState {
                position: 0,
                last_position: 0,
                pending: VecDeque::new(),
                rng: StdRng::from_entropy(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LabState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current valve position as the public API counts it (1-based)
    pub fn valve_position(&self) -> u8 {
        self.lock().position + 1
    }

    fn handle_valve_frame(&self, frame: &Frame, state: &mut LabState) {
        if frame.address() != self.valve_address {
            debug!(
                address = frame.address(),
                expected = self.valve_address,
                "simulated valve ignoring frame for another address"
            );
            return;
        }
        if state.rng.gen::<f64>() < self.drop_rate {
            debug!("simulated link dropped a valve response");
            return;
        }

        let response = match frame.command() {
            STATUS_CMD => FrameBuilder::new(STATUS_CMD, self.valve_address)
                .payload(ValveStatus::Success.as_byte())
                .build(),
            ROTATE_CMD => {
                state.last_position = state.position;
                state.position = frame.payload();
                FrameBuilder::new(ROTATE_CMD, self.valve_address)
                    .payload(state.position)
                    .build()
            }
            QUERY_POSITION_CMD => FrameBuilder::new(QUERY_POSITION_CMD, self.valve_address)
                .payload(state.position)
                .build(),
            QUERY_LAST_POSITION_CMD => {
                FrameBuilder::new(QUERY_LAST_POSITION_CMD, self.valve_address)
                    .payload(state.last_position)
                    .build()
            }
            other => FrameBuilder::new(other, self.valve_address)
                .payload(ValveStatus::InvalidCommand.as_byte())
                .build(),
        };
        state.pending.push_back(response.as_bytes().to_vec());
    }

    fn handle_pump_command(&self, command: &[u8], state: &mut LabState) {
        if state.rng.gen::<f64>() < self.drop_rate {
            debug!("simulated link dropped a pump acknowledgement");
            return;
        }
        debug!(
            command = %String::from_utf8_lossy(command),
            "simulated pump acknowledging"
        );
        state.pending.push_back(b"OK\n".to_vec());
    }
}

impl Transport for SimulatedLab {
    fn is_connected(&self) -> bool {
        true
    }

    fn port_name(&self) -> Option<String> {
        Some("SIM0".to_string())
    }

    fn write_bytes(&self, data: &[u8]) -> Result<bool, TransportError> {
        let mut state = self.lock();
        if data.len() == FRAME_LEN && data[0] == START_BYTE {
            if let Ok(frame) = Frame::from_bytes(data) {
                self.handle_valve_frame(&frame, &mut state);
            }
        } else if data.starts_with(b"/") {
            self.handle_pump_command(data, &mut state);
        }
        Ok(true)
    }

    fn read_available(&self) -> Result<Vec<u8>, TransportError> {
        Ok(self.lock().pending.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_query_answers_success() {
        let lab = SimulatedLab::new(1);
        let query = FrameBuilder::new(STATUS_CMD, 1).build();
        lab.write_bytes(query.as_bytes()).unwrap();
        let response = Frame::from_bytes(&lab.read_available().unwrap()).unwrap();
        assert_eq!(response.payload(), ValveStatus::Success.as_byte());
        assert!(response.verify_checksum());
    }

    #[test]
    fn test_rotate_echoes_and_tracks_position() {
        let lab = SimulatedLab::new(1);
        let rotate = FrameBuilder::new(ROTATE_CMD, 1).payload(6).build();
        lab.write_bytes(rotate.as_bytes()).unwrap();
        let response = Frame::from_bytes(&lab.read_available().unwrap()).unwrap();
        assert_eq!(response.payload(), 6);
        assert_eq!(lab.valve_position(), 7);
    }

    #[test]
    fn test_other_address_is_ignored() {
        let lab = SimulatedLab::new(1);
        let query = FrameBuilder::new(STATUS_CMD, 9).build();
        lab.write_bytes(query.as_bytes()).unwrap();
        assert!(lab.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_pump_command_gets_a_line_back() {
        let lab = SimulatedLab::new(1);
        lab.write_bytes(b"/1ZR").unwrap();
        assert_eq!(lab.read_available().unwrap(), b"OK\n");
    }
}
