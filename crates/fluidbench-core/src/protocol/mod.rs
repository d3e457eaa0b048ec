//! Serial Protocol Communication
//!
//! Implements the device protocols spoken over the shared serial link: the
//! binary framed protocol of the rotary selector valve and the textual
//! command protocol of the syringe pump, both riding on one transport
//! abstraction.

pub mod error;
pub mod frame;
pub mod mock;
pub mod pump;
pub mod serial;
pub mod transport;
pub mod valve;

pub use error::{FrameError, PumpError, TransportError, ValveError};
pub use frame::{build_frame, checksum, Frame, FrameBuilder, FRAME_LEN, START_BYTE};
pub use mock::MockTransport;
pub use pump::PumpController;
pub use serial::{
    discover_ports, DataBits, FlowControl, Parity, SerialConfig, StopBits,
};
pub use transport::{
    PortScanner, SerialTransport, SystemPortScanner, Transport, TransportEvent,
};
pub use valve::{ValveController, ValveStatus, ValveTiming};

/// Default baud rate for the instrument link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read retries used by [`Transport::send_command`]
pub const DEFAULT_READ_RETRIES: u32 = 3;

/// Per-attempt read timeout (ms) used by [`Transport::send_command`]
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
