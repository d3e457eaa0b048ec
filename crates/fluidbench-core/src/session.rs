//! Device session
//!
//! Binds one serial transport to the protocol controllers that share it and
//! manages the connect/disconnect lifecycle. The transport is created once
//! per application session and outlives the controllers; the controllers
//! hold shared handles and never own the physical connection.

use std::sync::mpsc;
use std::sync::Arc;

use crate::program::ProgramRunner;
use crate::protocol::{
    PumpController, SerialConfig, SerialTransport, Transport, TransportError, TransportEvent,
    ValveController,
};
use crate::settings::SerialSettings;

/// One transport plus the controllers bound to it
pub struct DeviceSession {
    transport: Arc<SerialTransport>,
    pump: PumpController,
    valve: ValveController,
}

impl DeviceSession {
    /// Create a session with a fresh transport backed by the OS enumeration
    pub fn new() -> Self {
        Self::from_transport(SerialTransport::new())
    }

    /// Create a session around an existing transport
    pub fn from_transport(transport: Arc<SerialTransport>) -> Self {
        let pump = PumpController::new(transport.clone() as Arc<dyn Transport>);
        let valve = ValveController::new(transport.clone() as Arc<dyn Transport>);
        Self {
            transport,
            pump,
            valve,
        }
    }

    /// Open the serial link with the given configuration
    pub fn connect(&self, config: &SerialConfig) -> Result<(), TransportError> {
        self.transport.open(config)
    }

    /// Open the serial link using persisted settings, adopting the stored
    /// device address for the pump
    pub fn connect_with_settings(&mut self, settings: &SerialSettings) -> Result<(), TransportError> {
        self.pump.set_address(settings.device_address.clone());
        self.transport.open(&settings.to_config())
    }

    /// Close the serial link; a no-op when already disconnected
    pub fn disconnect(&self) {
        self.transport.close();
    }

    /// Whether the serial link is currently open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Subscribe to connectivity and data events (port loss surfaces here)
    pub fn events(&self) -> mpsc::Receiver<TransportEvent> {
        self.transport.subscribe()
    }

    /// Shared transport handle
    pub fn transport(&self) -> &Arc<SerialTransport> {
        &self.transport
    }

    /// The syringe pump controller
    pub fn pump(&mut self) -> &mut PumpController {
        &mut self.pump
    }

    /// The rotary valve controller
    pub fn valve(&mut self) -> &mut ValveController {
        &mut self.valve
    }

    /// A program runner dispatching onto this session's controllers
    pub fn runner(&mut self) -> ProgramRunner<'_> {
        ProgramRunner::new(&mut self.pump, &mut self.valve)
    }
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}
