//! Syringe pump protocol
//!
//! The pump speaks plain ASCII: every command is wrapped as
//! `/{address}{command}R` with no checksum and no structured response; the
//! call is reported successful as soon as the transport finishes the
//! write-and-wait. Volumes are converted to motor steps with a linear
//! calibration (volume range in ml over total step count).

use std::sync::Arc;
use tracing::{error, info};

use super::transport::Transport;
use super::PumpError;

/// Default pump address on the shared link
pub const DEFAULT_PUMP_ADDRESS: &str = "1";

/// Default syringe volume range in ml
pub const DEFAULT_VOLUME_RANGE_ML: f64 = 25.0;

/// Default number of motor steps across the full volume range
pub const DEFAULT_TOTAL_STEPS: u32 = 6000;

/// Controller for one syringe pump on the shared serial link
pub struct PumpController {
    transport: Arc<dyn Transport>,
    address: String,
    volume_range_ml: f64,
    total_steps: u32,
}

impl PumpController {
    /// Create a controller with the default address and calibration
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_address(transport, DEFAULT_PUMP_ADDRESS)
    }

    /// Create a controller for a specific pump address
    pub fn with_address(transport: Arc<dyn Transport>, address: impl Into<String>) -> Self {
        Self {
            transport,
            address: address.into(),
            volume_range_ml: DEFAULT_VOLUME_RANGE_ML,
            total_steps: DEFAULT_TOTAL_STEPS,
        }
    }

    /// Pump address used in the command framing
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Change the pump address
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = address.into();
    }

    /// Configured volume range in ml
    pub fn volume_range_ml(&self) -> f64 {
        self.volume_range_ml
    }

    /// Configured total step count
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Set the syringe volume range in ml; non-positive values are rejected
    pub fn set_volume_range(&mut self, volume_ml: f64) -> Result<(), PumpError> {
        if volume_ml <= 0.0 {
            error!(volume_ml, "volume range must be positive");
            return Err(PumpError::InvalidCalibration {
                volume_range: volume_ml,
                total_steps: self.total_steps,
            });
        }
        self.volume_range_ml = volume_ml;
        info!(volume_ml, "pump volume range set");
        Ok(())
    }

    /// Set the total step count; zero is rejected
    pub fn set_total_steps(&mut self, steps: u32) -> Result<(), PumpError> {
        if steps == 0 {
            error!("total steps must be positive");
            return Err(PumpError::InvalidCalibration {
                volume_range: self.volume_range_ml,
                total_steps: steps,
            });
        }
        self.total_steps = steps;
        info!(steps, "pump total steps set");
        Ok(())
    }

    /// Convert a volume in ml to motor steps, truncating to whole steps
    pub fn volume_to_steps(&self, volume_ml: f64) -> Result<u32, PumpError> {
        self.check_calibration()?;
        let steps_per_ml = self.total_steps as f64 / self.volume_range_ml;
        Ok((volume_ml * steps_per_ml) as u32)
    }

    /// Convert motor steps back to a volume in ml
    pub fn steps_to_volume(&self, steps: u32) -> Result<f64, PumpError> {
        self.check_calibration()?;
        Ok(steps as f64 * self.volume_range_ml / self.total_steps as f64)
    }

    fn check_calibration(&self) -> Result<(), PumpError> {
        if self.volume_range_ml <= 0.0 || self.total_steps == 0 {
            return Err(PumpError::InvalidCalibration {
                volume_range: self.volume_range_ml,
                total_steps: self.total_steps,
            });
        }
        Ok(())
    }

    /// Home the pump ("Z")
    pub fn initialize(&self) -> Result<bool, PumpError> {
        info!("initializing pump");
        self.send("Z")
    }

    /// Switch the pump valve to the input port ("I")
    pub fn switch_to_input(&self) -> Result<bool, PumpError> {
        info!("switching pump to input");
        self.send("I")
    }

    /// Switch the pump valve to the output port ("O")
    pub fn switch_to_output(&self) -> Result<bool, PumpError> {
        info!("switching pump to output");
        self.send("O")
    }

    /// Set the plunger speed in Hz ("V", zero-padded to four digits)
    pub fn set_speed(&self, hz: u32) -> Result<bool, PumpError> {
        info!(hz, "setting pump speed");
        self.send(&format!("V{hz:04}"))
    }

    /// Draw in the given volume ("A" with the step count)
    pub fn aspirate(&self, volume_ml: f64) -> Result<bool, PumpError> {
        let steps = self.volume_to_steps(volume_ml)?;
        info!(volume_ml, steps, "aspirating");
        self.send(&format!("A{steps}"))
    }

    /// Push out the given volume ("P" with the step count)
    pub fn dispense(&self, volume_ml: f64) -> Result<bool, PumpError> {
        let steps = self.volume_to_steps(volume_ml)?;
        info!(volume_ml, steps, "dispensing");
        self.send(&format!("P{steps}"))
    }

    /// Halt the current motion ("T")
    pub fn stop(&self) -> Result<bool, PumpError> {
        info!("stopping pump");
        self.send("T")
    }

    fn send(&self, command: &str) -> Result<bool, PumpError> {
        if !self.transport.is_connected() {
            error!(command, "cannot send pump command while disconnected");
            return Err(PumpError::NotConnected);
        }
        let full = format!("/{}{}R", self.address, command);
        info!(command = %full, "sending pump command");
        Ok(self.transport.send_command(&full)?)
    }
}
