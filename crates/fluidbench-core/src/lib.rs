//! # FluidBench Core Library
//!
//! Core functionality for the FluidBench liquid-handling automation software.
//!
//! This library provides:
//! - Serial transport with port discovery, line buffering and a port watchdog
//! - Binary protocol for a 12-position rotary selector valve (framed,
//!   checksummed, retried)
//! - Textual command protocol for a syringe pump (volume/step calibration)
//! - A device session binding both controllers to one shared serial link
//! - A dispatcher that executes user-authored device programs step by step
//!
//! The visual block editor that produces those programs, and the GUI shell
//! around them, live outside this crate; the core only consumes an ordered
//! sequence of [`program::DeviceCall`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fluidbench_core::prelude::*;
//!
//! let mut session = DeviceSession::new();
//! session.connect(&SerialConfig::new("/dev/ttyUSB0"))?;
//!
//! session.valve().initialize(1)?;
//! session.valve().rotate_to_position(4)?;
//! session.pump().aspirate(10.0)?;
//! ```

#![warn(missing_docs)]

pub mod demo;
pub mod program;
pub mod protocol;
pub mod session;
pub mod settings;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::program::{
        CommandSource, DeviceCall, ProgramRunner, RunError, Step, StopFlag, VecSource,
    };
    pub use crate::protocol::{
        FlowControl, Frame, FrameBuilder, Parity, PumpController, SerialConfig, SerialTransport,
        StopBits, Transport, TransportError, TransportEvent, ValveController, ValveStatus,
    };
    pub use crate::session::DeviceSession;
    pub use crate::settings::SerialSettings;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
