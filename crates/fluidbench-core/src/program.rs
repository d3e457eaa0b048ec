//! Device program dispatch
//!
//! The visual editor compiles a block program into an ordered sequence of
//! device calls. This module executes that sequence against the protocol
//! controllers: a closed set of [`DeviceCall`] variants dispatched one step
//! at a time, with a per-step callback carrying the step's correlation id so
//! the editor can highlight the running block. There is no dynamic code
//! evaluation anywhere in this path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{PumpController, ValveController};

/// One executable step of a user-authored program
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// Home the syringe pump
    PumpInitialize,
    /// Switch the pump valve to the input port
    SwitchToInput,
    /// Switch the pump valve to the output port
    SwitchToOutput,
    /// Set the plunger speed in Hz
    SetSpeed {
        /// Speed in Hz
        hz: u32,
    },
    /// Draw in a volume in ml
    Aspirate {
        /// Volume in ml
        ml: f64,
    },
    /// Push out a volume in ml
    Dispense {
        /// Volume in ml
        ml: f64,
    },
    /// Halt the pump
    StopPump,
    /// Bind and verify the rotary valve at the given address
    ValveInitialize {
        /// Device address
        address: u8,
    },
    /// Rotate the valve to a position (1-12)
    RotateValve {
        /// Target position, 1-based
        position: u8,
    },
    /// Pause between steps
    WaitMs {
        /// Pause duration in milliseconds
        ms: u64,
    },
}

impl std::fmt::Display for DeviceCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceCall::PumpInitialize => write!(f, "initialize pump"),
            DeviceCall::SwitchToInput => write!(f, "switch to input"),
            DeviceCall::SwitchToOutput => write!(f, "switch to output"),
            DeviceCall::SetSpeed { hz } => write!(f, "set speed {hz} Hz"),
            DeviceCall::Aspirate { ml } => write!(f, "aspirate {ml} ml"),
            DeviceCall::Dispense { ml } => write!(f, "dispense {ml} ml"),
            DeviceCall::StopPump => write!(f, "stop pump"),
            DeviceCall::ValveInitialize { address } => {
                write!(f, "initialize valve at address {address}")
            }
            DeviceCall::RotateValve { position } => write!(f, "rotate valve to {position}"),
            DeviceCall::WaitMs { ms } => write!(f, "wait {ms} ms"),
        }
    }
}

/// A device call plus the correlation id the editor uses to highlight the
/// block it came from
#[derive(Debug, Clone)]
pub struct Step {
    /// The call to execute
    pub call: DeviceCall,
    /// Correlation id reported to the highlight sink
    pub correlation_id: String,
}

impl Step {
    /// Wrap a call with a fresh correlation id
    pub fn new(call: DeviceCall) -> Self {
        Self {
            call,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    /// Wrap a call with the block id supplied by the editor
    pub fn with_id(call: DeviceCall, correlation_id: impl Into<String>) -> Self {
        Self {
            call,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Producer of the ordered command sequence
///
/// The visual editor and its code generation sit behind this seam; the core
/// only pulls the next step until the source runs dry.
pub trait CommandSource {
    /// The next step, or `None` when the program is exhausted
    fn next_command(&mut self) -> Option<Step>;
}

/// Command source over a pre-built list of steps
pub struct VecSource {
    steps: std::vec::IntoIter<Step>,
}

impl VecSource {
    /// Wrap an ordered list of steps
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into_iter(),
        }
    }
}

impl CommandSource for VecSource {
    fn next_command(&mut self) -> Option<Step> {
        self.steps.next()
    }
}

/// Errors raised while running a program
#[derive(Error, Debug)]
pub enum RunError {
    #[error("step {index} ({correlation_id}) failed: {reason}")]
    StepFailed {
        /// Zero-based index of the failed step
        index: usize,
        /// Correlation id of the failed step
        correlation_id: String,
        /// Failure reported by the controller
        reason: String,
    },

    #[error("program stopped by user after {completed} steps")]
    Stopped {
        /// Steps that completed before the stop
        completed: usize,
    },
}

/// Shared stop signal checked between steps
///
/// Triggering it aborts a running program at the next step boundary. Retry
/// loops inside a single device exchange do not observe it; a stop during a
/// multi-second valve retry takes effect once that exchange resolves.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A cleared flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the running program to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reset the flag for the next run
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Executes a program against the pump and valve controllers
pub struct ProgramRunner<'a> {
    pump: &'a mut PumpController,
    valve: &'a mut ValveController,
    highlight: Option<Box<dyn FnMut(&str) + 'a>>,
    stop: StopFlag,
}

impl<'a> ProgramRunner<'a> {
    /// Create a runner over the given controllers
    pub fn new(pump: &'a mut PumpController, valve: &'a mut ValveController) -> Self {
        Self {
            pump,
            valve,
            highlight: None,
            stop: StopFlag::new(),
        }
    }

    /// Register the highlight sink invoked with each step's correlation id
    /// just before the step executes
    pub fn on_step(mut self, callback: impl FnMut(&str) + 'a) -> Self {
        self.highlight = Some(Box::new(callback));
        self
    }

    /// Use a shared stop flag so another thread can abort the run
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Run the program to completion, returning the number of executed steps
    ///
    /// Execution halts at the first failed step; the caller decides whether
    /// to re-run or give up.
    pub fn run(&mut self, source: &mut dyn CommandSource) -> Result<usize, RunError> {
        let mut completed = 0;
        while let Some(step) = source.next_command() {
            if self.stop.is_set() {
                info!(completed, "program stopped by user");
                return Err(RunError::Stopped { completed });
            }
            if let Some(callback) = &mut self.highlight {
                callback(&step.correlation_id);
            }
            info!(
                step = completed + 1,
                id = %step.correlation_id,
                call = %step.call,
                "executing step"
            );
            self.execute(&step.call)
                .map_err(|reason| RunError::StepFailed {
                    index: completed,
                    correlation_id: step.correlation_id.clone(),
                    reason,
                })?;
            completed += 1;
        }
        info!(completed, "program finished");
        Ok(completed)
    }

    fn execute(&mut self, call: &DeviceCall) -> Result<(), String> {
        match call {
            DeviceCall::PumpInitialize => self.pump_step(self.pump.initialize()),
            DeviceCall::SwitchToInput => self.pump_step(self.pump.switch_to_input()),
            DeviceCall::SwitchToOutput => self.pump_step(self.pump.switch_to_output()),
            DeviceCall::SetSpeed { hz } => self.pump_step(self.pump.set_speed(*hz)),
            DeviceCall::Aspirate { ml } => self.pump_step(self.pump.aspirate(*ml)),
            DeviceCall::Dispense { ml } => self.pump_step(self.pump.dispense(*ml)),
            DeviceCall::StopPump => self.pump_step(self.pump.stop()),
            DeviceCall::ValveInitialize { address } => self
                .valve
                .initialize(*address)
                .map_err(|e| e.to_string()),
            DeviceCall::RotateValve { position } => self
                .valve
                .rotate_to_position(*position)
                .map_err(|e| e.to_string()),
            DeviceCall::WaitMs { ms } => {
                self.wait(Duration::from_millis(*ms));
                Ok(())
            }
        }
    }

    // The pump gives no structured response; a missing acknowledgement is
    // logged but does not fail the step
    fn pump_step(&self, result: Result<bool, crate::protocol::PumpError>) -> Result<(), String> {
        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!("pump did not acknowledge command");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    // Sleep in short slices so a stop request ends a long wait promptly
    fn wait(&self, total: Duration) {
        let slice = Duration::from_millis(50);
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.stop.is_set() {
                return;
            }
            let nap = remaining.min(slice);
            thread::sleep(nap);
            remaining -= nap;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_gets_fresh_correlation_id() {
        let a = Step::new(DeviceCall::StopPump);
        let b = Step::new(DeviceCall::StopPump);
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_step_with_editor_id() {
        let step = Step::with_id(DeviceCall::RotateValve { position: 4 }, "block-17");
        assert_eq!(step.correlation_id, "block-17");
    }

    #[test]
    fn test_call_display() {
        assert_eq!(
            DeviceCall::Aspirate { ml: 2.5 }.to_string(),
            "aspirate 2.5 ml"
        );
        assert_eq!(
            DeviceCall::RotateValve { position: 4 }.to_string(),
            "rotate valve to 4"
        );
    }

    #[test]
    fn test_vec_source_preserves_order() {
        let mut source = VecSource::new(vec![
            Step::with_id(DeviceCall::PumpInitialize, "a"),
            Step::with_id(DeviceCall::StopPump, "b"),
        ]);
        assert_eq!(source.next_command().unwrap().correlation_id, "a");
        assert_eq!(source.next_command().unwrap().correlation_id, "b");
        assert!(source.next_command().is_none());
    }

    #[test]
    fn test_stop_flag() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.trigger();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }
}
