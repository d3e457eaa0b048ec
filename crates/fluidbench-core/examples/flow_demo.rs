//! FluidBench demo-mode walkthrough
//!
//! Runs a small liquid-handling program against the simulated instrument
//! stack, no hardware required. Useful for eyeballing the protocol log and
//! the per-step highlight callbacks the visual editor would receive.
//!
//! Usage:
//!   cargo run --example flow_demo
//!   cargo run --example flow_demo -- --flaky    # drop ~30% of responses

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fluidbench_core::demo::SimulatedLab;
use fluidbench_core::program::{DeviceCall, ProgramRunner, Step, VecSource};
use fluidbench_core::protocol::{PumpController, ValveController, ValveTiming};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let flaky = std::env::args().any(|arg| arg == "--flaky");
    let drop_rate = if flaky { 0.3 } else { 0.0 };
    let lab = Arc::new(SimulatedLab::with_drop_rate(1, drop_rate));

    let mut pump = PumpController::new(lab.clone());
    let mut valve = ValveController::with_timing(
        lab.clone(),
        ValveTiming {
            retries: 3,
            retry_delay: Duration::from_millis(100),
            read_timeout: Duration::from_millis(200),
        },
    );

    // Rinse cycle: pull from the reagent port, deliver to the waste port
    let program = vec![
        Step::with_id(DeviceCall::ValveInitialize { address: 1 }, "init-valve"),
        Step::with_id(DeviceCall::PumpInitialize, "init-pump"),
        Step::with_id(DeviceCall::SetSpeed { hz: 800 }, "set-speed"),
        Step::with_id(DeviceCall::RotateValve { position: 2 }, "select-reagent"),
        Step::with_id(DeviceCall::SwitchToInput, "pump-input"),
        Step::with_id(DeviceCall::Aspirate { ml: 5.0 }, "draw"),
        Step::with_id(DeviceCall::WaitMs { ms: 200 }, "settle"),
        Step::with_id(DeviceCall::RotateValve { position: 12 }, "select-waste"),
        Step::with_id(DeviceCall::SwitchToOutput, "pump-output"),
        Step::with_id(DeviceCall::Dispense { ml: 5.0 }, "deliver"),
        Step::with_id(DeviceCall::StopPump, "finish"),
    ];

    let completed = ProgramRunner::new(&mut pump, &mut valve)
        .on_step(|id| println!("==> step: {id}"))
        .run(&mut VecSource::new(program))?;

    println!("program finished: {completed} steps");
    println!("valve parked at position {}", lab.valve_position());
    Ok(())
}
