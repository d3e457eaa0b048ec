//! Scenario tests for the syringe pump command protocol

use std::sync::Arc;

use fluidbench_core::protocol::{MockTransport, PumpController, PumpError};
use pretty_assertions::assert_eq;

fn last_write(mock: &MockTransport) -> String {
    String::from_utf8(mock.writes().last().expect("a write").clone()).expect("ascii command")
}

#[test]
fn commands_are_wrapped_with_address_and_terminator() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::new(mock.clone());

    pump.initialize().unwrap();
    assert_eq!(last_write(&mock), "/1ZR");

    pump.switch_to_input().unwrap();
    assert_eq!(last_write(&mock), "/1IR");

    pump.switch_to_output().unwrap();
    assert_eq!(last_write(&mock), "/1OR");

    pump.stop().unwrap();
    assert_eq!(last_write(&mock), "/1TR");
}

#[test]
fn speed_is_zero_padded_to_four_digits() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::new(mock.clone());

    pump.set_speed(100).unwrap();
    assert_eq!(last_write(&mock), "/1V0100R");

    pump.set_speed(7).unwrap();
    assert_eq!(last_write(&mock), "/1V0007R");

    pump.set_speed(2400).unwrap();
    assert_eq!(last_write(&mock), "/1V2400R");
}

#[test]
fn volumes_are_converted_to_steps_with_the_default_calibration() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::new(mock.clone());

    // 10 ml at 6000 steps / 25 ml = 2400 steps
    pump.aspirate(10.0).unwrap();
    assert_eq!(last_write(&mock), "/1A2400R");

    // 2.5 ml = 600 steps
    pump.dispense(2.5).unwrap();
    assert_eq!(last_write(&mock), "/1P600R");
}

#[test]
fn recalibration_changes_the_step_count() {
    let mock = Arc::new(MockTransport::new());
    let mut pump = PumpController::new(mock.clone());

    pump.set_volume_range(50.0).unwrap();
    pump.set_total_steps(12000).unwrap();
    pump.aspirate(10.0).unwrap();
    assert_eq!(last_write(&mock), "/1A2400R");

    pump.set_total_steps(3000).unwrap();
    pump.aspirate(10.0).unwrap();
    assert_eq!(last_write(&mock), "/1A600R");
}

#[test]
fn a_custom_address_is_used_in_the_framing() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::with_address(mock.clone(), "2");
    pump.initialize().unwrap();
    assert_eq!(last_write(&mock), "/2ZR");
}

#[test]
fn sending_while_disconnected_fails_without_a_write() {
    let mock = Arc::new(MockTransport::disconnected());
    let pump = PumpController::new(mock.clone());

    let err = pump.initialize().unwrap_err();
    assert!(matches!(err, PumpError::NotConnected));
    let err = pump.aspirate(1.0).unwrap_err();
    assert!(matches!(err, PumpError::NotConnected));
    assert_eq!(mock.write_count(), 0);
}

#[test]
fn a_response_line_marks_the_command_acknowledged() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::new(mock.clone());

    // No response queued: the write goes out but nothing comes back
    assert!(!pump.initialize().unwrap());

    mock.push_response(b"OK\n".to_vec());
    assert!(pump.stop().unwrap());
}

#[test]
fn conversions_invert_within_one_step() {
    let mock = Arc::new(MockTransport::new());
    let pump = PumpController::new(mock);

    let step_ml = 25.0 / 6000.0;
    for volume in [0.5, 1.0, 7.3, 10.0, 24.9] {
        let steps = pump.volume_to_steps(volume).unwrap();
        let back = pump.steps_to_volume(steps).unwrap();
        assert!(
            (back - volume).abs() <= step_ml,
            "volume {volume} round-tripped to {back}"
        );
    }
}
