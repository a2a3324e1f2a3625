//! ESC and Hall sensor behaviour through the hardware facade

use trolley_core::hal::{MockEsc, MockPulseSource};
use trolley_core::{EscState, HardwareConfig, HardwareControl, HardwareError};

fn hardware() -> HardwareControl<MockEsc> {
    let mut hw = HardwareControl::new(MockEsc::new(), &HardwareConfig::default());
    hw.init(0).unwrap();
    hw
}

fn armed() -> HardwareControl<MockEsc> {
    let mut hw = hardware();
    hw.arm_esc(0).unwrap();
    hw.update(1000);
    hw.update(4000);
    assert!(hw.is_armed());
    hw
}

// ============================================================================
// Arming
// ============================================================================

#[test]
fn arming_sequence_writes_neutral_arm_neutral() {
    let mut hw = hardware();
    hw.arm_esc(0).unwrap();
    assert_eq!(hw.esc_state(), EscState::ArmingNeutral);

    hw.update(999);
    assert_eq!(hw.esc_state(), EscState::ArmingNeutral);
    hw.update(1000);
    assert_eq!(hw.esc_state(), EscState::ArmingSignal);
    assert_eq!(hw.esc().output().last_duty(), Some(819));

    hw.update(3999);
    assert!(!hw.is_armed());
    hw.update(4000);
    assert!(hw.is_armed());
    assert_eq!(hw.esc().output().last_duty(), Some(1229));
}

#[test]
fn speed_needs_armed_esc() {
    let mut hw = hardware();
    assert!(matches!(
        hw.set_motor_speed(0.5, true),
        Err(HardwareError::NotArmed)
    ));
    assert!(hw.target_speed_ms() < 0.001);
}

#[test]
fn speed_above_limit_is_rejected() {
    let mut hw = armed();
    assert!(matches!(
        hw.set_motor_speed(2.5, true),
        Err(HardwareError::SpeedOutOfRange { .. })
    ));
    assert!(hw.target_speed_ms() < 0.001);
}

// ============================================================================
// Duty Ramp
// ============================================================================

#[test]
fn full_forward_ramps_in_duty_steps() {
    let mut hw = armed();
    hw.set_motor_speed(2.0, true).unwrap();
    assert_eq!(hw.status().target_duty, 1638);

    let mut now = 4000;
    let mut steps = 0;
    while hw.status().current_duty != 1638 {
        now += 20;
        hw.update(now);
        steps += 1;
        assert!(steps < 10);
    }
    // 1229 -> 1638 at 100 per update
    assert_eq!(steps, 5);
}

#[test]
fn emergency_stop_skips_ramp() {
    let mut hw = armed();
    hw.set_motor_speed(2.0, false).unwrap();
    for t in 1..=5 {
        hw.update(4000 + t * 20);
    }
    assert_eq!(hw.status().current_duty, 819);

    hw.emergency_stop(5000);
    assert_eq!(hw.status().current_duty, 1229);
    assert!(hw.is_armed());
}

// ============================================================================
// Hall Pulses
// ============================================================================

#[test]
fn pulses_give_speed_and_position() {
    let mut hw = armed();
    hw.set_motor_speed(1.0, true).unwrap();
    let mut src = MockPulseSource::new();
    // 0.1916 m every 191.6 ms is 1 m/s
    let stamps: Vec<u64> = (0..10).map(|i| 5000 + i * 192).collect();
    src.push_many(&stamps);
    assert_eq!(hw.process_pulses(&mut src, None), 10);

    assert_eq!(hw.rotation_count(), 10);
    assert!((hw.position_m() - 1.916).abs() < 0.001);
    assert!((hw.current_speed_ms() - 0.998).abs() < 0.01);
}

#[test]
fn reverse_pulses_count_down() {
    let mut hw = armed();
    hw.set_motor_speed(0.5, false).unwrap();
    let mut src = MockPulseSource::new();
    src.push_many(&[5000, 5400, 5800]);
    hw.process_pulses(&mut src, None);
    assert!((hw.position_m() + 3.0 * 0.1916).abs() < 0.001);
    assert_eq!(hw.rotation_count(), 3);
}

#[test]
fn silence_while_commanded_marks_hall_unhealthy() {
    let mut hw = armed();
    let mut src = MockPulseSource::new();
    src.push(4000);
    hw.process_pulses(&mut src, None);
    hw.set_motor_speed(0.5, true).unwrap();

    hw.update(4020);
    hw.update(6000);
    assert!(hw.is_hall_healthy());
    hw.update(6100);
    assert!(!hw.is_hall_healthy());
    assert!(hw.current_speed_ms() < 0.001);

    // Dropping the command clears the fault
    hw.stop_motor().unwrap();
    hw.update(6120);
    assert!(hw.is_hall_healthy());
}

#[test]
fn dropped_pulses_are_tracked() {
    let mut hw = hardware();
    let mut src = MockPulseSource::new();
    src.set_dropped(3);
    hw.process_pulses(&mut src, None);
    assert_eq!(hw.status().dropped_pulses, 3);
}
