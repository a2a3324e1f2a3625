//! Automatic cycling against the trolley model

mod common;

use common::{get, learned_store, Rig};
use trolley_core::{
    AutomaticConfig, AutomaticState, CoastingCalibration, Config, EscState, OperatingMode,
};

const WIRE_M: f32 = 30.0;

fn config(cycles: u32) -> Config {
    Config::default().with_automatic(
        AutomaticConfig::default()
            .with_max_cycles(cycles)
            .with_pauses_ms(1000, 1000),
    )
}

fn auto_state(rig: &Rig) -> AutomaticState {
    rig.sys.coordinator().automatic().state()
}

/// Rig with a learned 30 m wire (cruise 1.5 m/s, 2.8 m coast) and the
/// sensors validated.
fn learned_rig(cycles: u32) -> Rig {
    let mut rig = Rig::with_store(config(cycles), WIRE_M, learned_store(WIRE_M, 1.5, 2.8));
    rig.validate();
    assert_eq!(
        rig.sys.status().mode.automatic_availability.as_str(),
        "Available"
    );
    rig
}

// ============================================================================
// Cycling
// ============================================================================

#[test]
fn stored_results_unlock_automatic() {
    let rig = learned_rig(1);
    let mode = rig.sys.status().mode;
    assert!(mode.auto_coasting_calibrated);
    assert!((mode.wire_learning.unwrap().wire_length_m - WIRE_M).abs() < 0.001);
}

#[test]
fn completes_a_cycle_with_coasting() {
    let mut rig = learned_rig(1);
    let reply = rig.key('U');
    assert!(reply.success);
    assert_eq!(reply.message.as_str(), "Automatic mode activated - cycling started");

    let mut seen: Vec<AutomaticState> = Vec::new();
    let mut furthest_m: f32 = 0.0;
    rig.run_until(180_000, |s| {
        let state = s.coordinator().automatic().state();
        if seen.last() != Some(&state) {
            seen.push(state);
        }
        furthest_m = furthest_m.max(s.hardware().position_m());
        state == AutomaticState::Complete
    });

    for expected in [
        AutomaticState::ArmingEsc,
        AutomaticState::Accelerating,
        AutomaticState::Cruising,
        AutomaticState::Coasting,
        AutomaticState::WireEndApproach,
        AutomaticState::DirectionChange,
    ] {
        assert!(seen.contains(&expected), "never entered {}", expected.as_str());
    }
    assert!(furthest_m > 27.0 && furthest_m <= WIRE_M);

    let status = rig.sys.coordinator().automatic().status();
    assert_eq!(status.cycles_completed, 1);
    assert_eq!(status.forward_runs, 1);
    assert_eq!(status.reverse_runs, 1);
    assert!(status.max_speed_ms > 1.2 && status.max_speed_ms < 1.8);
    assert!(status.total_distance_m > 50.0);

    assert_eq!(rig.sys.status().mode.auto_cycle_count, 1);
    assert!(rig.sys.hardware().position_m().abs() < 0.001);

    rig.step();
    assert_eq!(rig.sys.coordinator().current_mode(), OperatingMode::None);
    assert!(!rig.sys.status().mode.auto_cycle_interrupted);
}

#[test]
fn runs_requested_number_of_cycles() {
    let mut rig = learned_rig(2);
    assert!(rig.key('U').success);

    let mut pauses = 0;
    let mut last = AutomaticState::Idle;
    rig.run_until(400_000, |s| {
        let state = s.coordinator().automatic().state();
        if state == AutomaticState::CycleComplete && last != state {
            pauses += 1;
        }
        last = state;
        state == AutomaticState::Complete
    });
    assert_eq!(pauses, 1);
    assert_eq!(rig.sys.coordinator().automatic().cycles_completed(), 2);
    assert_eq!(rig.sys.status().mode.auto_cycle_count, 2);
}

#[test]
fn first_run_calibrates_coasting() {
    let mut rig = Rig::with_store(config(1), WIRE_M, learned_store(WIRE_M, 1.5, 0.0));
    rig.validate();
    assert!(!rig.sys.status().mode.auto_coasting_calibrated);
    assert!(rig.key('U').success);

    rig.run_until(15_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::CoastingCalibration
    });
    rig.run_until(60_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::Accelerating
    });

    let calibration: CoastingCalibration = get(rig.sys.store(), "coasting").unwrap();
    assert!(calibration.calibrated);
    assert!(calibration.coast_distance_m > 2.0 && calibration.coast_distance_m < 8.0);
    assert!(
        (calibration.coast_start_distance_m - calibration.coast_distance_m - 2.0).abs() < 0.001
    );
    assert!(rig.sys.status().mode.auto_coasting_calibrated);
    assert!(rig.sys.coordinator().automatic().calibration().is_some());
}

// ============================================================================
// Stopping
// ============================================================================

#[test]
fn graceful_stop_finishes_current_run() {
    let mut rig = learned_rig(5);
    assert!(rig.key('U').success);
    rig.run_until(30_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::Cruising
    });

    let reply = rig.key('Q');
    assert!(reply.success);
    assert!(rig.sys.coordinator().automatic().status().finishing_current_run);
    // Still under power until the run ends
    assert!(rig.sys.hardware().target_speed_ms() > 1.0);

    rig.run_until(60_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::StoppingGraceful
    });
    assert!(rig.pos_m > 27.0);
    let status = rig.sys.coordinator().automatic().status();
    assert_eq!(status.forward_runs, 1);
    assert_eq!(status.reverse_runs, 0);

    rig.run_until(5_000, |s| s.coordinator().automatic().state() == AutomaticState::Idle);
    rig.step();
    assert_eq!(rig.sys.coordinator().current_mode(), OperatingMode::None);
    assert_eq!(rig.sys.coordinator().automatic().cycles_completed(), 0);
}

#[test]
fn interrupt_disarms_and_flags_cycle() {
    let mut rig = learned_rig(5);
    assert!(rig.key('U').success);
    rig.run_until(30_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::Cruising
    });

    let reply = rig.key('I');
    assert!(reply.success);
    assert_eq!(reply.message.as_str(), "Current mode stopped immediately");
    assert_eq!(auto_state(&rig), AutomaticState::StoppingInterrupted);
    assert!(rig.sys.hardware().target_speed_ms() < 0.001);
    assert_eq!(rig.sys.hardware().esc_state(), EscState::Disarming);
    assert!(rig.sys.status().mode.auto_cycle_interrupted);

    rig.run_for(1_000);
    assert_eq!(auto_state(&rig), AutomaticState::Idle);
    assert_eq!(rig.sys.hardware().esc_state(), EscState::Disarmed);
    assert_eq!(rig.sys.coordinator().current_mode(), OperatingMode::None);
}

#[test]
fn emergency_stop_halts_cycling() {
    let mut rig = learned_rig(5);
    assert!(rig.key('U').success);
    rig.run_until(30_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::Cruising
    });

    let reply = rig.key('E');
    assert!(reply.success);
    assert_eq!(auto_state(&rig), AutomaticState::Error);
    assert!(rig.sys.hardware().target_speed_ms() < 0.001);
    let mode = rig.sys.status().mode;
    assert_eq!(mode.current_mode, OperatingMode::None);
    assert!(mode.auto_cycle_interrupted);
    assert_eq!(mode.current_mode_status.as_str(), "EMERGENCY STOP");

    // Automatic can be started again afterwards
    rig.run_for(5_000);
    assert!(rig.key('U').success);
}

#[test]
fn impact_while_cruising_is_a_safety_stop() {
    let mut rig = learned_rig(5);
    assert!(rig.key('U').success);
    rig.run_until(30_000, |s| {
        s.coordinator().automatic().state() == AutomaticState::Cruising
    });

    rig.sys
        .accel_mut()
        .spike(trolley_core::AccelSample::new(0.0, 0.0, 1.8));
    rig.step();
    assert_eq!(auto_state(&rig), AutomaticState::Error);
    assert!(rig.sys.hardware().target_speed_ms() < 0.001);
    assert_eq!(rig.sys.status().mode.error_count, 1);
}

#[test]
fn automatic_requires_learned_wire() {
    let mut rig = Rig::new(config(1), WIRE_M);
    rig.validate();
    let reply = rig.key('U');
    assert!(!reply.success);
    assert_eq!(auto_state(&rig), AutomaticState::Idle);
}
