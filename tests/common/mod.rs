//! Shared test rig: a `SystemContext` on mocks plus a crude trolley model.
//!
//! The model turns the commanded speed into motion along a wire of fixed
//! length, emits a Hall pulse every wheel circumference of travel and bumps
//! the accelerometer when the trolley runs into either end.

#![allow(dead_code)]

use trolley_core::hal::{MockAccelerometer, MockEsc, MockParamStore, MockPulseSource};
use trolley_core::traits::{AccelSample, ParamStore};
use trolley_core::{
    CoastingCalibration, Command, CommandReply, CommandSource, Config, DetectionMethod,
    SystemContext, WireLearningConfig, WireLearningResult,
};

/// Control loop period
pub const TICK_MS: u64 = 20;

/// Below this command the motor does not drive the wheel
const DRIVE_THRESHOLD_MS: f32 = 0.05;
/// Motor acceleration limit, m/s²
const DRIVE_ACCEL_MS2: f32 = 1.0;
/// Rolling resistance with the power cut, m/s²
const ROLL_DECEL_MS2: f32 = 0.4;
/// Reading at the end stop; 1.5 g dynamic
const END_STOP_Z_G: f32 = 2.5;

pub type TestSystem = SystemContext<MockEsc, MockPulseSource, MockAccelerometer, MockParamStore>;

pub fn system(config: Config) -> TestSystem {
    system_with_store(config, MockParamStore::new())
}

pub fn system_with_store(config: Config, store: MockParamStore) -> TestSystem {
    SystemContext::new(
        config,
        MockEsc::new(),
        MockPulseSource::new(),
        MockAccelerometer::new(),
        store,
    )
}

/// Wire learning tuned for the model: three test speeds, short pauses.
pub fn learning_config() -> Config {
    let mut learning = WireLearningConfig::default()
        .with_speed_range(0.5, 1.0, 0.25)
        .with_timeout_ms(300_000);
    learning.min_hall_pulses = 5;
    learning.speed_validation_timeout_ms = 5000;
    learning.direction_pause_ms = 1000;
    // The first interval after a pause is stale and reads slow
    learning.detection.speed_drop_settle_ms = 3000;
    Config::default().with_wire_learning(learning)
}

/// A store holding a finished wire learning run and coasting calibration.
pub fn learned_store(wire_m: f32, cruise_ms: f32, coast_m: f32) -> MockParamStore {
    let mut store = MockParamStore::new();
    let wire = WireLearningResult {
        complete: true,
        wire_length_m: wire_m,
        forward_distance_m: wire_m,
        reverse_distance_m: wire_m,
        optimal_learning_speed_ms: cruise_ms / 1.5,
        optimal_cruise_speed_ms: cruise_ms,
        forward_rotations: (wire_m / 0.1916) as u32,
        reverse_rotations: (wire_m / 0.1916) as u32,
        total_learning_time_ms: 60_000,
        primary_detection_method: DetectionMethod::Impact,
        accuracy_percent: 100.0,
    };
    put(&mut store, "wire_learning", &wire);
    if coast_m > 0.0 {
        let calibration = CoastingCalibration {
            calibrated: true,
            calibration_speed_ms: cruise_ms,
            coast_distance_m: coast_m,
            coast_time_ms: 3750,
            decel_rate_ms2: 0.4,
            coast_start_distance_m: coast_m + 2.0,
        };
        put(&mut store, "coasting", &calibration);
    }
    store.write_count = 0;
    store
}

pub fn put<T: serde::Serialize>(store: &mut MockParamStore, key: &str, value: &T) {
    let mut buf = [0u8; 512];
    let len = serde_json_core::to_slice(value, &mut buf).unwrap();
    store.store("trolley_modes", key, &buf[..len]).unwrap();
}

pub fn get<T: serde::de::DeserializeOwned>(store: &MockParamStore, key: &str) -> Option<T> {
    let raw = store.get("trolley_modes", key)?;
    serde_json_core::from_slice::<T>(raw).ok().map(|(value, _)| value)
}

/// System plus trolley model.
pub struct Rig {
    pub sys: TestSystem,
    pub now: u64,
    pub wire_m: f32,
    pub pos_m: f32,
    pub vel_ms: f32,
    pub end_hits: u32,
    /// Wheel jammed: no motion and no pulses
    pub wheel_stuck: bool,
    /// Pulses per metre driving backward relative to forward; above 1.0 the
    /// wheel reads long in reverse
    pub reverse_pulse_gain: f32,
    circumference_m: f32,
    travel_m: f32,
    next_pulse_m: f32,
}

impl Rig {
    pub fn new(config: Config, wire_m: f32) -> Self {
        Self::with_store(config, wire_m, MockParamStore::new())
    }

    pub fn with_store(config: Config, wire_m: f32, store: MockParamStore) -> Self {
        let circumference_m = config.hardware.wheel_circumference_m;
        let mut sys = system_with_store(config, store);
        sys.init(0).unwrap();
        Self {
            sys,
            now: 0,
            wire_m,
            pos_m: 0.0,
            vel_ms: 0.0,
            end_hits: 0,
            wheel_stuck: false,
            reverse_pulse_gain: 1.0,
            circumference_m,
            travel_m: 0.0,
            next_pulse_m: circumference_m,
        }
    }

    /// Send a console character at the current time.
    pub fn key(&mut self, c: char) -> CommandReply {
        self.sys
            .handle_char(c, CommandSource::Serial, self.now)
            .unwrap()
    }

    pub fn command(&mut self, command: Command) -> CommandReply {
        self.sys.handle_command(command, CommandSource::Serial, self.now)
    }

    /// Operator handshake: rotate the wheel by hand, confirm, shake, confirm.
    pub fn validate(&mut self) {
        assert!(self.key('V').success);
        self.now += TICK_MS;
        self.sys.pulses_mut().push(self.now);
        self.sys.tick(self.now);
        self.now += TICK_MS;
        assert!(self.key('H').success);
        self.sys.tick(self.now);
        self.now += TICK_MS;
        self.sys.accel_mut().spike(AccelSample::new(0.0, 0.0, 1.8));
        self.sys.tick(self.now);
        self.now += TICK_MS;
        assert!(self.key('C').success);
        self.sys.tick(self.now);
        self.step();
        assert!(self.sys.gate().sensors_validated());
    }

    /// Advance one tick: move the trolley, then run the system.
    pub fn step(&mut self) {
        self.now += TICK_MS;
        let dt = TICK_MS as f32 / 1000.0;

        let hw = self.sys.hardware();
        let commanded = if hw.is_armed() {
            hw.target_speed_ms() * hw.direction().sign()
        } else {
            0.0
        };
        if self.wheel_stuck {
            self.vel_ms = 0.0;
        } else if commanded.abs() > DRIVE_THRESHOLD_MS {
            let limit = DRIVE_ACCEL_MS2 * dt;
            self.vel_ms += (commanded - self.vel_ms).clamp(-limit, limit);
        } else {
            let slow = ROLL_DECEL_MS2 * dt;
            if self.vel_ms.abs() <= slow {
                self.vel_ms = 0.0;
            } else {
                self.vel_ms -= slow * self.vel_ms.signum();
            }
        }

        let moved = self.vel_ms * dt;
        self.pos_m += moved;
        let mut travelled = moved.abs();
        if self.pos_m >= self.wire_m || self.pos_m <= 0.0 {
            let end = if self.pos_m >= self.wire_m { self.wire_m } else { 0.0 };
            travelled -= (self.pos_m - end).abs();
            self.pos_m = end;
            if self.vel_ms != 0.0 {
                self.end_hits += 1;
                self.sys
                    .accel_mut()
                    .spike(AccelSample::new(0.0, 0.0, END_STOP_Z_G));
            }
            self.vel_ms = 0.0;
        }

        let gain = if moved < 0.0 { self.reverse_pulse_gain } else { 1.0 };
        self.travel_m += travelled.max(0.0) * gain;
        while self.travel_m >= self.next_pulse_m {
            self.sys.pulses_mut().push(self.now);
            self.next_pulse_m += self.circumference_m;
        }

        self.sys.tick(self.now);
    }

    /// Step until `done` holds. Panics after `max_ms` of simulated time.
    pub fn run_until(&mut self, max_ms: u64, mut done: impl FnMut(&TestSystem) -> bool) {
        let deadline = self.now + max_ms;
        while !done(&self.sys) {
            assert!(
                self.now < deadline,
                "condition not reached within {} ms (at {} ms, {:.2} m)",
                max_ms,
                self.now,
                self.pos_m
            );
            self.step();
        }
    }

    pub fn run_for(&mut self, ms: u64) {
        let deadline = self.now + ms;
        while self.now < deadline {
            self.step();
        }
    }
}
