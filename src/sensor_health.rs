//! Sensor validation gate with operator confirmation.
//!
//! Before any mode may move the trolley, the operator proves both sensors
//! work: rotate the wheel by hand (Hall), confirm; shake the trolley
//! (accelerometer), confirm. Detection alone never advances the gate.
//!
//! ```text
//! Start ─start_validation()─▶ WaitWheelRotation ─confirm_hall()─▶ WaitTrolleyShake
//!                                   │ 60s                               │ 60s
//!                                   ▼                                   ▼
//!                                 Failed ◀──────────────────────────────┘
//!
//! WaitTrolleyShake ─confirm_accel()─▶ SensorsReady ─update()─▶ SystemReady
//! ```
//!
//! `Failed` is absorbing until [`SensorHealthGate::reset`]; `SystemReady`
//! is never left except through a reset.

use log::{info, warn};

use crate::config::{long_string, set_message, LongString, SensorConfig};
use crate::error::ControlError;
use crate::traits::{AccelSample, HallObserver};

/// Status of a single sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum SensorStatus {
    /// Not tested yet.
    #[default]
    Unknown,
    /// Waiting for the operator.
    Testing,
    /// Detected and confirmed.
    Healthy,
    /// Reported broken.
    Failed,
    /// Nothing detected before the step timed out.
    Timeout,
}

impl SensorStatus {
    /// Returns the status as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Unknown => "unknown",
            SensorStatus::Testing => "testing",
            SensorStatus::Healthy => "healthy",
            SensorStatus::Failed => "failed",
            SensorStatus::Timeout => "timeout",
        }
    }
}

/// Position in the validation handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum InitState {
    /// Validation not started.
    #[default]
    Start,
    /// Waiting for the wheel to be turned and confirmed.
    WaitWheelRotation,
    /// Waiting for the trolley to be shaken and confirmed.
    WaitTrolleyShake,
    /// Both confirmed; promoted on the next update.
    SensorsReady,
    /// Sensors validated, motion allowed.
    SystemReady,
    /// A step timed out.
    Failed,
}

impl InitState {
    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            InitState::Start => "start",
            InitState::WaitWheelRotation => "wait_wheel_rotation",
            InitState::WaitTrolleyShake => "wait_trolley_shake",
            InitState::SensorsReady => "sensors_ready",
            InitState::SystemReady => "system_ready",
            InitState::Failed => "failed",
        }
    }
}

/// Snapshot of the gate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct SensorHealth {
    /// Hall sensor status
    pub hall_status: SensorStatus,
    /// Accelerometer status
    pub accel_status: SensorStatus,
    /// Handshake position
    pub init_state: InitState,
    /// A pulse arrived while waiting for rotation
    pub wheel_rotation_detected: bool,
    /// A shake arrived while waiting for it
    pub trolley_shake_detected: bool,
    /// Last X reading, g
    pub accel_x: f32,
    /// Last Y reading, g
    pub accel_y: f32,
    /// Last Z reading, g
    pub accel_z: f32,
    /// Magnitude including gravity, g
    pub total_accel_g: f32,
    /// Magnitude with gravity removed, g
    pub dynamic_accel_g: f32,
    /// Largest recent impact, g
    pub last_impact_g: f32,
    /// When the last impact was recorded
    pub last_impact_ms: Option<u64>,
    /// Pulses seen since the last reset
    pub hall_pulse_count: u32,
    /// Wheel RPM from the last pulse interval
    pub current_rpm: f32,
    /// Wheel speed from the last pulse interval, m/s
    pub wheel_speed_ms: f32,
    /// Operator-facing status
    pub status_message: LongString,
    /// Last error
    pub error_message: LongString,
    /// Both sensors confirmed
    pub sensors_validated: bool,
    /// Handshake finished
    pub system_ready: bool,
}

impl Default for SensorHealth {
    fn default() -> Self {
        Self {
            hall_status: SensorStatus::Unknown,
            accel_status: SensorStatus::Unknown,
            init_state: InitState::Start,
            wheel_rotation_detected: false,
            trolley_shake_detected: false,
            accel_x: 0.0,
            accel_y: 0.0,
            accel_z: 0.0,
            total_accel_g: 0.0,
            dynamic_accel_g: 0.0,
            last_impact_g: 0.0,
            last_impact_ms: None,
            hall_pulse_count: 0,
            current_rpm: 0.0,
            wheel_speed_ms: 0.0,
            status_message: long_string("System initializing..."),
            error_message: LongString::new(),
            sensors_validated: false,
            system_ready: false,
        }
    }
}

/// Two-step operator validation of the Hall sensor and accelerometer.
#[derive(Clone, Debug)]
pub struct SensorHealthGate {
    config: SensorConfig,
    circumference_m: f32,
    health: SensorHealth,
    state_since_ms: u64,
    last_pulse_ms: Option<u64>,
}

impl SensorHealthGate {
    /// Create a gate in the `Start` state.
    pub fn new(config: &SensorConfig, wheel_circumference_m: f32) -> Self {
        Self {
            config: config.clone(),
            circumference_m: wheel_circumference_m,
            health: SensorHealth::default(),
            state_since_ms: 0,
            last_pulse_ms: None,
        }
    }

    /// Begin the handshake.
    pub fn start_validation(&mut self, now_ms: u64) -> Result<(), ControlError> {
        match self.health.init_state {
            InitState::Start => {}
            InitState::Failed => {
                return Err(ControlError::InvalidState(
                    "sensor validation failed, reset required",
                ))
            }
            InitState::SensorsReady | InitState::SystemReady => {
                return Err(ControlError::InvalidState("sensors already validated"))
            }
            InitState::WaitWheelRotation | InitState::WaitTrolleyShake => {
                return Err(ControlError::InvalidState("sensor validation in progress"))
            }
        }
        self.health.init_state = InitState::WaitWheelRotation;
        self.health.hall_status = SensorStatus::Testing;
        self.health.wheel_rotation_detected = false;
        self.health.trolley_shake_detected = false;
        self.health.error_message.clear();
        set_message(
            &mut self.health.status_message,
            "ROTATE THE WHEEL - Testing Hall sensor...",
        );
        self.state_since_ms = now_ms;
        info!(target: "sensor_health", "Sensor validation started: waiting for wheel rotation");
        Ok(())
    }

    /// Operator confirms the wheel rotation was seen.
    pub fn confirm_hall(&mut self, now_ms: u64) -> Result<(), ControlError> {
        if self.health.init_state != InitState::WaitWheelRotation {
            return Err(ControlError::InvalidState("not waiting for wheel rotation"));
        }
        if !self.health.wheel_rotation_detected {
            return Err(ControlError::InvalidState("no wheel rotation detected yet"));
        }
        self.health.hall_status = SensorStatus::Healthy;
        self.health.accel_status = SensorStatus::Testing;
        self.health.init_state = InitState::WaitTrolleyShake;
        set_message(
            &mut self.health.status_message,
            "SHAKE THE TROLLEY - Testing accelerometer...",
        );
        self.state_since_ms = now_ms;
        info!(target: "sensor_health", "Hall sensor confirmed");
        Ok(())
    }

    /// Operator confirms the shake was seen.
    pub fn confirm_accel(&mut self, now_ms: u64) -> Result<(), ControlError> {
        if self.health.init_state != InitState::WaitTrolleyShake {
            return Err(ControlError::InvalidState("not waiting for trolley shake"));
        }
        if !self.health.trolley_shake_detected {
            return Err(ControlError::InvalidState("no trolley shake detected yet"));
        }
        self.health.accel_status = SensorStatus::Healthy;
        self.health.init_state = InitState::SensorsReady;
        set_message(
            &mut self.health.status_message,
            "Both sensors validated - System ready!",
        );
        self.state_since_ms = now_ms;
        info!(target: "sensor_health", "Accelerometer confirmed");
        Ok(())
    }

    /// Fold in one accelerometer reading.
    pub fn on_accel_sample(&mut self, sample: AccelSample, now_ms: u64) {
        let total = sample.magnitude();
        let dynamic = if self.config.gravity_compensation {
            sample.dynamic()
        } else {
            total
        };
        self.health.accel_x = sample.x;
        self.health.accel_y = sample.y;
        self.health.accel_z = sample.z;
        self.health.total_accel_g = total;
        self.health.dynamic_accel_g = dynamic;

        match self.health.init_state {
            InitState::WaitTrolleyShake => {
                if dynamic > self.config.shake_threshold_g && !self.health.trolley_shake_detected {
                    self.health.trolley_shake_detected = true;
                    set_message(
                        &mut self.health.status_message,
                        "Trolley shake detected - confirm to continue",
                    );
                    info!(target: "sensor_health", "Trolley shake detected: {:.2} g", dynamic);
                }
            }
            InitState::SystemReady => {
                if dynamic > self.config.impact_record_threshold_g {
                    self.health.last_impact_g = dynamic;
                    self.health.last_impact_ms = Some(now_ms);
                }
            }
            _ => {}
        }
    }

    /// Periodic update: step timeouts, promotion and RPM decay.
    pub fn update(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.state_since_ms);
        match self.health.init_state {
            InitState::WaitWheelRotation => {
                if elapsed > u64::from(self.config.hall_validation_timeout_ms) {
                    self.health.hall_status = SensorStatus::Timeout;
                    self.fail("No wheel rotation detected - check/replace Hall sensor");
                }
            }
            InitState::WaitTrolleyShake => {
                if elapsed > u64::from(self.config.accel_validation_timeout_ms) {
                    self.health.accel_status = SensorStatus::Timeout;
                    self.fail("Fix/replace accelerometer or its connections");
                }
            }
            InitState::SensorsReady => {
                self.health.init_state = InitState::SystemReady;
                self.health.sensors_validated = true;
                self.health.system_ready = true;
                set_message(
                    &mut self.health.status_message,
                    "System operational - All sensors healthy",
                );
                info!(target: "sensor_health", "Sensors validated, system ready");
            }
            InitState::SystemReady => {
                if let Some(last) = self.last_pulse_ms {
                    if now_ms.saturating_sub(last) > u64::from(self.config.hall_pulse_timeout_ms) {
                        self.health.current_rpm = 0.0;
                        self.health.wheel_speed_ms = 0.0;
                    }
                }
            }
            InitState::Start | InitState::Failed => {}
        }
    }

    /// Safe to accept motion commands: system ready and at least one pulse seen.
    pub fn check_command_safety(&self) -> bool {
        self.health.system_ready && self.health.hall_pulse_count > 0
    }

    /// Back to `Start` with everything cleared.
    pub fn reset(&mut self) {
        self.health = SensorHealth::default();
        set_message(&mut self.health.status_message, "");
        self.last_pulse_ms = None;
        self.state_since_ms = 0;
        info!(target: "sensor_health", "Sensor validation reset");
    }

    /// Current gate state (borrowed).
    pub fn health(&self) -> &SensorHealth {
        &self.health
    }

    /// Snapshot copy of the gate state.
    pub fn snapshot(&self) -> SensorHealth {
        self.health.clone()
    }

    /// Handshake position.
    pub fn init_state(&self) -> InitState {
        self.health.init_state
    }

    /// Both sensors confirmed.
    pub fn sensors_validated(&self) -> bool {
        self.health.sensors_validated
    }

    /// Accelerometer status.
    pub fn accel_status(&self) -> SensorStatus {
        self.health.accel_status
    }

    /// Hall status.
    pub fn hall_status(&self) -> SensorStatus {
        self.health.hall_status
    }

    fn fail(&mut self, message: &str) {
        self.health.init_state = InitState::Failed;
        set_message(&mut self.health.error_message, message);
        set_message(&mut self.health.status_message, "Sensor validation failed");
        warn!(target: "sensor_health", "Sensor validation failed: {}", message);
    }
}

impl HallObserver for SensorHealthGate {
    fn on_hall_pulse(&mut self, timestamp_ms: u64, _rotation_count: u32) {
        self.health.hall_pulse_count = self.health.hall_pulse_count.saturating_add(1);

        if let Some(prev) = self.last_pulse_ms {
            let dt_ms = timestamp_ms.saturating_sub(prev);
            if dt_ms > 0 {
                let dt_s = dt_ms as f32 / 1000.0;
                self.health.current_rpm = 60.0 / dt_s;
                self.health.wheel_speed_ms = self.circumference_m / dt_s;
            }
        }
        self.last_pulse_ms = Some(timestamp_ms);

        if self.health.init_state == InitState::WaitWheelRotation
            && !self.health.wheel_rotation_detected
        {
            self.health.wheel_rotation_detected = true;
            set_message(
                &mut self.health.status_message,
                "Wheel rotation detected - confirm to continue",
            );
            info!(target: "sensor_health", "Wheel rotation detected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SensorHealthGate {
        SensorHealthGate::new(&SensorConfig::default(), 0.1916)
    }

    fn shake() -> AccelSample {
        AccelSample::new(0.0, 0.0, 1.5)
    }

    #[test]
    fn full_handshake() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        assert_eq!(g.init_state(), InitState::WaitWheelRotation);
        assert_eq!(g.hall_status(), SensorStatus::Testing);

        g.on_hall_pulse(100, 1);
        assert!(g.health().wheel_rotation_detected);
        g.confirm_hall(200).unwrap();
        assert_eq!(g.init_state(), InitState::WaitTrolleyShake);
        assert_eq!(g.hall_status(), SensorStatus::Healthy);
        assert_eq!(g.accel_status(), SensorStatus::Testing);

        g.on_accel_sample(shake(), 300);
        assert!(g.health().trolley_shake_detected);
        g.confirm_accel(400).unwrap();
        assert_eq!(g.init_state(), InitState::SensorsReady);
        assert!(!g.sensors_validated());

        g.update(420);
        assert_eq!(g.init_state(), InitState::SystemReady);
        assert!(g.sensors_validated());
        assert!(g.health().system_ready);
    }

    #[test]
    fn confirm_requires_detection() {
        let mut g = gate();
        assert!(g.confirm_hall(0).is_err());
        g.start_validation(0).unwrap();
        assert_eq!(
            g.confirm_hall(10),
            Err(ControlError::InvalidState("no wheel rotation detected yet"))
        );
        assert!(g.confirm_accel(10).is_err());
    }

    #[test]
    fn gravity_alone_is_not_a_shake() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        g.confirm_hall(20).unwrap();

        g.on_accel_sample(AccelSample::AT_REST, 30);
        g.on_accel_sample(AccelSample::new(0.0, 0.2, 1.0), 40);
        assert!(!g.health().trolley_shake_detected);
        assert!(g.confirm_accel(50).is_err());
    }

    #[test]
    fn wheel_step_times_out() {
        let mut g = gate();
        g.start_validation(1000).unwrap();
        g.update(61_000);
        assert_eq!(g.init_state(), InitState::WaitWheelRotation);
        g.update(61_001);
        assert_eq!(g.init_state(), InitState::Failed);
        assert_eq!(g.hall_status(), SensorStatus::Timeout);
        assert!(!g.health().error_message.is_empty());
    }

    #[test]
    fn failed_is_absorbing_until_reset() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        g.update(70_000);
        assert_eq!(g.init_state(), InitState::Failed);

        g.on_hall_pulse(70_100, 1);
        assert!(g.confirm_hall(70_200).is_err());
        assert!(g.start_validation(70_300).is_err());
        g.update(200_000);
        assert_eq!(g.init_state(), InitState::Failed);

        g.reset();
        assert_eq!(g.init_state(), InitState::Start);
        g.start_validation(200_000).unwrap();
    }

    #[test]
    fn shake_step_times_out() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        g.confirm_hall(1000).unwrap();
        g.update(61_001);
        assert_eq!(g.init_state(), InitState::Failed);
        assert_eq!(g.accel_status(), SensorStatus::Timeout);
    }

    #[test]
    fn handshake_not_rerun_after_ready() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        g.confirm_hall(20).unwrap();
        g.on_accel_sample(shake(), 30);
        g.confirm_accel(40).unwrap();
        g.update(60);
        assert_eq!(
            g.start_validation(100),
            Err(ControlError::InvalidState("sensors already validated"))
        );
        g.update(1_000_000);
        assert!(g.sensors_validated());
    }

    #[test]
    fn impacts_recorded_after_ready() {
        let mut g = gate();
        g.on_accel_sample(shake(), 5);
        assert_eq!(g.health().last_impact_ms, None);

        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        g.confirm_hall(20).unwrap();
        g.on_accel_sample(shake(), 30);
        g.confirm_accel(40).unwrap();
        g.update(60);

        g.on_accel_sample(AccelSample::new(0.0, 0.0, 1.25), 500);
        assert!((g.health().last_impact_g - 0.25).abs() < 1e-4);
        assert_eq!(g.health().last_impact_ms, Some(500));
    }

    #[test]
    fn rpm_from_pulse_interval() {
        let mut g = gate();
        g.on_hall_pulse(0, 1);
        g.on_hall_pulse(500, 2);
        assert!((g.health().current_rpm - 120.0).abs() < 0.01);
        assert!((g.health().wheel_speed_ms - 0.3832).abs() < 0.001);
        assert_eq!(g.health().hall_pulse_count, 2);
    }

    #[test]
    fn rpm_zeroed_after_silence_when_ready() {
        let mut g = gate();
        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        g.on_hall_pulse(510, 2);
        g.confirm_hall(600).unwrap();
        g.on_accel_sample(shake(), 700);
        g.confirm_accel(800).unwrap();
        g.update(820);
        assert!(g.health().current_rpm > 0.0);

        g.update(5510);
        assert!(g.health().current_rpm > 0.0);
        g.update(5511);
        assert_eq!(g.health().current_rpm, 0.0);
        assert_eq!(g.health().wheel_speed_ms, 0.0);
    }

    #[test]
    fn command_safety_needs_ready_and_pulse() {
        let mut g = gate();
        assert!(!g.check_command_safety());
        g.start_validation(0).unwrap();
        g.on_hall_pulse(10, 1);
        assert!(!g.check_command_safety());
        g.confirm_hall(20).unwrap();
        g.on_accel_sample(shake(), 30);
        g.confirm_accel(40).unwrap();
        g.update(60);
        assert!(g.check_command_safety());
    }
}
