//! Wire length learning.
//!
//! The trolley runs to the forward end of the wire and back, stepping its
//! test speed up as each speed is confirmed by Hall pulses. Each end is found
//! by the shared [`WireEndDetector`]. The two measured distances must agree
//! within the configured tolerance before a [`WireLearningResult`] is
//! published; a disagreeing run publishes nothing and leaves the previous
//! result in place.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::coasting::{CoastOutcome, CoastingCalibration, CoastingMeasurement};
use crate::config::{format_message, set_message, LongString, WireLearningConfig};
use crate::error::ControlError;
use crate::esc::EscState;
use crate::traits::{publish, EngineContext, EngineEvent, EscOutput, ModeEngine, Outbox};
use crate::wire_end::{DetectionMethod, WireEndDetector};

/// Wire learning state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum WireLearningState {
    /// Not running.
    #[default]
    Idle,
    /// Waiting for the ESC to arm.
    Initializing,
    /// Running toward the forward end.
    ForwardDirection,
    /// Stopped at the forward end.
    DirectionPause,
    /// Running back toward the start.
    ReverseDirection,
    /// Comparing the two distances.
    CalculatingResults,
    /// Result published.
    Complete,
    /// Run abandoned.
    Failed,
    /// Graceful stop in progress.
    Stopping,
}

impl WireLearningState {
    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            WireLearningState::Idle => "idle",
            WireLearningState::Initializing => "initializing",
            WireLearningState::ForwardDirection => "forward",
            WireLearningState::DirectionPause => "direction_pause",
            WireLearningState::ReverseDirection => "reverse",
            WireLearningState::CalculatingResults => "calculating",
            WireLearningState::Complete => "complete",
            WireLearningState::Failed => "failed",
            WireLearningState::Stopping => "stopping",
        }
    }

    /// Progress shown while in this state.
    pub const fn progress_percent(&self) -> u8 {
        match self {
            WireLearningState::Idle | WireLearningState::Failed | WireLearningState::Stopping => 0,
            WireLearningState::Initializing => 5,
            WireLearningState::ForwardDirection => 25,
            WireLearningState::DirectionPause => 50,
            WireLearningState::ReverseDirection => 75,
            WireLearningState::CalculatingResults => 95,
            WireLearningState::Complete => 100,
        }
    }
}

/// Learned wire geometry. Immutable once `complete`.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct WireLearningResult {
    /// Both runs finished and agreed
    pub complete: bool,
    /// Average of the two runs, m
    pub wire_length_m: f32,
    /// Forward run distance, m
    pub forward_distance_m: f32,
    /// Reverse run distance, m
    pub reverse_distance_m: f32,
    /// Highest test speed confirmed by Hall pulses, m/s
    pub optimal_learning_speed_ms: f32,
    /// Recommended automatic cruise speed, m/s
    pub optimal_cruise_speed_ms: f32,
    /// Wheel rotations on the forward run
    pub forward_rotations: u32,
    /// Wheel rotations on the reverse run
    pub reverse_rotations: u32,
    /// Start to result, ms
    pub total_learning_time_ms: u32,
    /// How the forward end was found
    pub primary_detection_method: DetectionMethod,
    /// 100 minus the forward/reverse difference in percent
    pub accuracy_percent: f32,
}

/// Whether a stored or fresh result is usable by automatic mode.
pub fn validate_results(result: &WireLearningResult, config: &WireLearningConfig) -> bool {
    result.complete
        && result.wire_length_m >= config.min_length_m
        && result.wire_length_m <= config.max_length_m
        && result.accuracy_percent >= config.min_accuracy_percent
}

/// Comparison of the forward and reverse distances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LengthCheck {
    /// Average of both distances, m
    pub wire_length_m: f32,
    /// |forward - reverse| relative to the average
    pub difference_percent: f32,
    /// 100 minus the difference
    pub accuracy_percent: f32,
}

impl LengthCheck {
    /// Whether the two runs agree.
    pub fn within(&self, tolerance_percent: f32) -> bool {
        self.difference_percent <= tolerance_percent
    }
}

/// Compare the two run distances.
pub fn evaluate_lengths(forward_m: f32, reverse_m: f32) -> LengthCheck {
    let average = (forward_m + reverse_m) / 2.0;
    let difference_percent = if average > 0.0 {
        (forward_m - reverse_m).abs() / average * 100.0
    } else {
        100.0
    };
    LengthCheck {
        wire_length_m: average,
        difference_percent,
        accuracy_percent: 100.0 - difference_percent,
    }
}

/// Live progress of a learning run.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct WireLearningProgress {
    /// Current state
    pub state: WireLearningState,
    /// Test speed in use, m/s
    pub current_speed_ms: f32,
    /// Current test speed confirmed by pulses
    pub speed_validated: bool,
    /// Highest confirmed test speed so far, m/s
    pub highest_validated_speed_ms: f32,
    /// Forward distance so far, m
    pub forward_distance_m: f32,
    /// Reverse distance so far, m
    pub reverse_distance_m: f32,
    /// Forward rotations so far
    pub forward_rotations: u32,
    /// Reverse rotations so far
    pub reverse_rotations: u32,
    /// Forward end detection
    pub forward_detection: DetectionMethod,
    /// Reverse end detection
    pub reverse_detection: DetectionMethod,
    /// Run start time
    pub start_ms: u64,
    /// Time since the run started
    pub elapsed_ms: u64,
    /// Percentage for display
    pub progress_percent: u8,
    /// Human-readable status
    pub status_message: LongString,
    /// Last failure
    pub error_message: LongString,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    /// Counting pulses at the current test speed.
    Testing { since_ms: u64, start_rotations: u32 },
    /// Holding the current speed before the next step.
    StepPause { until_ms: u64, next_speed_ms: f32 },
    /// No further steps this direction.
    Holding,
}

/// Wire learning engine.
pub struct WireLearningEngine {
    config: WireLearningConfig,
    cruise_ceiling_ms: f32,
    state: WireLearningState,
    state_since_ms: u64,
    progress: WireLearningProgress,
    phase: Phase,
    direction_start_rotations: u32,
    highest_tested_ms: f32,
    validated_speed_ms: Option<f32>,
    pause_until_ms: u64,
    detector: WireEndDetector,
    coasting: CoastingMeasurement,
    coasting_result: Option<CoastingCalibration>,
    result: Option<WireLearningResult>,
    outbox: Outbox,
}

impl WireLearningEngine {
    /// Create an idle engine. `cruise_ceiling_ms` caps the recommended
    /// cruise speed (the automatic mode maximum).
    pub fn new(config: &WireLearningConfig, cruise_ceiling_ms: f32) -> Self {
        let mut progress = WireLearningProgress::default();
        set_message(&mut progress.status_message, "Wire learning idle");
        Self {
            config: config.clone(),
            cruise_ceiling_ms,
            state: WireLearningState::Idle,
            state_since_ms: 0,
            progress,
            phase: Phase::Holding,
            direction_start_rotations: 0,
            highest_tested_ms: 0.0,
            validated_speed_ms: None,
            pause_until_ms: 0,
            detector: WireEndDetector::new(&config.detection),
            coasting: CoastingMeasurement::new(&config.coasting),
            coasting_result: None,
            result: None,
            outbox: Outbox::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> WireLearningState {
        self.state
    }

    /// Snapshot of the run progress.
    pub fn progress(&self) -> WireLearningProgress {
        self.progress.clone()
    }

    /// Percentage for display.
    pub fn progress_percent(&self) -> u8 {
        self.state.progress_percent()
    }

    /// Result of the last successful run.
    pub fn result(&self) -> Option<&WireLearningResult> {
        self.result.as_ref()
    }

    /// Coasting measured during the last run, if any.
    pub fn coasting_result(&self) -> Option<&CoastingCalibration> {
        self.coasting_result.as_ref()
    }

    /// Whether the last result is usable.
    pub fn validate_results(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|r| validate_results(r, &self.config))
    }

    fn enter(&mut self, state: WireLearningState, now_ms: u64) {
        if self.state != state {
            info!(
                target: "wire_learning",
                "{} -> {}", self.state.as_str(), state.as_str()
            );
        }
        self.state = state;
        self.state_since_ms = now_ms;
        self.progress.state = state;
        self.progress.progress_percent = state.progress_percent();
    }

    fn fail(&mut self, now_ms: u64, message: &str) {
        warn!(target: "wire_learning", "{}", message);
        set_message(&mut self.progress.error_message, message);
        set_message(&mut self.progress.status_message, "Wire learning failed");
        self.coasting.cancel();
        self.enter(WireLearningState::Failed, now_ms);
    }

    fn command_speed<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        speed_ms: f32,
        forward: bool,
    ) -> Result<(), ControlError> {
        if let Err(e) = ctx.hw.set_motor_speed(speed_ms, forward) {
            ctx.hw.emergency_stop(ctx.now_ms);
            self.fail(ctx.now_ms, "Motor command rejected during wire learning");
            return Err(e.into());
        }
        self.progress.current_speed_ms = speed_ms;
        self.highest_tested_ms = self.highest_tested_ms.max(speed_ms);
        self.detector.on_speed_change(ctx.now_ms);
        Ok(())
    }

    fn next_speed(&self, max_hw_ms: f32) -> Option<f32> {
        let next = self.progress.current_speed_ms + self.config.speed_increment_ms;
        let ceiling = self.config.max_speed_ms.min(max_hw_ms);
        (self.config.speed_increment_ms > 0.0 && next <= ceiling + 1e-4).then_some(next.min(ceiling))
    }

    fn begin_direction<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        forward: bool,
    ) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        let rotations = ctx.hw.rotation_count();
        self.direction_start_rotations = rotations;
        self.detector.reset(now);
        self.progress.speed_validated = false;
        self.enter(
            if forward {
                WireLearningState::ForwardDirection
            } else {
                WireLearningState::ReverseDirection
            },
            now,
        );

        let speed = self.config.start_speed_ms.min(ctx.hw.max_speed_ms());
        self.command_speed(ctx, speed, forward)?;
        self.phase = Phase::Testing {
            since_ms: now,
            start_rotations: rotations,
        };
        format_message(
            &mut self.progress.status_message,
            format_args!(
                "Learning {} at {:.2} m/s",
                if forward { "forward" } else { "reverse" },
                speed
            ),
        );
        Ok(())
    }

    fn update_direction<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
    ) -> Result<(), ControlError> {
        let forward = self.state == WireLearningState::ForwardDirection;
        let now = ctx.now_ms;
        let rotation_count = ctx.hw.rotation_count();
        let rotations = rotation_count.saturating_sub(self.direction_start_rotations);
        let distance = ctx.hw.rotations_to_distance(rotations);
        if forward {
            self.progress.forward_rotations = rotations;
            self.progress.forward_distance_m = distance;
        } else {
            self.progress.reverse_rotations = rotations;
            self.progress.reverse_distance_m = distance;
        }

        let input = ctx.detector_input();
        if let Some(method) = self.detector.evaluate(&input) {
            return self.end_direction(ctx, forward, method, distance);
        }

        match self.phase {
            Phase::Testing {
                since_ms,
                start_rotations,
            } => {
                let pulses = rotation_count.saturating_sub(start_rotations);
                if pulses >= self.config.min_hall_pulses {
                    let speed = self.progress.current_speed_ms;
                    info!(target: "wire_learning", "Speed {:.2} m/s validated ({} pulses)", speed, pulses);
                    self.progress.speed_validated = true;
                    self.validated_speed_ms = Some(self.validated_speed_ms.map_or(speed, |v| v.max(speed)));
                    self.progress.highest_validated_speed_ms = self.validated_speed_ms.unwrap_or(0.0);
                    self.phase = match self.next_speed(ctx.hw.max_speed_ms()) {
                        Some(next) => Phase::StepPause {
                            until_ms: now + u64::from(self.config.speed_step_pause_ms),
                            next_speed_ms: next,
                        },
                        None => Phase::Holding,
                    };
                } else if now.saturating_sub(since_ms) > u64::from(self.config.speed_validation_timeout_ms) {
                    warn!(
                        target: "wire_learning",
                        "Speed {:.2} m/s not validated ({} pulses), continuing",
                        self.progress.current_speed_ms, pulses
                    );
                    self.progress.speed_validated = false;
                    self.phase = Phase::Holding;
                }
            }
            Phase::StepPause {
                until_ms,
                next_speed_ms,
            } => {
                if now >= until_ms {
                    self.command_speed(ctx, next_speed_ms, forward)?;
                    self.progress.speed_validated = false;
                    self.phase = Phase::Testing {
                        since_ms: now,
                        start_rotations: ctx.hw.rotation_count(),
                    };
                    format_message(
                        &mut self.progress.status_message,
                        format_args!(
                            "Learning {} at {:.2} m/s",
                            if forward { "forward" } else { "reverse" },
                            next_speed_ms
                        ),
                    );
                }
            }
            Phase::Holding => {}
        }
        Ok(())
    }

    fn end_direction<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        forward: bool,
        method: DetectionMethod,
        distance_m: f32,
    ) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        if !forward {
            self.progress.reverse_detection = method;
            info!(target: "wire_learning", "Reverse end at {:.2} m ({})", distance_m, method.as_str());
            ctx.hw.cut_power(now);
            self.enter(WireLearningState::CalculatingResults, now);
            set_message(&mut self.progress.status_message, "Calculating results");
            return Ok(());
        }

        self.progress.forward_detection = method;
        info!(target: "wire_learning", "Forward end at {:.2} m ({})", distance_m, method.as_str());
        if distance_m < self.config.min_length_m || distance_m > self.config.max_length_m {
            ctx.hw.emergency_stop(now);
            let mut message = LongString::new();
            format_message(
                &mut message,
                format_args!(
                    "Forward distance {:.2} m outside {:.1}..={:.1} m",
                    distance_m, self.config.min_length_m, self.config.max_length_m
                ),
            );
            self.fail(now, &message);
            return Err(ControlError::ValidationFailed("forward distance out of range"));
        }

        if self.highest_tested_ms >= self.config.coasting_trigger_speed_ms {
            self.coasting
                .begin(now, ctx.hw.position_m(), ctx.hw.current_speed_ms());
        }
        ctx.hw.cut_power(now);
        self.pause_until_ms = now + u64::from(self.config.direction_pause_ms);
        self.enter(WireLearningState::DirectionPause, now);
        set_message(&mut self.progress.status_message, "Forward end reached, pausing");
        Ok(())
    }

    fn update_pause<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        match self
            .coasting
            .update(now, ctx.hw.position_m(), ctx.hw.current_speed_ms())
        {
            CoastOutcome::Pending => {}
            CoastOutcome::Done(calibration) => self.coasting_result = Some(calibration),
            CoastOutcome::Failed(reason) => {
                warn!(target: "wire_learning", "Coasting measurement skipped: {}", reason);
            }
        }
        if now >= self.pause_until_ms && !self.coasting.is_active() {
            self.begin_direction(ctx, false)?;
        }
        Ok(())
    }

    fn calculate_results(&mut self, now_ms: u64) -> Result<(), ControlError> {
        let forward = self.progress.forward_distance_m;
        let reverse = self.progress.reverse_distance_m;
        let check = evaluate_lengths(forward, reverse);
        let tolerance = self.config.length_tolerance_percent;
        info!(
            target: "wire_learning",
            "Forward {:.2} m, reverse {:.2} m, difference {:.1}%",
            forward, reverse, check.difference_percent
        );

        if !check.within(tolerance) {
            let mut message = LongString::new();
            format_message(
                &mut message,
                format_args!(
                    "Wire learning failed: {:.1}% difference > {:.1}% tolerance",
                    check.difference_percent, tolerance
                ),
            );
            self.fail(now_ms, &message);
            return Err(ControlError::ValidationFailed("forward and reverse lengths disagree"));
        }
        if check.wire_length_m < self.config.min_length_m || check.wire_length_m > self.config.max_length_m {
            self.fail(now_ms, "Wire length out of range");
            return Err(ControlError::ValidationFailed("wire length out of range"));
        }

        let optimal = self
            .validated_speed_ms
            .unwrap_or(self.config.start_speed_ms);
        let result = WireLearningResult {
            complete: true,
            wire_length_m: check.wire_length_m,
            forward_distance_m: forward,
            reverse_distance_m: reverse,
            optimal_learning_speed_ms: optimal,
            optimal_cruise_speed_ms: (optimal * self.config.cruise_speed_factor).min(self.cruise_ceiling_ms),
            forward_rotations: self.progress.forward_rotations,
            reverse_rotations: self.progress.reverse_rotations,
            total_learning_time_ms: now_ms
                .saturating_sub(self.progress.start_ms)
                .min(u64::from(u32::MAX)) as u32,
            primary_detection_method: self.progress.forward_detection,
            accuracy_percent: check.accuracy_percent,
        };
        info!(
            target: "wire_learning",
            "Wire learned: {:.2} m ({:.1}% accurate), cruise {:.2} m/s",
            result.wire_length_m, result.accuracy_percent, result.optimal_cruise_speed_ms
        );

        self.result = Some(result);
        publish(&mut self.outbox, EngineEvent::WireLearned(result));
        if let Some(calibration) = self.coasting_result {
            publish(&mut self.outbox, EngineEvent::CoastingCalibrated(calibration));
        }
        format_message(
            &mut self.progress.status_message,
            format_args!("Wire learned: {:.2} m", result.wire_length_m),
        );
        self.enter(WireLearningState::Complete, now_ms);
        Ok(())
    }
}

impl ModeEngine for WireLearningEngine {
    fn name(&self) -> &'static str {
        "Wire Learning"
    }

    fn start<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if self.is_active() {
            return Err(ControlError::InvalidState("wire learning already running"));
        }
        if !ctx.sensors_validated() {
            set_message(&mut self.progress.error_message, "Sensors not validated");
            return Err(ControlError::InvalidState("sensors not validated"));
        }
        if !ctx.hw.is_initialized() {
            set_message(&mut self.progress.error_message, "Hardware not initialized");
            return Err(ControlError::InvalidState("hardware not initialized"));
        }
        if !ctx.hw.is_hall_healthy() {
            set_message(&mut self.progress.error_message, "Hall sensor unhealthy");
            return Err(ControlError::InvalidState("Hall sensor unhealthy"));
        }

        let now = ctx.now_ms;
        self.progress = WireLearningProgress {
            start_ms: now,
            ..WireLearningProgress::default()
        };
        self.phase = Phase::Holding;
        self.highest_tested_ms = 0.0;
        self.validated_speed_ms = None;
        self.coasting.cancel();
        self.coasting_result = None;
        ctx.hw.reset_position();

        if !ctx.hw.is_armed() {
            ctx.hw.arm_esc(now)?;
        }
        info!(target: "wire_learning", "Wire learning started");
        set_message(&mut self.progress.status_message, "Arming ESC for wire learning");
        self.enter(WireLearningState::Initializing, now);
        Ok(())
    }

    fn stop<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        immediate: bool,
    ) -> Result<(), ControlError> {
        if !self.is_active() && self.state != WireLearningState::Stopping {
            return Ok(());
        }
        ctx.hw.cut_power(ctx.now_ms);
        self.coasting.cancel();
        set_message(&mut self.progress.status_message, "Wire learning stopped");
        if immediate {
            self.enter(WireLearningState::Idle, ctx.now_ms);
        } else {
            self.enter(WireLearningState::Stopping, ctx.now_ms);
        }
        Ok(())
    }

    fn update<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        if self.is_active() {
            self.progress.elapsed_ms = now.saturating_sub(self.progress.start_ms);
            if self.progress.elapsed_ms > u64::from(self.config.timeout_ms) {
                ctx.hw.emergency_stop(now);
                self.fail(now, "Wire learning timeout");
                return Err(ControlError::SafetyViolation("wire learning timeout"));
            }
        }

        match self.state {
            WireLearningState::Idle | WireLearningState::Complete | WireLearningState::Failed => Ok(()),
            WireLearningState::Initializing => {
                if ctx.hw.is_armed() {
                    self.begin_direction(ctx, true)
                } else if ctx.hw.esc_state() == EscState::Disarmed {
                    self.fail(now, "ESC arming aborted");
                    Err(ControlError::InvalidState("ESC arming aborted"))
                } else {
                    Ok(())
                }
            }
            WireLearningState::ForwardDirection | WireLearningState::ReverseDirection => {
                self.update_direction(ctx)
            }
            WireLearningState::DirectionPause => self.update_pause(ctx),
            WireLearningState::CalculatingResults => self.calculate_results(now),
            WireLearningState::Stopping => {
                let stopped = ctx.hw.current_speed_ms() < self.config.coasting.stopped_speed_ms;
                let waited = now.saturating_sub(self.state_since_ms) >= u64::from(self.config.direction_pause_ms);
                if stopped || waited {
                    self.enter(WireLearningState::Idle, now);
                }
                Ok(())
            }
        }
    }

    fn is_stopping(&self) -> bool {
        self.state == WireLearningState::Stopping
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            WireLearningState::Initializing
                | WireLearningState::ForwardDirection
                | WireLearningState::DirectionPause
                | WireLearningState::ReverseDirection
                | WireLearningState::CalculatingResults
        )
    }

    fn emergency_stop<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        ctx.hw.emergency_stop(ctx.now_ms);
        if self.is_active() || self.state == WireLearningState::Stopping {
            self.fail(ctx.now_ms, "EMERGENCY STOP");
        }
    }

    fn take_events(&mut self) -> Outbox {
        core::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::hal::{MockEsc, MockPulseSource};
    use crate::hardware::HardwareControl;
    use crate::sensor_health::SensorHealth;

    fn ready_hw() -> HardwareControl<MockEsc> {
        let mut hw = HardwareControl::new(MockEsc::new(), &HardwareConfig::default());
        hw.init(0).unwrap();
        let mut src = MockPulseSource::new();
        src.push(0);
        hw.process_pulses(&mut src, None);
        hw
    }

    fn validated() -> SensorHealth {
        SensorHealth {
            sensors_validated: true,
            system_ready: true,
            ..SensorHealth::default()
        }
    }

    fn step(
        engine: &mut WireLearningEngine,
        hw: &mut HardwareControl<MockEsc>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) -> Result<(), ControlError> {
        hw.update(now_ms);
        let mut ctx = EngineContext {
            hw,
            sensors,
            motion_safe: true,
            now_ms,
        };
        engine.update(&mut ctx)
    }

    fn started(hw: &mut HardwareControl<MockEsc>, sensors: &SensorHealth) -> WireLearningEngine {
        let mut engine = WireLearningEngine::new(&WireLearningConfig::default(), 5.0);
        let mut ctx = EngineContext {
            hw,
            sensors,
            motion_safe: true,
            now_ms: 100,
        };
        engine.start(&mut ctx).unwrap();
        engine
    }

    // =========================================================================
    // Length comparison
    // =========================================================================

    #[test]
    fn lengths_within_tolerance() {
        let check = evaluate_lengths(10.0, 10.3);
        assert!((check.wire_length_m - 10.15).abs() < 1e-4);
        assert!((check.difference_percent - 2.9557).abs() < 1e-3);
        assert!(check.within(5.0));
    }

    #[test]
    fn lengths_outside_tolerance() {
        let check = evaluate_lengths(10.0, 12.0);
        assert!(check.difference_percent > 18.0);
        assert!(!check.within(5.0));
    }

    #[test]
    fn zero_lengths_never_agree() {
        assert!(!evaluate_lengths(0.0, 0.0).within(5.0));
    }

    #[test]
    fn validate_results_checks_accuracy_and_range() {
        let config = WireLearningConfig::default();
        let good = WireLearningResult {
            complete: true,
            wire_length_m: 10.0,
            accuracy_percent: 97.0,
            ..WireLearningResult::default()
        };
        assert!(validate_results(&good, &config));
        assert!(!validate_results(&WireLearningResult { accuracy_percent: 85.0, ..good }, &config));
        assert!(!validate_results(&WireLearningResult { wire_length_m: 1.0, ..good }, &config));
        assert!(!validate_results(&WireLearningResult { complete: false, ..good }, &config));
    }

    // =========================================================================
    // Start
    // =========================================================================

    #[test]
    fn start_requires_validated_sensors() {
        let mut hw = ready_hw();
        let sensors = SensorHealth::default();
        let mut engine = WireLearningEngine::new(&WireLearningConfig::default(), 5.0);
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: false,
            now_ms: 0,
        };
        assert_eq!(
            engine.start(&mut ctx),
            Err(ControlError::InvalidState("sensors not validated"))
        );
        assert_eq!(engine.state(), WireLearningState::Idle);
        assert!(!engine.is_active());
    }

    #[test]
    fn start_arms_then_drives_forward() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        assert_eq!(engine.state(), WireLearningState::Initializing);
        assert!(engine.is_active());

        step(&mut engine, &mut hw, &sensors, 1100).unwrap();
        assert_eq!(engine.state(), WireLearningState::Initializing);
        step(&mut engine, &mut hw, &sensors, 4100).unwrap();
        assert_eq!(engine.state(), WireLearningState::ForwardDirection);
        assert!((hw.target_speed_ms() - 0.1).abs() < 1e-6);
        assert!(hw.direction().is_forward());
        assert_eq!(engine.progress_percent(), 25);
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn early_impact_fails_on_short_distance() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        step(&mut engine, &mut hw, &sensors, 1100).unwrap();
        step(&mut engine, &mut hw, &sensors, 4100).unwrap();

        let bump = SensorHealth {
            dynamic_accel_g: 1.5,
            ..validated()
        };
        let result = step(&mut engine, &mut hw, &bump, 4120);
        assert_eq!(
            result,
            Err(ControlError::ValidationFailed("forward distance out of range"))
        );
        assert_eq!(engine.state(), WireLearningState::Failed);
        assert_eq!(hw.target_speed_ms(), 0.0);
        assert_eq!(hw.status().current_duty, 1229);
        assert!(engine.take_events().is_empty());
    }

    #[test]
    fn overall_timeout_stops_motor() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        step(&mut engine, &mut hw, &sensors, 1100).unwrap();
        step(&mut engine, &mut hw, &sensors, 4100).unwrap();

        let result = step(&mut engine, &mut hw, &sensors, 600_101);
        assert!(matches!(result, Err(ControlError::SafetyViolation(_))));
        assert_eq!(engine.state(), WireLearningState::Failed);
        assert_eq!(engine.progress().error_message.as_str(), "Wire learning timeout");
        assert_eq!(hw.target_speed_ms(), 0.0);
    }

    // =========================================================================
    // Stop
    // =========================================================================

    #[test]
    fn immediate_stop_returns_to_idle() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: true,
            now_ms: 200,
        };
        engine.stop(&mut ctx, true).unwrap();
        assert_eq!(engine.state(), WireLearningState::Idle);
    }

    #[test]
    fn graceful_stop_settles_to_idle() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        step(&mut engine, &mut hw, &sensors, 1100).unwrap();
        step(&mut engine, &mut hw, &sensors, 4100).unwrap();
        {
            let mut ctx = EngineContext {
                hw: &mut hw,
                sensors: &sensors,
                motion_safe: true,
                now_ms: 4200,
            };
            engine.stop(&mut ctx, false).unwrap();
        }
        assert_eq!(engine.state(), WireLearningState::Stopping);
        assert!(!engine.is_active());
        step(&mut engine, &mut hw, &sensors, 4220).unwrap();
        assert_eq!(engine.state(), WireLearningState::Idle);
    }

    #[test]
    fn emergency_stop_fails_active_run() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = started(&mut hw, &sensors);
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: true,
            now_ms: 300,
        };
        engine.emergency_stop(&mut ctx);
        assert_eq!(engine.state(), WireLearningState::Failed);
        assert!(!engine.is_active());
    }
}
