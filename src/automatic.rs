//! Automatic cycling along a learned wire.
//!
//! Each run accelerates to cruise speed, cuts power at the calibrated coast
//! distance before the wire end, confirms the end with the shared detectors,
//! creeps in at approach speed and ramps down. A forward run followed by a
//! reverse run is one cycle.
//!
//! The first run without a [`CoastingCalibration`] drives up to the
//! calibration speed instead, cuts power and measures the roll-out. The
//! measurement is published and every later run uses it.
//!
//! Safety is polled every tick while the trolley is under way: the
//! coordinator's motion-safe verdict, an impact limit outside the wire end
//! approach and a per-run timeout. Any violation is an emergency stop.

use log::{error, info, warn};

use crate::coasting::{CoastOutcome, CoastingCalibration, CoastingMeasurement};
use crate::config::{format_message, set_message, AutomaticConfig, LongString};
use crate::error::ControlError;
use crate::esc::EscState;
use crate::ramp::SpeedRamp;
use crate::traits::{publish, Direction, EngineContext, EngineEvent, EscOutput, ModeEngine, Outbox};
use crate::wire_end::{DetectionMethod, WireEndDetector};
use crate::wire_learning::WireLearningResult;

/// Message left by every automatic mode emergency stop.
pub const EMERGENCY_MESSAGE: &str = "EMERGENCY STOP - Automatic mode halted";

/// Automatic mode state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum AutomaticState {
    /// Not running.
    #[default]
    Idle,
    /// About to arm the ESC.
    Initializing,
    /// Waiting for the ESC to arm.
    ArmingEsc,
    /// Ramping up to cruise speed.
    Accelerating,
    /// Holding cruise speed.
    Cruising,
    /// First run: measuring the roll-out.
    CoastingCalibration,
    /// Power cut, rolling toward the wire end.
    Coasting,
    /// Creeping in and ramping down at the wire end.
    WireEndApproach,
    /// Pausing before the reverse run.
    DirectionChange,
    /// Pausing after a full cycle.
    CycleComplete,
    /// Finishing the current run before stopping.
    StoppingGraceful,
    /// Interrupted, disarming.
    StoppingInterrupted,
    /// Halted by a fault.
    Error,
    /// Cycle limit reached.
    Complete,
}

impl AutomaticState {
    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AutomaticState::Idle => "idle",
            AutomaticState::Initializing => "initializing",
            AutomaticState::ArmingEsc => "arming_esc",
            AutomaticState::Accelerating => "accelerating",
            AutomaticState::Cruising => "cruising",
            AutomaticState::CoastingCalibration => "coasting_calibration",
            AutomaticState::Coasting => "coasting",
            AutomaticState::WireEndApproach => "wire_end_approach",
            AutomaticState::DirectionChange => "direction_change",
            AutomaticState::CycleComplete => "cycle_complete",
            AutomaticState::StoppingGraceful => "stopping_graceful",
            AutomaticState::StoppingInterrupted => "stopping_interrupted",
            AutomaticState::Error => "error",
            AutomaticState::Complete => "complete",
        }
    }

    /// The trolley may be moving under the engine's control.
    pub const fn is_under_way(&self) -> bool {
        matches!(
            self,
            AutomaticState::Accelerating
                | AutomaticState::Cruising
                | AutomaticState::CoastingCalibration
                | AutomaticState::Coasting
                | AutomaticState::WireEndApproach
        )
    }
}

/// Cycle statistics and messages.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct AutomaticStatus {
    /// Current state
    pub state: AutomaticState,
    /// Direction of the current or last run
    pub direction: Direction,
    /// Cruise speed in use, m/s
    pub cruise_speed_ms: f32,
    /// Full cycles completed
    pub cycles_completed: u32,
    /// Forward runs completed
    pub forward_runs: u32,
    /// Reverse runs completed
    pub reverse_runs: u32,
    /// Distance covered by completed runs, m
    pub total_distance_m: f32,
    /// Highest measured speed, m/s
    pub max_speed_ms: f32,
    /// Mean cycle duration, ms
    pub average_cycle_time_ms: u32,
    /// How the last wire end was found
    pub last_detection: DetectionMethod,
    /// Stop requested at the next wire end
    pub finishing_current_run: bool,
    /// Human-readable status
    pub status_message: LongString,
    /// Last failure
    pub error_message: LongString,
}

/// Automatic cycling engine.
pub struct AutomaticEngine {
    config: AutomaticConfig,
    state: AutomaticState,
    state_since_ms: u64,
    status: AutomaticStatus,
    wire: Option<WireLearningResult>,
    calibration: Option<CoastingCalibration>,
    detector: WireEndDetector,
    coasting: CoastingMeasurement,
    ramp: Option<SpeedRamp>,
    approach_until_ms: u64,
    pause_until_ms: u64,
    run_started_ms: u64,
    run_start_position_m: f32,
    cycle_started_ms: u64,
    total_cycle_time_ms: u64,
    outbox: Outbox,
}

impl AutomaticEngine {
    /// Create an idle engine.
    pub fn new(config: &AutomaticConfig) -> Self {
        let mut status = AutomaticStatus::default();
        set_message(&mut status.status_message, "Automatic mode idle");
        Self {
            config: config.clone(),
            state: AutomaticState::Idle,
            state_since_ms: 0,
            status,
            wire: None,
            calibration: None,
            detector: WireEndDetector::new(&config.detection),
            coasting: CoastingMeasurement::new(&config.coasting),
            ramp: None,
            approach_until_ms: 0,
            pause_until_ms: 0,
            run_started_ms: 0,
            run_start_position_m: 0.0,
            cycle_started_ms: 0,
            total_cycle_time_ms: 0,
            outbox: Outbox::new(),
        }
    }

    /// Provide the learned wire geometry.
    pub fn set_wire_result(&mut self, wire: Option<WireLearningResult>) {
        self.wire = wire;
    }

    /// Provide a stored coasting calibration.
    pub fn set_calibration(&mut self, calibration: Option<CoastingCalibration>) {
        self.calibration = calibration.filter(|c| c.calibrated);
    }

    /// Calibration in use.
    pub fn calibration(&self) -> Option<&CoastingCalibration> {
        self.calibration.as_ref()
    }

    /// Current state.
    pub fn state(&self) -> AutomaticState {
        self.state
    }

    /// Snapshot of the statistics.
    pub fn status(&self) -> AutomaticStatus {
        self.status.clone()
    }

    /// Full cycles completed.
    pub fn cycles_completed(&self) -> u32 {
        self.status.cycles_completed
    }

    /// Whether a wire result allows automatic mode.
    pub fn prerequisites_met(&self) -> bool {
        self.wire
            .as_ref()
            .is_some_and(|w| w.complete && w.wire_length_m >= self.config.min_wire_length_m)
    }

    /// Stop at the next wire end.
    pub fn request_graceful_stop(&mut self) {
        if self.is_active() {
            info!(target: "automatic", "Graceful stop requested, finishing current run");
            self.status.finishing_current_run = true;
        }
    }

    /// Emergency stop, disarm and return to idle.
    pub fn interrupt<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        let now = ctx.now_ms;
        ctx.hw.emergency_stop(now);
        if let Err(e) = ctx.hw.disarm_esc(now) {
            warn!(target: "automatic", "Disarm on interrupt failed: {}", e);
        }
        self.coasting.cancel();
        self.ramp = None;
        set_message(&mut self.status.status_message, "Automatic mode interrupted");
        self.enter(AutomaticState::StoppingInterrupted, now);
    }

    fn enter(&mut self, state: AutomaticState, now_ms: u64) {
        if self.state != state {
            info!(target: "automatic", "{} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.state_since_ms = now_ms;
        self.status.state = state;
    }

    fn emergency<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        reason: &'static str,
    ) -> Result<(), ControlError> {
        error!(target: "automatic", "Emergency stop: {}", reason);
        ctx.hw.emergency_stop(ctx.now_ms);
        self.coasting.cancel();
        self.ramp = None;
        set_message(&mut self.status.status_message, EMERGENCY_MESSAGE);
        set_message(&mut self.status.error_message, reason);
        self.enter(AutomaticState::Error, ctx.now_ms);
        Err(ControlError::SafetyViolation(reason))
    }

    fn drive<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        speed_ms: f32,
    ) -> Result<(), ControlError> {
        let forward = self.status.direction.is_forward();
        if let Err(e) = ctx.hw.set_motor_speed(speed_ms, forward) {
            error!(target: "automatic", "Speed command failed: {}", e);
            self.emergency(ctx, "motor command rejected")?;
        }
        self.detector.on_speed_change(ctx.now_ms);
        Ok(())
    }

    fn cruise_speed(&self, max_hw_ms: f32) -> f32 {
        let learned = self
            .wire
            .as_ref()
            .map_or(self.config.start_speed_ms, |w| w.optimal_cruise_speed_ms);
        learned.min(self.config.max_speed_ms).min(max_hw_ms)
    }

    fn distance_to_end(&self, position_m: f32) -> f32 {
        let length = self.wire.as_ref().map_or(0.0, |w| w.wire_length_m);
        if self.status.direction.is_forward() {
            length - position_m
        } else {
            position_m
        }
    }

    fn cutoff_distance(&self) -> f32 {
        match self.calibration {
            Some(c) if c.calibrated => c.coast_start_distance_m,
            _ => self.config.coasting.safety_margin_m,
        }
    }

    fn begin_run<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        direction: Direction,
    ) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        self.status.direction = direction;
        self.detector.reset(now);
        self.run_started_ms = now;
        self.run_start_position_m = ctx.hw.position_m();

        let max_hw = ctx.hw.max_speed_ms();
        let start = self.config.start_speed_ms.min(max_hw);
        let (state, goal) = if self.calibration.is_some() {
            (AutomaticState::Accelerating, self.cruise_speed(max_hw))
        } else {
            info!(target: "automatic", "No coasting calibration, calibrating on this run");
            (
                AutomaticState::CoastingCalibration,
                self.config.coasting.calibration_speed_ms.min(max_hw),
            )
        };
        self.status.cruise_speed_ms = self.cruise_speed(max_hw);
        self.ramp = Some(SpeedRamp::accelerate(
            start,
            goal,
            self.config.accel_rate_ms2,
            self.config.ramp_step_ms,
            now,
        ));
        format_message(
            &mut self.status.status_message,
            format_args!("Cycle {}: {} run", self.status.cycles_completed + 1, direction.as_str()),
        );
        self.enter(state, now);
        self.drive(ctx, start)
    }

    /// Apply the next ramp step, if one is due.
    fn step_ramp<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if let Some(value) = self.ramp.as_mut().and_then(|r| r.poll(ctx.now_ms)) {
            self.drive(ctx, value)?;
        }
        Ok(())
    }

    fn ramp_complete(&self) -> bool {
        self.ramp.as_ref().map_or(true, SpeedRamp::is_complete)
    }

    fn start_coasting<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>, distance_to_end_m: f32) {
        info!(
            target: "automatic",
            "Cutting power {:.2} m before wire end", distance_to_end_m
        );
        ctx.hw.cut_power(ctx.now_ms);
        self.ramp = None;
        self.enter(AutomaticState::Coasting, ctx.now_ms);
    }

    fn update_powered<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let distance_to_end = self.distance_to_end(ctx.hw.position_m());
        if distance_to_end <= self.cutoff_distance() {
            self.start_coasting(ctx, distance_to_end);
            return Ok(());
        }

        let input = ctx.detector_input();
        if let Some(method) = self.detector.evaluate(&input) {
            warn!(target: "automatic", "Wire end found under power ({})", method.as_str());
            ctx.hw.cut_power(ctx.now_ms);
            return self.wire_end_reached(ctx, method);
        }

        self.step_ramp(ctx)?;
        if self.state == AutomaticState::Accelerating && self.ramp_complete() {
            self.enter(AutomaticState::Cruising, ctx.now_ms);
        }
        Ok(())
    }

    fn update_calibration<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
    ) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        if !self.coasting.is_active() {
            let distance_to_end = self.distance_to_end(ctx.hw.position_m());
            if distance_to_end <= self.config.coasting.safety_margin_m {
                warn!(target: "automatic", "Calibration speed not reached before wire end");
                self.start_coasting(ctx, distance_to_end);
                return Ok(());
            }
            self.step_ramp(ctx)?;
            let goal = self.ramp.as_ref().map_or(0.0, SpeedRamp::goal);
            let measured = ctx.hw.current_speed_ms();
            if self.ramp_complete() && measured >= goal - self.config.coasting.reached_tolerance_ms {
                ctx.hw.cut_power(now);
                self.ramp = None;
                self.coasting.begin(now, ctx.hw.position_m(), measured);
                set_message(&mut self.status.status_message, "Measuring coast distance");
            }
            return Ok(());
        }

        match self
            .coasting
            .update(now, ctx.hw.position_m(), ctx.hw.current_speed_ms())
        {
            CoastOutcome::Pending => Ok(()),
            CoastOutcome::Done(calibration) => {
                self.calibration = Some(calibration);
                publish(&mut self.outbox, EngineEvent::CoastingCalibrated(calibration));
                let max_hw = ctx.hw.max_speed_ms();
                let cruise = self.cruise_speed(max_hw);
                let start = self.config.start_speed_ms.min(max_hw);
                self.ramp = Some(SpeedRamp::accelerate(
                    start,
                    cruise,
                    self.config.accel_rate_ms2,
                    self.config.ramp_step_ms,
                    now,
                ));
                self.enter(AutomaticState::Accelerating, now);
                self.drive(ctx, start)
            }
            CoastOutcome::Failed(reason) => {
                ctx.hw.emergency_stop(now);
                set_message(&mut self.status.error_message, "Coasting calibration failed");
                set_message(&mut self.status.status_message, "Coasting calibration failed");
                self.enter(AutomaticState::Error, now);
                Err(ControlError::ValidationFailed(reason))
            }
        }
    }

    fn update_coasting<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let input = ctx.detector_input();
        let found = self.detector.evaluate(&input);
        let stopped = ctx.hw.current_speed_ms() < self.config.coasting.stopped_speed_ms;
        if found.is_none() && !stopped {
            return Ok(());
        }

        let method = found.unwrap_or(DetectionMethod::Stopped);
        self.status.last_detection = method;
        let now = ctx.now_ms;
        self.detector.reset(now);
        self.ramp = None;
        self.approach_until_ms = now + u64::from(self.config.approach_time_ms);
        self.enter(AutomaticState::WireEndApproach, now);
        set_message(&mut self.status.status_message, "Approaching wire end");
        let approach = self.config.approach_speed_ms.min(ctx.hw.max_speed_ms());
        self.drive(ctx, approach)
    }

    fn update_approach<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        let input = ctx.detector_input();
        let found = self.detector.evaluate(&input);
        let stalled = !ctx.hw.is_hall_healthy();
        if found == Some(DetectionMethod::Impact) || stalled {
            ctx.hw.cut_power(now);
            let method = if stalled {
                DetectionMethod::HallTimeout
            } else {
                DetectionMethod::Impact
            };
            return self.wire_end_reached(ctx, method);
        }

        if self.ramp.is_none() {
            if now < self.approach_until_ms {
                return Ok(());
            }
            let from = ctx.hw.target_speed_ms();
            self.ramp = Some(SpeedRamp::decelerate(
                from,
                0.0,
                self.config.decel_rate_ms2,
                self.config.ramp_step_ms,
                now,
            ));
        }
        self.step_ramp(ctx)?;
        if self.ramp_complete() {
            ctx.hw.cut_power(now);
            let method = self.status.last_detection;
            return self.wire_end_reached(ctx, method);
        }
        Ok(())
    }

    fn wire_end_reached<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        method: DetectionMethod,
    ) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        self.ramp = None;
        self.status.last_detection = method;
        let run_distance = (ctx.hw.position_m() - self.run_start_position_m).abs();
        self.status.total_distance_m += run_distance;
        let direction = self.status.direction;
        if direction.is_forward() {
            self.status.forward_runs += 1;
        } else {
            self.status.reverse_runs += 1;
        }
        info!(
            target: "automatic",
            "{} run complete: {:.2} m in {} ms ({})",
            direction.as_str(),
            run_distance,
            now.saturating_sub(self.run_started_ms),
            method.as_str()
        );

        if self.status.finishing_current_run {
            set_message(&mut self.status.status_message, "Stopping after current run");
            self.enter(AutomaticState::StoppingGraceful, now);
            return Ok(());
        }

        if direction.is_forward() {
            self.pause_until_ms = now + u64::from(self.config.direction_pause_ms);
            set_message(&mut self.status.status_message, "Changing direction");
            self.enter(AutomaticState::DirectionChange, now);
        } else {
            self.complete_cycle(ctx);
        }
        Ok(())
    }

    fn complete_cycle<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        let now = ctx.now_ms;
        self.status.cycles_completed += 1;
        self.total_cycle_time_ms += now.saturating_sub(self.cycle_started_ms);
        self.status.average_cycle_time_ms = (self.total_cycle_time_ms
            / u64::from(self.status.cycles_completed))
        .min(u64::from(u32::MAX)) as u32;
        let cycles = self.status.cycles_completed;
        publish(&mut self.outbox, EngineEvent::CycleCompleted { cycles });
        // Back at the start end
        ctx.hw.reset_position();

        if cycles >= self.config.max_cycles {
            info!(target: "automatic", "Cycle limit {} reached", self.config.max_cycles);
            format_message(
                &mut self.status.status_message,
                format_args!("Automatic mode complete: {} cycles", cycles),
            );
            self.enter(AutomaticState::Complete, now);
            return;
        }
        format_message(
            &mut self.status.status_message,
            format_args!("Cycle {} complete", cycles),
        );
        self.pause_until_ms = now + u64::from(self.config.cycle_pause_ms);
        self.enter(AutomaticState::CycleComplete, now);
    }

    fn safety_violation<E: EscOutput>(&self, ctx: &EngineContext<'_, E>) -> Option<&'static str> {
        // A stall against the end stop is how an approach normally ends
        let approach_stall = self.state == AutomaticState::WireEndApproach && !ctx.hw.is_hall_healthy();
        if !ctx.motion_safe && !approach_stall {
            return Some("motion not safe");
        }
        let impact_allowed = matches!(
            self.state,
            AutomaticState::Coasting | AutomaticState::WireEndApproach
        );
        if !impact_allowed && ctx.dynamic_accel_g() > self.config.max_impact_g {
            return Some("impact limit exceeded");
        }
        if ctx.now_ms.saturating_sub(self.run_started_ms) > u64::from(self.config.direction_timeout_ms) {
            return Some("direction timeout");
        }
        None
    }
}

impl ModeEngine for AutomaticEngine {
    fn name(&self) -> &'static str {
        "Automatic"
    }

    fn start<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if self.is_active() {
            return Err(ControlError::InvalidState("automatic mode already running"));
        }
        if !ctx.sensors_validated() {
            set_message(&mut self.status.error_message, "Sensors not validated");
            return Err(ControlError::InvalidState("sensors not validated"));
        }
        if !self.prerequisites_met() {
            set_message(
                &mut self.status.error_message,
                "Wire learning required before automatic mode",
            );
            return Err(ControlError::InvalidState(
                "wire learning required before automatic mode",
            ));
        }
        if !ctx.hw.is_initialized() {
            return Err(ControlError::InvalidState("hardware not initialized"));
        }

        let now = ctx.now_ms;
        let previous_cycles = self.status.cycles_completed;
        self.status = AutomaticStatus::default();
        if previous_cycles > 0 {
            info!(target: "automatic", "Restarting, previous session ran {} cycles", previous_cycles);
        }
        self.total_cycle_time_ms = 0;
        self.cycle_started_ms = now;
        self.run_started_ms = now;
        self.ramp = None;
        self.coasting.cancel();
        ctx.hw.reset_position();
        set_message(&mut self.status.status_message, "Automatic mode starting");
        self.enter(AutomaticState::Initializing, now);
        Ok(())
    }

    fn stop<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        immediate: bool,
    ) -> Result<(), ControlError> {
        if !self.is_active() {
            return Ok(());
        }
        if immediate {
            self.interrupt(ctx);
            return Ok(());
        }
        if self.state.is_under_way() {
            self.request_graceful_stop();
        } else {
            ctx.hw.cut_power(ctx.now_ms);
            self.status.finishing_current_run = true;
            self.enter(AutomaticState::StoppingGraceful, ctx.now_ms);
        }
        Ok(())
    }

    fn update<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        let now = ctx.now_ms;
        if self.state.is_under_way() {
            if let Some(reason) = self.safety_violation(ctx) {
                return self.emergency(ctx, reason);
            }
            let speed = ctx.hw.current_speed_ms();
            if speed > self.status.max_speed_ms {
                self.status.max_speed_ms = speed;
            }
        }

        match self.state {
            AutomaticState::Idle | AutomaticState::Error | AutomaticState::Complete => Ok(()),
            AutomaticState::Initializing => {
                if !ctx.hw.is_armed() {
                    ctx.hw.arm_esc(now)?;
                }
                set_message(&mut self.status.status_message, "Arming ESC");
                self.enter(AutomaticState::ArmingEsc, now);
                Ok(())
            }
            AutomaticState::ArmingEsc => {
                if ctx.hw.is_armed() {
                    self.cycle_started_ms = now;
                    self.begin_run(ctx, Direction::Forward)
                } else if ctx.hw.esc_state() == EscState::Disarmed {
                    set_message(&mut self.status.error_message, "ESC arming aborted");
                    self.enter(AutomaticState::Error, now);
                    Err(ControlError::InvalidState("ESC arming aborted"))
                } else {
                    Ok(())
                }
            }
            AutomaticState::Accelerating | AutomaticState::Cruising => self.update_powered(ctx),
            AutomaticState::CoastingCalibration => self.update_calibration(ctx),
            AutomaticState::Coasting => self.update_coasting(ctx),
            AutomaticState::WireEndApproach => self.update_approach(ctx),
            AutomaticState::DirectionChange => {
                if now >= self.pause_until_ms {
                    self.begin_run(ctx, Direction::Reverse)
                } else {
                    Ok(())
                }
            }
            AutomaticState::CycleComplete => {
                if now >= self.pause_until_ms {
                    self.cycle_started_ms = now;
                    self.begin_run(ctx, Direction::Forward)
                } else {
                    Ok(())
                }
            }
            AutomaticState::StoppingGraceful => {
                let stopped = ctx.hw.current_speed_ms() < self.config.coasting.stopped_speed_ms;
                let waited = now.saturating_sub(self.state_since_ms) >= u64::from(self.config.direction_pause_ms);
                if stopped || waited {
                    ctx.hw.cut_power(now);
                    self.status.finishing_current_run = false;
                    set_message(&mut self.status.status_message, "Automatic mode stopped");
                    self.enter(AutomaticState::Idle, now);
                }
                Ok(())
            }
            AutomaticState::StoppingInterrupted => {
                if ctx.hw.esc_state() != EscState::Disarming {
                    self.enter(AutomaticState::Idle, now);
                }
                Ok(())
            }
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            AutomaticState::Initializing
                | AutomaticState::ArmingEsc
                | AutomaticState::Accelerating
                | AutomaticState::Cruising
                | AutomaticState::CoastingCalibration
                | AutomaticState::Coasting
                | AutomaticState::WireEndApproach
                | AutomaticState::DirectionChange
                | AutomaticState::CycleComplete
        )
    }

    fn is_stopping(&self) -> bool {
        matches!(
            self.state,
            AutomaticState::StoppingGraceful | AutomaticState::StoppingInterrupted
        )
    }

    fn emergency_stop<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        ctx.hw.emergency_stop(ctx.now_ms);
        self.coasting.cancel();
        self.ramp = None;
        if self.is_active() || self.is_stopping() {
            set_message(&mut self.status.status_message, EMERGENCY_MESSAGE);
            self.enter(AutomaticState::Error, ctx.now_ms);
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

    fn learned(length_m: f32) -> WireLearningResult {
        WireLearningResult {
            complete: true,
            wire_length_m: length_m,
            forward_distance_m: length_m,
            reverse_distance_m: length_m,
            optimal_learning_speed_ms: 1.0,
            optimal_cruise_speed_ms: 1.5,
            accuracy_percent: 100.0,
            ..WireLearningResult::default()
        }
    }

    fn calibrated() -> CoastingCalibration {
        CoastingCalibration {
            calibrated: true,
            calibration_speed_ms: 2.0,
            coast_distance_m: 3.0,
            coast_time_ms: 4000,
            decel_rate_ms2: 0.5,
            coast_start_distance_m: 5.0,
        }
    }

    fn step(
        engine: &mut AutomaticEngine,
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

    fn running(hw: &mut HardwareControl<MockEsc>, sensors: &SensorHealth) -> AutomaticEngine {
        let mut engine = AutomaticEngine::new(&AutomaticConfig::default());
        engine.set_wire_result(Some(learned(20.0)));
        engine.set_calibration(Some(calibrated()));
        {
            let mut ctx = EngineContext {
                hw: &mut *hw,
                sensors,
                motion_safe: true,
                now_ms: 0,
            };
            engine.start(&mut ctx).unwrap();
        }
        step(&mut engine, hw, sensors, 20).unwrap();
        assert_eq!(engine.state(), AutomaticState::ArmingEsc);
        step(&mut engine, hw, sensors, 1020).unwrap();
        step(&mut engine, hw, sensors, 4020).unwrap();
        step(&mut engine, hw, sensors, 4040).unwrap();
        engine
    }

    // =========================================================================
    // Prerequisites
    // =========================================================================

    #[test]
    fn start_requires_wire_learning() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = AutomaticEngine::new(&AutomaticConfig::default());
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: true,
            now_ms: 0,
        };
        assert_eq!(
            engine.start(&mut ctx),
            Err(ControlError::InvalidState(
                "wire learning required before automatic mode"
            ))
        );
        assert_eq!(
            engine.status().error_message.as_str(),
            "Wire learning required before automatic mode"
        );
    }

    #[test]
    fn start_rejects_short_wire() {
        let mut engine = AutomaticEngine::new(&AutomaticConfig::default());
        engine.set_wire_result(Some(learned(1.5)));
        assert!(!engine.prerequisites_met());
        engine.set_wire_result(Some(learned(2.0)));
        assert!(engine.prerequisites_met());
    }

    #[test]
    fn uncalibrated_input_is_ignored() {
        let mut engine = AutomaticEngine::new(&AutomaticConfig::default());
        engine.set_calibration(Some(CoastingCalibration::default()));
        assert!(engine.calibration().is_none());
    }

    // =========================================================================
    // Runs
    // =========================================================================

    #[test]
    fn calibrated_run_accelerates_forward() {
        let mut hw = ready_hw();
        let sensors = validated();
        let engine = running(&mut hw, &sensors);
        assert_eq!(engine.state(), AutomaticState::Accelerating);
        assert!(hw.direction().is_forward());
        assert!(hw.target_speed_ms() > 0.1);
        assert!((engine.status().cruise_speed_ms - 1.5).abs() < 1e-6);
    }

    #[test]
    fn uncalibrated_run_targets_clamped_calibration_speed() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = AutomaticEngine::new(&AutomaticConfig::default());
        engine.set_wire_result(Some(learned(30.0)));
        {
            let mut ctx = EngineContext {
                hw: &mut hw,
                sensors: &sensors,
                motion_safe: true,
                now_ms: 0,
            };
            engine.start(&mut ctx).unwrap();
        }
        step(&mut engine, &mut hw, &sensors, 20).unwrap();
        step(&mut engine, &mut hw, &sensors, 1020).unwrap();
        step(&mut engine, &mut hw, &sensors, 4020).unwrap();
        assert_eq!(engine.state(), AutomaticState::CoastingCalibration);

        // Ramp runs to the 2.0 m/s hardware limit, not 5.0
        let mut now = 4020;
        for _ in 0..100 {
            now += 100;
            let _ = step(&mut engine, &mut hw, &sensors, now);
        }
        assert!((hw.target_speed_ms() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn cutoff_inside_coast_distance() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = running(&mut hw, &sensors);

        // 80 pulses forward leaves ~4.7 m to the 20 m wire end
        let mut src = MockPulseSource::new();
        let mut t = 4040;
        for _ in 0..80 {
            t += 200;
            src.push(t);
        }
        hw.process_pulses(&mut src, None);
        assert!(hw.position_m() > 15.0);
        step(&mut engine, &mut hw, &sensors, t).unwrap();
        assert_eq!(engine.state(), AutomaticState::Coasting);
        assert_eq!(hw.target_speed_ms(), 0.0);
    }

    // =========================================================================
    // Safety
    // =========================================================================

    #[test]
    fn impact_while_cruising_is_emergency() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = running(&mut hw, &sensors);
        let bump = SensorHealth {
            dynamic_accel_g: 0.6,
            ..validated()
        };
        let result = step(&mut engine, &mut hw, &bump, 4060);
        assert_eq!(
            result,
            Err(ControlError::SafetyViolation("impact limit exceeded"))
        );
        assert_eq!(engine.state(), AutomaticState::Error);
        assert_eq!(engine.status().status_message.as_str(), EMERGENCY_MESSAGE);
        assert_eq!(hw.target_speed_ms(), 0.0);
        assert_eq!(hw.status().current_duty, 1229);
    }

    #[test]
    fn unsafe_motion_is_emergency() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = running(&mut hw, &sensors);
        hw.update(4060);
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: false,
            now_ms: 4060,
        };
        assert!(engine.update(&mut ctx).is_err());
        assert_eq!(engine.state(), AutomaticState::Error);
        assert!(!engine.is_active());
    }

    // =========================================================================
    // Stops
    // =========================================================================

    #[test]
    fn graceful_stop_sets_finish_flag() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = running(&mut hw, &sensors);
        let mut ctx = EngineContext {
            hw: &mut hw,
            sensors: &sensors,
            motion_safe: true,
            now_ms: 4060,
        };
        engine.stop(&mut ctx, false).unwrap();
        assert!(engine.is_active());
        assert!(engine.status().finishing_current_run);
    }

    #[test]
    fn interrupt_disarms_and_idles() {
        let mut hw = ready_hw();
        let sensors = validated();
        let mut engine = running(&mut hw, &sensors);
        {
            let mut ctx = EngineContext {
                hw: &mut hw,
                sensors: &sensors,
                motion_safe: true,
                now_ms: 4060,
            };
            engine.stop(&mut ctx, true).unwrap();
        }
        assert_eq!(engine.state(), AutomaticState::StoppingInterrupted);
        assert!(engine.is_stopping());
        assert_eq!(hw.target_speed_ms(), 0.0);

        step(&mut engine, &mut hw, &sensors, 4600).unwrap();
        assert_eq!(engine.state(), AutomaticState::Idle);
        assert!(!hw.is_armed());
    }
}
