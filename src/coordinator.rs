//! Mode arbitration.
//!
//! The coordinator owns the three mode engines and decides which one may
//! run. Exactly one mode is current at a time; activating a mode stops the
//! current one first. Availability is recomputed every tick from the sensor
//! gate, the learned wire and the error counter:
//!
//! | Check (in order)            | Availability                  |
//! |-----------------------------|-------------------------------|
//! | sensors not validated       | `BlockedSensors`              |
//! | automatic without wire data | `BlockedWireLearningRequired` |
//! | engine running              | `Active`                      |
//! | engine winding down         | `Stopping`                    |
//! | system unhealthy            | `BlockedSystemError`          |
//! | otherwise                   | `Available`                   |
//!
//! Completed wire learning and coasting results are copied here from the
//! engine outboxes and persisted to the [`ParamStore`] on every set.

use core::fmt::Write;

use log::{error, info, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::coasting::CoastingCalibration;
use crate::config::{
    format_message, long_string, set_message, Config, CoordinatorConfig, LongString, ReportString,
};
use crate::automatic::AutomaticEngine;
use crate::error::ControlError;
use crate::hardware::HardwareControl;
use crate::manual::{ManualCommand, ManualEngine};
use crate::sensor_health::{InitState, SensorHealth, SensorHealthGate};
use crate::traits::{EngineContext, EngineEvent, EscOutput, ModeEngine, ParamStore};
use crate::wire_learning::{WireLearningEngine, WireLearningResult};

/// Store key for the wire learning result.
pub const WIRE_LEARNING_KEY: &str = "wire_learning";

/// Store key for the coasting calibration.
pub const COASTING_KEY: &str = "coasting";

const STORE_BUF_SIZE: usize = 512;

// ============================================================================
// Enums
// ============================================================================

/// The three operating modes, plus none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum OperatingMode {
    /// No mode running.
    #[default]
    None,
    /// Measure the wire.
    WireLearning,
    /// Cycle along the learned wire.
    Automatic,
    /// Operator control.
    Manual,
}

impl OperatingMode {
    /// Returns the mode as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::None => "None",
            OperatingMode::WireLearning => "Wire Learning",
            OperatingMode::Automatic => "Automatic",
            OperatingMode::Manual => "Manual",
        }
    }
}

/// Whether a mode can be activated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum ModeAvailability {
    /// Sensor validation not complete.
    #[default]
    BlockedSensors,
    /// Automatic mode needs a learned wire.
    BlockedWireLearningRequired,
    /// Too many errors, or hardware/sensors not ready.
    BlockedSystemError,
    /// Ready to activate.
    Available,
    /// Running.
    Active,
    /// Winding down after a stop.
    Stopping,
}

impl ModeAvailability {
    /// Returns the availability as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ModeAvailability::BlockedSensors => "Sensors not validated",
            ModeAvailability::BlockedWireLearningRequired => "Wire learning required",
            ModeAvailability::BlockedSystemError => "System error",
            ModeAvailability::Available => "Available",
            ModeAvailability::Active => "Active",
            ModeAvailability::Stopping => "Stopping",
        }
    }
}

/// Operator-facing view of the sensor handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum ValidationState {
    /// Handshake not started.
    #[default]
    NotStarted,
    /// Waiting for the wheel to turn.
    InProgress,
    /// Rotation seen, waiting for the operator.
    HallPending,
    /// Hall confirmed, waiting for shake and confirmation.
    AccelPending,
    /// Both sensors validated.
    Complete,
    /// A step timed out.
    Failed,
}

impl ValidationState {
    /// Project the gate state onto the handshake steps.
    pub fn from_health(health: &SensorHealth) -> Self {
        match health.init_state {
            InitState::Start => ValidationState::NotStarted,
            InitState::WaitWheelRotation if health.wheel_rotation_detected => {
                ValidationState::HallPending
            }
            InitState::WaitWheelRotation => ValidationState::InProgress,
            InitState::WaitTrolleyShake => ValidationState::AccelPending,
            InitState::SensorsReady | InitState::SystemReady => ValidationState::Complete,
            InitState::Failed => ValidationState::Failed,
        }
    }

    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValidationState::NotStarted => "Not started",
            ValidationState::InProgress => "In progress",
            ValidationState::HallPending => "Hall pending confirmation",
            ValidationState::AccelPending => "Accel pending confirmation",
            ValidationState::Complete => "Complete",
            ValidationState::Failed => "Failed",
        }
    }

    fn message(&self, health: &SensorHealth) -> &'static str {
        match self {
            ValidationState::NotStarted => {
                "SENSOR VALIDATION REQUIRED: Step 1: ROTATE THE WHEEL manually"
            }
            ValidationState::InProgress => "Step 1: ROTATE THE WHEEL manually",
            ValidationState::HallPending => {
                "HALL SENSOR OK! Press 'Confirm Hall Sensor' button to continue"
            }
            ValidationState::AccelPending if health.trolley_shake_detected => {
                "ACCELEROMETER OK! Press 'Confirm Accelerometer' button to complete"
            }
            ValidationState::AccelPending => "Step 2: SHAKE THE TROLLEY to test accelerometer",
            ValidationState::Complete => "Sensors validated and ready for operation",
            ValidationState::Failed => "Sensor validation FAILED - Check connections and retry",
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Coordinator aggregate status.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct ModeStatus {
    /// Mode currently running (or winding down)
    pub current_mode: OperatingMode,
    /// Mode that ran before
    pub previous_mode: OperatingMode,
    /// When the current mode was activated
    pub mode_started_ms: u64,
    /// Wire learning availability
    pub wire_learning_availability: ModeAvailability,
    /// Automatic availability
    pub automatic_availability: ModeAvailability,
    /// Manual availability
    pub manual_availability: ModeAvailability,
    /// Handshake position
    pub validation_state: ValidationState,
    /// Handshake instructions
    pub validation_message: LongString,
    /// Sensors validated
    pub sensors_validated: bool,
    /// Last accepted wire learning result
    pub wire_learning: Option<WireLearningResult>,
    /// Last accepted coasting calibration
    pub coasting: Option<CoastingCalibration>,
    /// Automatic cycles completed
    pub auto_cycle_count: u32,
    /// Automatic mode was stopped before finishing
    pub auto_cycle_interrupted: bool,
    /// A coasting calibration is available
    pub auto_coasting_calibrated: bool,
    /// One-line description of the running mode
    pub current_mode_status: LongString,
    /// Last reported error
    pub error_message: LongString,
    /// Hardware ready, sensors validated and error count below the limit
    pub system_healthy: bool,
    /// Errors since the last clear
    pub error_count: u32,
    /// When the last error was reported
    pub last_error_ms: Option<u64>,
}

impl Default for ModeStatus {
    fn default() -> Self {
        Self {
            current_mode: OperatingMode::None,
            previous_mode: OperatingMode::None,
            mode_started_ms: 0,
            wire_learning_availability: ModeAvailability::BlockedSensors,
            automatic_availability: ModeAvailability::BlockedSensors,
            manual_availability: ModeAvailability::BlockedSensors,
            validation_state: ValidationState::NotStarted,
            validation_message: long_string(ValidationState::NotStarted.message(&SensorHealth::default())),
            sensors_validated: false,
            wire_learning: None,
            coasting: None,
            auto_cycle_count: 0,
            auto_cycle_interrupted: false,
            auto_coasting_calibrated: false,
            current_mode_status: long_string("System initializing..."),
            error_message: LongString::new(),
            system_healthy: false,
            error_count: 0,
            last_error_ms: None,
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns the mode engines and arbitrates between them.
pub struct ModeCoordinator {
    config: CoordinatorConfig,
    status: ModeStatus,
    wire_learning: WireLearningEngine,
    automatic: AutomaticEngine,
    manual: ManualEngine,
}

impl ModeCoordinator {
    /// Create a coordinator with idle engines.
    pub fn new(config: &Config) -> Self {
        let cruise_ceiling = config.automatic.max_speed_ms.min(config.hardware.max_speed_ms);
        info!(target: "coordinator", "Mode coordinator initialized");
        Self {
            config: config.coordinator.clone(),
            status: ModeStatus::default(),
            wire_learning: WireLearningEngine::new(&config.wire_learning, cruise_ceiling),
            automatic: AutomaticEngine::new(&config.automatic),
            manual: ManualEngine::new(&config.manual),
        }
    }

    /// Snapshot of the status.
    pub fn status(&self) -> ModeStatus {
        self.status.clone()
    }

    /// Mode currently running.
    pub fn current_mode(&self) -> OperatingMode {
        self.status.current_mode
    }

    /// Wire learning engine.
    pub fn wire_learning(&self) -> &WireLearningEngine {
        &self.wire_learning
    }

    /// Automatic engine.
    pub fn automatic(&self) -> &AutomaticEngine {
        &self.automatic
    }

    /// Manual engine.
    pub fn manual(&self) -> &ManualEngine {
        &self.manual
    }

    /// Availability of one mode.
    pub fn availability(&self, mode: OperatingMode) -> ModeAvailability {
        match mode {
            OperatingMode::WireLearning => self.status.wire_learning_availability,
            OperatingMode::Automatic => self.status.automatic_availability,
            OperatingMode::Manual => self.status.manual_availability,
            OperatingMode::None => ModeAvailability::Available,
        }
    }

    /// True if the mode can be activated now.
    pub fn is_mode_available(&self, mode: OperatingMode) -> bool {
        mode != OperatingMode::None && self.availability(mode) == ModeAvailability::Available
    }

    /// Hardware ready, sensors validated and error count below the limit.
    pub fn is_system_healthy(&self) -> bool {
        self.status.system_healthy
    }

    /// Validated, healthy, hardware initialized and Hall sensor healthy.
    pub fn is_motion_safe<E: EscOutput>(&self, hw: &HardwareControl<E>, sensors: &SensorHealth) -> bool {
        sensors.sensors_validated
            && sensors.system_ready
            && self.status.system_healthy
            && hw.is_initialized()
            && hw.is_hall_healthy()
    }

    fn context<'a, E: EscOutput>(
        &self,
        hw: &'a mut HardwareControl<E>,
        sensors: &'a SensorHealth,
        now_ms: u64,
    ) -> EngineContext<'a, E> {
        let motion_safe = self.is_motion_safe(hw, sensors);
        EngineContext {
            hw,
            sensors,
            motion_safe,
            now_ms,
        }
    }

    // =========================================================================
    // Periodic update
    // =========================================================================

    /// Refresh health, validation, availability and the current mode.
    pub fn tick<E: EscOutput>(&mut self, hw: &HardwareControl<E>, sensors: &SensorHealth, now_ms: u64) {
        if let Some(last) = self.status.last_error_ms {
            if self.status.error_count > 0
                && now_ms.saturating_sub(last) > u64::from(self.config.error_reset_ms)
            {
                self.status.error_count = 0;
                self.status.error_message.clear();
                info!(target: "coordinator", "Error count reset after timeout");
            }
        }

        self.status.system_healthy = hw.is_initialized()
            && sensors.system_ready
            && self.status.error_count < self.config.max_system_errors;

        let validation = ValidationState::from_health(sensors);
        if validation != self.status.validation_state {
            info!(target: "coordinator", "Sensor validation: {}", validation.as_str());
        }
        self.status.validation_state = validation;
        set_message(&mut self.status.validation_message, validation.message(sensors));
        self.status.sensors_validated = sensors.sensors_validated;

        self.refresh_current_mode();
        self.refresh_availability();
        self.refresh_mode_message();
    }

    fn engine_running(&self, mode: OperatingMode) -> (bool, bool) {
        match mode {
            OperatingMode::WireLearning => {
                (self.wire_learning.is_active(), self.wire_learning.is_stopping())
            }
            OperatingMode::Automatic => (self.automatic.is_active(), self.automatic.is_stopping()),
            OperatingMode::Manual => (self.manual.is_active(), self.manual.is_stopping()),
            OperatingMode::None => (false, false),
        }
    }

    fn refresh_current_mode(&mut self) {
        let current = self.status.current_mode;
        let (active, stopping) = self.engine_running(current);
        if current != OperatingMode::None && !active && !stopping {
            info!(target: "coordinator", "{} mode finished", current.as_str());
            self.retire_current();
        }
    }

    fn retire_current(&mut self) {
        if self.status.current_mode != OperatingMode::None {
            self.status.previous_mode = self.status.current_mode;
            self.status.current_mode = OperatingMode::None;
        }
    }

    fn refresh_availability(&mut self) {
        let wire_complete = self.status.wire_learning.is_some_and(|w| w.complete);
        self.status.wire_learning_availability = self.compute_availability(OperatingMode::WireLearning, true);
        self.status.automatic_availability = self.compute_availability(OperatingMode::Automatic, wire_complete);
        self.status.manual_availability = self.compute_availability(OperatingMode::Manual, true);
    }

    fn compute_availability(&self, mode: OperatingMode, prerequisites_met: bool) -> ModeAvailability {
        let (active, stopping) = self.engine_running(mode);
        if !self.status.sensors_validated {
            ModeAvailability::BlockedSensors
        } else if !prerequisites_met {
            ModeAvailability::BlockedWireLearningRequired
        } else if active {
            ModeAvailability::Active
        } else if stopping {
            ModeAvailability::Stopping
        } else if !self.status.system_healthy {
            ModeAvailability::BlockedSystemError
        } else {
            ModeAvailability::Available
        }
    }

    fn refresh_mode_message(&mut self) {
        let msg = &mut self.status.current_mode_status;
        match self.status.current_mode {
            OperatingMode::WireLearning => {
                let progress = self.wire_learning.progress();
                format_message(
                    msg,
                    format_args!(
                        "Wire Learning: {} - {:.1} m/s",
                        progress.state.as_str(),
                        progress.current_speed_ms
                    ),
                );
            }
            OperatingMode::Automatic => format_message(
                msg,
                format_args!(
                    "Automatic: Cycle {}, {}",
                    self.automatic.cycles_completed() + 1,
                    self.automatic.state().as_str()
                ),
            ),
            OperatingMode::Manual => {
                let manual = self.manual.status();
                format_message(
                    msg,
                    format_args!(
                        "Manual: {:.1} m/s {}",
                        manual.current_speed_ms,
                        manual.direction.as_str()
                    ),
                );
            }
            OperatingMode::None => set_message(msg, "No active mode"),
        }
    }

    /// Advance the current mode's engine, and any engine still winding down.
    ///
    /// An engine error is recorded and, if it counts against health,
    /// reported.
    pub fn update_current<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) {
        let mode = self.status.current_mode;
        let mut ctx = self.context(hw, sensors, now_ms);
        let result = match mode {
            OperatingMode::WireLearning => self.wire_learning.update(&mut ctx),
            OperatingMode::Automatic => self.automatic.update(&mut ctx),
            OperatingMode::Manual => self.manual.update(&mut ctx),
            OperatingMode::None => Ok(()),
        };
        // Stopping engines left behind by an activation only change state.
        if mode != OperatingMode::WireLearning && self.wire_learning.is_stopping() {
            if let Err(e) = self.wire_learning.update(&mut ctx) {
                warn!(target: "coordinator", "Wire learning error while stopping: {}", e);
            }
        }
        if mode != OperatingMode::Automatic && self.automatic.is_stopping() {
            if let Err(e) = self.automatic.update(&mut ctx) {
                warn!(target: "coordinator", "Automatic error while stopping: {}", e);
            }
        }

        if let Err(e) = result {
            error!(target: "coordinator", "{} mode error: {}", mode.as_str(), e);
            if mode == OperatingMode::Automatic {
                self.status.auto_cycle_interrupted = true;
            }
            self.record_error(hw, sensors, &e, now_ms);
        }
    }

    fn record_error<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        err: &ControlError,
        now_ms: u64,
    ) {
        if err.counts_against_health() {
            let mut text = LongString::new();
            let _ = write!(text, "{}", err);
            self.report_error(hw, sensors, &text, now_ms);
        } else {
            format_message(&mut self.status.error_message, format_args!("{}", err));
        }
    }

    /// Collect published results from every engine and persist them.
    ///
    /// Returns the number of events handled.
    pub fn drain_events<S: ParamStore>(&mut self, store: &mut S) -> usize {
        let outboxes = [
            self.wire_learning.take_events(),
            self.automatic.take_events(),
            self.manual.take_events(),
        ];
        let mut count = 0;
        for event in outboxes.into_iter().flatten() {
            count += 1;
            let saved = match event {
                EngineEvent::WireLearned(result) => self.set_wire_learning_result(result, store),
                EngineEvent::CoastingCalibrated(calibration) => {
                    self.set_coasting_calibration(calibration, store)
                }
                EngineEvent::CycleCompleted { cycles } => {
                    self.status.auto_cycle_count = cycles;
                    Ok(())
                }
            };
            if let Err(e) = saved {
                format_message(&mut self.status.error_message, format_args!("{}", e));
            }
        }
        count
    }

    // =========================================================================
    // Mode control
    // =========================================================================

    /// Stop the current mode immediately and start `mode`.
    pub fn activate<E: EscOutput>(
        &mut self,
        mode: OperatingMode,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) -> Result<(), ControlError> {
        if mode == OperatingMode::None {
            return self.stop_current_mode(hw, sensors, true, now_ms);
        }
        self.tick(hw, sensors, now_ms);
        if !self.is_mode_available(mode) {
            warn!(
                target: "coordinator",
                "{} mode not available: {}",
                mode.as_str(),
                self.availability(mode).as_str()
            );
            format_message(
                &mut self.status.error_message,
                format_args!("{} mode not available", mode.as_str()),
            );
            return Err(ControlError::InvalidState("mode not available"));
        }

        if self.status.current_mode != OperatingMode::None {
            self.stop_current_mode(hw, sensors, true, now_ms)?;
            self.retire_current();
        }

        info!(target: "coordinator", "Activating {} mode", mode.as_str());
        let mut ctx = self.context(hw, sensors, now_ms);
        let result = match mode {
            OperatingMode::WireLearning => self.wire_learning.start(&mut ctx),
            OperatingMode::Automatic => {
                self.automatic.set_wire_result(self.status.wire_learning);
                self.automatic.set_calibration(self.status.coasting);
                self.automatic.start(&mut ctx)
            }
            OperatingMode::Manual => self.manual.start(&mut ctx),
            OperatingMode::None => Ok(()),
        };
        if let Err(e) = result {
            format_message(
                &mut self.status.error_message,
                format_args!("Failed to start {} mode: {}", mode.as_str(), e),
            );
            return Err(e);
        }

        self.status.current_mode = mode;
        self.status.mode_started_ms = now_ms;
        if mode == OperatingMode::Automatic {
            self.status.auto_cycle_interrupted = false;
        }
        self.refresh_availability();
        self.refresh_mode_message();
        Ok(())
    }

    /// Stop the current mode.
    ///
    /// Wire learning and manual stop directly; automatic is interrupted when
    /// `immediate`, otherwise it finishes the current run.
    pub fn stop_current_mode<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        immediate: bool,
        now_ms: u64,
    ) -> Result<(), ControlError> {
        let mode = self.status.current_mode;
        info!(
            target: "coordinator",
            "Stopping {} mode ({})",
            mode.as_str(),
            if immediate { "immediate" } else { "graceful" }
        );
        let mut ctx = self.context(hw, sensors, now_ms);
        match mode {
            OperatingMode::WireLearning => self.wire_learning.stop(&mut ctx, immediate)?,
            OperatingMode::Automatic => {
                if immediate {
                    self.automatic.interrupt(&mut ctx);
                    self.status.auto_cycle_interrupted = true;
                } else {
                    self.automatic.stop(&mut ctx, false)?;
                }
            }
            OperatingMode::Manual => self.manual.stop(&mut ctx, immediate)?,
            OperatingMode::None => return Ok(()),
        }
        self.refresh_current_mode();
        self.refresh_availability();
        self.refresh_mode_message();
        Ok(())
    }

    /// Execute an operator command in manual mode.
    pub fn manual_command<E: EscOutput>(
        &mut self,
        command: ManualCommand,
        source: &str,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) -> Result<(), ControlError> {
        if self.status.current_mode != OperatingMode::Manual {
            return Err(ControlError::InvalidState("manual mode not active"));
        }
        let mut ctx = self.context(hw, sensors, now_ms);
        let result = self.manual.execute(&mut ctx, command, source);
        if let Err(e) = &result {
            if e.counts_against_health() {
                self.record_error(hw, sensors, e, now_ms);
            }
        }
        result
    }

    /// Reset the manual session statistics.
    pub fn reset_manual_session<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) -> Result<(), ControlError> {
        if self.status.current_mode != OperatingMode::Manual {
            return Err(ControlError::InvalidState("manual mode not active"));
        }
        let mut ctx = self.context(hw, sensors, now_ms);
        self.manual.reset_session(&mut ctx);
        Ok(())
    }

    /// Neutral output and every engine halted. Never fails.
    pub fn emergency_stop<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        now_ms: u64,
    ) {
        warn!(target: "coordinator", "EMERGENCY STOP activated - stopping all modes");
        hw.emergency_stop(now_ms);
        let mut ctx = self.context(hw, sensors, now_ms);
        self.wire_learning.emergency_stop(&mut ctx);
        if self.automatic.is_active() {
            self.status.auto_cycle_interrupted = true;
        }
        self.automatic.emergency_stop(&mut ctx);
        self.manual.emergency_stop(&mut ctx);

        self.retire_current();
        set_message(&mut self.status.current_mode_status, "EMERGENCY STOP");
        set_message(&mut self.status.error_message, "Emergency stop activated");
        self.refresh_availability();
    }

    /// Emergency stop, then forget results, sensor validation, errors and
    /// position.
    pub fn reset_system<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        gate: &mut SensorHealthGate,
        now_ms: u64,
    ) {
        info!(target: "coordinator", "Resetting entire mode system");
        let sensors = gate.snapshot();
        self.emergency_stop(hw, &sensors, now_ms);
        gate.reset();

        self.status.wire_learning = None;
        self.status.coasting = None;
        self.status.auto_coasting_calibrated = false;
        self.status.auto_cycle_count = 0;
        self.status.auto_cycle_interrupted = false;
        self.automatic.set_wire_result(None);
        self.automatic.set_calibration(None);
        self.clear_errors();
        hw.reset_position();

        self.tick(hw, gate.health(), now_ms);
        set_message(&mut self.status.current_mode_status, "System reset complete");
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Count an error. Reaching the limit triggers an emergency stop.
    pub fn report_error<E: EscOutput>(
        &mut self,
        hw: &mut HardwareControl<E>,
        sensors: &SensorHealth,
        message: &str,
        now_ms: u64,
    ) {
        self.status.error_count += 1;
        self.status.last_error_ms = Some(now_ms);
        set_message(&mut self.status.error_message, message);
        warn!(
            target: "coordinator",
            "System error reported: {} (count: {})", message, self.status.error_count
        );

        if self.status.error_count >= self.config.max_system_errors {
            error!(target: "coordinator", "Maximum error count reached - activating emergency stop");
            self.emergency_stop(hw, sensors, now_ms);
            set_message(&mut self.status.error_message, message);
            self.status.system_healthy = false;
            self.refresh_availability();
        }
    }

    /// Forget all reported errors.
    pub fn clear_errors(&mut self) {
        self.status.error_count = 0;
        self.status.last_error_ms = None;
        self.status.error_message.clear();
        info!(target: "coordinator", "Error condition cleared");
    }

    // =========================================================================
    // Results and persistence
    // =========================================================================

    /// Accept a wire learning result and persist it.
    ///
    /// The in-memory copy is updated even if the store write fails.
    pub fn set_wire_learning_result<S: ParamStore>(
        &mut self,
        result: WireLearningResult,
        store: &mut S,
    ) -> Result<(), ControlError> {
        info!(target: "coordinator", "Wire learning result set: {:.2} m", result.wire_length_m);
        self.status.wire_learning = Some(result);
        self.automatic.set_wire_result(Some(result));
        self.refresh_availability();
        self.save(store, WIRE_LEARNING_KEY, &result)
    }

    /// Accept a coasting calibration and persist it.
    pub fn set_coasting_calibration<S: ParamStore>(
        &mut self,
        calibration: CoastingCalibration,
        store: &mut S,
    ) -> Result<(), ControlError> {
        info!(
            target: "coordinator",
            "Coasting calibration set: {:.2} m coasting distance", calibration.coast_distance_m
        );
        self.status.coasting = Some(calibration);
        self.status.auto_coasting_calibrated = calibration.calibrated;
        self.automatic.set_calibration(Some(calibration));
        self.save(store, COASTING_KEY, &calibration)
    }

    /// Load stored results. Missing or unreadable entries are skipped.
    pub fn load_persistent<S: ParamStore>(&mut self, store: &mut S) -> Result<(), ControlError> {
        if let Some(result) = self.load::<S, WireLearningResult>(store, WIRE_LEARNING_KEY)? {
            if result.complete {
                info!(target: "coordinator", "Loaded wire learning data: {:.2} m wire length", result.wire_length_m);
                self.status.wire_learning = Some(result);
                self.automatic.set_wire_result(Some(result));
            }
        }
        if let Some(calibration) = self.load::<S, CoastingCalibration>(store, COASTING_KEY)? {
            if calibration.calibrated {
                info!(
                    target: "coordinator",
                    "Loaded coasting data: {:.2} m coasting distance", calibration.coast_distance_m
                );
                self.status.coasting = Some(calibration);
                self.status.auto_coasting_calibrated = true;
                self.automatic.set_calibration(Some(calibration));
            }
        }
        self.refresh_availability();
        Ok(())
    }

    fn save<S: ParamStore, T: Serialize>(
        &self,
        store: &mut S,
        key: &str,
        value: &T,
    ) -> Result<(), ControlError> {
        let mut buf = [0u8; STORE_BUF_SIZE];
        let len = serde_json_core::to_slice(value, &mut buf).map_err(|e| {
            error!(target: "coordinator", "Failed to encode {}: {:?}", key, e);
            ControlError::Storage("encode failed")
        })?;
        store
            .store(&self.config.store_namespace, key, &buf[..len])
            .map_err(|e| {
                error!(target: "coordinator", "Failed to save {}: {:?}", key, e);
                ControlError::Storage("write failed")
            })
    }

    fn load<S: ParamStore, T: DeserializeOwned>(
        &self,
        store: &mut S,
        key: &str,
    ) -> Result<Option<T>, ControlError> {
        let mut buf = [0u8; STORE_BUF_SIZE];
        let len = match store.load(&self.config.store_namespace, key, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(target: "coordinator", "Could not read {}: {:?}", key, e);
                return Err(ControlError::Storage("read failed"));
            }
        };
        match serde_json_core::from_slice::<T>(&buf[..len]) {
            Ok((value, _)) => Ok(Some(value)),
            Err(e) => {
                warn!(target: "coordinator", "Ignoring unreadable {}: {:?}", key, e);
                Ok(None)
            }
        }
    }

    /// Multi-line summary for the console.
    pub fn detailed_status(&self) -> ReportString {
        let s = &self.status;
        let mut out = ReportString::new();
        let _ = write!(
            out,
            "=== 3-MODE SYSTEM STATUS ===\n\
             Current Mode: {}\n\
             Sensor Validation: {}\n\
             Wire Learning: {}\n\
             Automatic: {}\n\
             Manual: {}\n\
             System Health: {}\n\
             Error Count: {}\n\
             Wire Length: {:.2} m\n\
             Coasting Distance: {:.2} m\n\
             Current Status: {}\n",
            s.current_mode.as_str(),
            s.validation_state.as_str(),
            s.wire_learning_availability.as_str(),
            s.automatic_availability.as_str(),
            s.manual_availability.as_str(),
            if s.system_healthy { "Healthy" } else { "Error" },
            s.error_count,
            s.wire_learning.map_or(0.0, |w| w.wire_length_m),
            s.coasting.map_or(0.0, |c| c.coast_distance_m),
            s.current_mode_status,
        );
        out
    }
}
