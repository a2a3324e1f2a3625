//! The system context: owner of every component and of the control loop.
//!
//! [`SystemContext`] holds the hardware facade, the sensor gate, the mode
//! coordinator (and through it the three engines), the accelerometer and the
//! parameter store. Nothing is global; the firmware creates one context and
//! calls [`tick`](SystemContext::tick) every 20 ms.
//!
//! # Tick Order
//!
//! 1. Drain the Hall pulse queue (the sensor gate observes each pulse)
//! 2. Hardware update: ESC timed steps, duty rate limiting, Hall health
//! 3. Accelerometer sample into the gate
//! 4. Gate update: handshake timeouts and promotion
//! 5. Coordinator tick: error reset, health, availability
//! 6. Current mode engine update
//! 7. Engine outboxes drained into the coordinator (and persisted)
//!
//! # Example
//!
//! ```rust
//! use trolley_core::{Command, CommandSource, Config, SystemContext};
//! use trolley_core::hal::{MockAccelerometer, MockEsc, MockParamStore, MockPulseSource};
//!
//! let mut system = SystemContext::new(
//!     Config::default(),
//!     MockEsc::new(),
//!     MockPulseSource::new(),
//!     MockAccelerometer::new(),
//!     MockParamStore::new(),
//! );
//! system.init(0).unwrap();
//!
//! // Nothing runs before the sensors are validated
//! let reply = system.handle_command(Command::StartManual, CommandSource::Serial, 20);
//! assert!(!reply.success);
//!
//! let reply = system.handle_command(Command::StartValidation, CommandSource::Serial, 40);
//! assert!(reply.success);
//!
//! system.tick(60);
//! assert_eq!(system.status().mode.validation_state.as_str(), "In progress");
//! ```

use log::{info, warn};

use crate::automatic::AutomaticStatus;
use crate::commands::{Command, CommandReply, CommandSource};
use crate::config::{format_message, long_string, Config, LongString};
use crate::coordinator::{ModeCoordinator, ModeStatus, OperatingMode};
use crate::error::ControlError;
use crate::hardware::{HardwareControl, HardwareStatus};
use crate::manual::{ManualSession, ManualStatus};
use crate::sensor_health::{SensorHealth, SensorHealthGate};
use crate::traits::{Accelerometer, EscOutput, HallObserver, ParamStore, PulseSource};
use crate::wire_learning::WireLearningProgress;

/// Everything the firmware runs, owned in one place.
pub struct SystemContext<E, P, A, S>
where
    E: EscOutput,
    P: PulseSource,
    A: Accelerometer,
    S: ParamStore,
{
    hw: HardwareControl<E>,
    pulses: P,
    accel: A,
    store: S,
    gate: SensorHealthGate,
    coordinator: ModeCoordinator,
    accel_faulted: bool,
    last_tick_ms: u64,
}

impl<E, P, A, S> SystemContext<E, P, A, S>
where
    E: EscOutput,
    P: PulseSource,
    A: Accelerometer,
    S: ParamStore,
{
    /// Assemble a context. Call [`init`](Self::init) before the first tick.
    pub fn new(config: Config, esc: E, pulses: P, accel: A, store: S) -> Self {
        Self {
            hw: HardwareControl::new(esc, &config.hardware),
            pulses,
            accel,
            store,
            gate: SensorHealthGate::new(&config.sensors, config.hardware.wheel_circumference_m),
            coordinator: ModeCoordinator::new(&config),
            accel_faulted: false,
            last_tick_ms: 0,
        }
    }

    /// Initialize the ESC output and load stored results.
    ///
    /// A storage failure is logged and startup continues without the stored
    /// results.
    pub fn init(&mut self, now_ms: u64) -> Result<(), ControlError> {
        self.hw.init(now_ms)?;
        if let Err(e) = self.coordinator.load_persistent(&mut self.store) {
            warn!(target: "system", "Stored results unavailable: {}", e);
        }
        self.coordinator.tick(&self.hw, self.gate.health(), now_ms);
        info!(target: "system", "System initialized");
        Ok(())
    }

    /// Run one control cycle.
    pub fn tick(&mut self, now_ms: u64) {
        self.last_tick_ms = now_ms;

        let observer: &mut dyn HallObserver = &mut self.gate;
        self.hw.process_pulses(&mut self.pulses, Some(observer));
        self.hw.update(now_ms);

        match self.accel.read_g() {
            Ok(sample) => {
                if self.accel_faulted {
                    info!(target: "system", "Accelerometer readings restored");
                    self.accel_faulted = false;
                }
                self.gate.on_accel_sample(sample, now_ms);
            }
            Err(e) => {
                if !self.accel_faulted {
                    warn!(target: "system", "Accelerometer read failed: {:?}", e);
                    self.accel_faulted = true;
                }
            }
        }
        self.gate.update(now_ms);

        self.coordinator.tick(&self.hw, self.gate.health(), now_ms);
        self.coordinator
            .update_current(&mut self.hw, self.gate.health(), now_ms);
        self.coordinator.drain_events(&mut self.store);
    }

    /// Decode and execute a command character. Unknown characters give
    /// `None`.
    pub fn handle_char(&mut self, c: char, source: CommandSource, now_ms: u64) -> Option<CommandReply> {
        match Command::from_char(c) {
            Some(cmd) => Some(self.handle_command(cmd, source, now_ms)),
            None => {
                warn!(target: "system", "Unknown command '{}' from {}", c, source.as_str());
                None
            }
        }
    }

    /// Execute an operator command.
    pub fn handle_command(&mut self, command: Command, source: CommandSource, now_ms: u64) -> CommandReply {
        let reply = self.dispatch(command, source, now_ms);
        info!(
            target: "system",
            "CMD[{}] {} from {}: {}",
            command.as_char(),
            if reply.success { "SUCCESS" } else { "FAILED" },
            source.as_str(),
            reply.message
        );
        reply
    }

    fn dispatch(&mut self, command: Command, source: CommandSource, now_ms: u64) -> CommandReply {
        match command {
            Command::StartWireLearning => {
                self.activate(command, OperatingMode::WireLearning, "Wire learning mode activated", now_ms)
            }
            Command::StartAutomatic => self.activate(
                command,
                OperatingMode::Automatic,
                "Automatic mode activated - cycling started",
                now_ms,
            ),
            Command::StartManual => self.activate(
                command,
                OperatingMode::Manual,
                "Manual mode activated - ARM ESC to enable motor control",
                now_ms,
            ),
            Command::StartValidation => match self.gate.start_validation(now_ms) {
                Ok(()) => ok(command, "Sensor validation started - ROTATE THE WHEEL manually"),
                Err(e) => failed(command, format_args!("Failed to start sensor validation: {}", e)),
            },
            Command::ConfirmHall => match self.gate.confirm_hall(now_ms) {
                Ok(()) => ok(command, "Hall sensor validation confirmed - proceed to shake trolley"),
                Err(_) => fail(command, "Hall sensor validation not ready for confirmation"),
            },
            Command::ConfirmAccel => match self.gate.confirm_accel(now_ms) {
                Ok(()) => ok(command, "Accelerometer validation confirmed - all sensors validated!"),
                Err(_) => fail(command, "Accelerometer validation not ready for confirmation"),
            },
            Command::ArmEsc
            | Command::DisarmEsc
            | Command::Forward
            | Command::Backward
            | Command::Stop
            | Command::SpeedUp
            | Command::SlowDown => self.manual(command, source, now_ms),
            Command::StopMode => {
                if self.coordinator.current_mode() == OperatingMode::None {
                    return fail(command, "No active mode");
                }
                match self
                    .coordinator
                    .stop_current_mode(&mut self.hw, self.gate.health(), false, now_ms)
                {
                    Ok(()) => ok(command, "Current mode stopped gracefully"),
                    Err(e) => failed(command, format_args!("Failed to stop current mode: {}", e)),
                }
            }
            Command::Interrupt => {
                if self.coordinator.current_mode() == OperatingMode::None {
                    return fail(command, "No active mode");
                }
                match self
                    .coordinator
                    .stop_current_mode(&mut self.hw, self.gate.health(), true, now_ms)
                {
                    Ok(()) => ok(command, "Current mode stopped immediately"),
                    Err(e) => failed(command, format_args!("Failed to stop current mode: {}", e)),
                }
            }
            Command::EmergencyStop => {
                self.coordinator
                    .emergency_stop(&mut self.hw, self.gate.health(), now_ms);
                ok(command, "EMERGENCY STOP - All modes stopped, motor halted")
            }
            Command::Reset => {
                self.coordinator
                    .reset_system(&mut self.hw, &mut self.gate, now_ms);
                ok(command, "System reset complete - sensor validation required")
            }
            Command::Status => {
                let mode = self.coordinator.status();
                let mut message = LongString::new();
                format_message(
                    &mut message,
                    format_args!(
                        "Mode: {}, Sensors: {}, Status: {}",
                        mode.current_mode.as_str(),
                        if mode.sensors_validated { "Validated" } else { "Not Validated" },
                        mode.current_mode_status
                    ),
                );
                CommandReply::ok(command, message)
            }
        }
    }

    fn activate(&mut self, command: Command, mode: OperatingMode, success: &str, now_ms: u64) -> CommandReply {
        match self
            .coordinator
            .activate(mode, &mut self.hw, self.gate.health(), now_ms)
        {
            Ok(()) => ok(command, success),
            Err(_) => failed(
                command,
                format_args!(
                    "Failed to activate {} mode: {}",
                    mode.as_str(),
                    self.coordinator.status().error_message
                ),
            ),
        }
    }

    fn manual(&mut self, command: Command, source: CommandSource, now_ms: u64) -> CommandReply {
        let Some(manual_cmd) = command.manual_command() else {
            return fail(command, "Not a manual command");
        };
        let result = self.coordinator.manual_command(
            manual_cmd,
            source.as_str(),
            &mut self.hw,
            self.gate.health(),
            now_ms,
        );
        let speed = self.coordinator.manual().status().target_speed_ms;
        match result {
            Ok(()) => match command {
                Command::ArmEsc => ok(command, "Arming ESC - motor control enabled when armed"),
                Command::DisarmEsc => ok(command, "ESC disarmed - motor control disabled"),
                Command::Forward => ok_fmt(command, format_args!("Moving forward at {:.1} m/s", speed)),
                Command::Backward => ok_fmt(command, format_args!("Moving backward at {:.1} m/s", speed)),
                Command::SpeedUp => ok_fmt(command, format_args!("Speed increased to {:.1} m/s", speed)),
                Command::SlowDown => ok_fmt(command, format_args!("Speed decreased to {:.1} m/s", speed)),
                _ => ok(command, "Motor stopped"),
            },
            Err(ControlError::InvalidState("manual mode not active")) => {
                fail(command, "Manual mode not active")
            }
            Err(e) => failed(command, format_args!("{} rejected: {}", manual_cmd.as_str(), e)),
        }
    }

    // =========================================================================
    // Status and accessors
    // =========================================================================

    /// Snapshot of every component.
    pub fn status(&self) -> SystemStatus {
        let manual = self.coordinator.manual();
        SystemStatus {
            timestamp_ms: self.last_tick_ms,
            mode: self.coordinator.status(),
            sensors: self.gate.snapshot(),
            hardware: self.hw.status(),
            wire_learning: self.coordinator.wire_learning().progress(),
            automatic: self.coordinator.automatic().status(),
            manual: manual.status(),
            manual_session: manual.session(),
        }
    }

    /// Hardware facade.
    pub fn hardware(&self) -> &HardwareControl<E> {
        &self.hw
    }

    /// Hardware facade, mutable.
    pub fn hardware_mut(&mut self) -> &mut HardwareControl<E> {
        &mut self.hw
    }

    /// Sensor gate.
    pub fn gate(&self) -> &SensorHealthGate {
        &self.gate
    }

    /// Mode coordinator.
    pub fn coordinator(&self) -> &ModeCoordinator {
        &self.coordinator
    }

    /// Pulse source (tests feed pulses through this).
    pub fn pulses_mut(&mut self) -> &mut P {
        &mut self.pulses
    }

    /// Accelerometer.
    pub fn accel_mut(&mut self) -> &mut A {
        &mut self.accel
    }

    /// Parameter store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Parameter store, mutable.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

fn ok(command: Command, message: &str) -> CommandReply {
    CommandReply::ok(command, long_string(message))
}

fn ok_fmt(command: Command, args: core::fmt::Arguments<'_>) -> CommandReply {
    let mut message = LongString::new();
    format_message(&mut message, args);
    CommandReply::ok(command, message)
}

fn fail(command: Command, message: &str) -> CommandReply {
    CommandReply::failed(command, long_string(message))
}

fn failed(command: Command, args: core::fmt::Arguments<'_>) -> CommandReply {
    let mut message = LongString::new();
    format_message(&mut message, args);
    CommandReply::failed(command, message)
}

// ============================================================================
// System Status
// ============================================================================

/// Snapshot of the whole system for the web layer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct SystemStatus {
    /// Time of the last tick
    pub timestamp_ms: u64,
    /// Mode arbitration
    pub mode: ModeStatus,
    /// Sensor gate
    pub sensors: SensorHealth,
    /// ESC, speed and position
    pub hardware: HardwareStatus,
    /// Wire learning progress
    pub wire_learning: WireLearningProgress,
    /// Automatic cycling statistics
    pub automatic: AutomaticStatus,
    /// Manual control
    pub manual: ManualStatus,
    /// Manual session statistics
    pub manual_session: ManualSession,
}

#[cfg(feature = "json")]
impl SystemStatus {
    /// Serialize as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{MockAccelerometer, MockEsc, MockParamStore, MockPulseSource};
    use crate::traits::AccelSample;

    type TestSystem = SystemContext<MockEsc, MockPulseSource, MockAccelerometer, MockParamStore>;

    fn system() -> TestSystem {
        let mut sys = SystemContext::new(
            Config::default(),
            MockEsc::new(),
            MockPulseSource::new(),
            MockAccelerometer::new(),
            MockParamStore::new(),
        );
        sys.init(0).unwrap();
        sys
    }

    fn validate(sys: &mut TestSystem) -> u64 {
        assert!(sys.handle_command(Command::StartValidation, CommandSource::Serial, 0).success);
        sys.pulses_mut().push(100);
        sys.tick(100);
        assert!(sys.handle_command(Command::ConfirmHall, CommandSource::Serial, 120).success);
        sys.accel_mut().spike(AccelSample::new(0.0, 0.0, 1.8));
        sys.tick(140);
        assert!(sys.handle_command(Command::ConfirmAccel, CommandSource::Serial, 160).success);
        sys.tick(180);
        assert!(sys.gate().sensors_validated());
        200
    }

    #[test]
    fn handshake_unlocks_modes() {
        let mut sys = system();
        let now = validate(&mut sys);
        sys.tick(now);
        let mode = sys.status().mode;
        assert!(mode.system_healthy);
        assert_eq!(mode.manual_availability.as_str(), "Available");
        assert_eq!(mode.automatic_availability.as_str(), "Wire learning required");
    }

    #[test]
    fn confirm_before_rotation_fails() {
        let mut sys = system();
        sys.handle_command(Command::StartValidation, CommandSource::Serial, 0);
        let reply = sys.handle_command(Command::ConfirmHall, CommandSource::Serial, 20);
        assert!(!reply.success);
        assert_eq!(
            reply.message.as_str(),
            "Hall sensor validation not ready for confirmation"
        );
    }

    #[test]
    fn manual_keys_need_manual_mode() {
        let mut sys = system();
        validate(&mut sys);
        let reply = sys.handle_command(Command::Forward, CommandSource::WebUi, 300);
        assert!(!reply.success);
        assert_eq!(reply.message.as_str(), "Manual mode not active");
    }

    #[test]
    fn manual_forward_after_arming() {
        let mut sys = system();
        let mut now = validate(&mut sys);
        assert!(sys.handle_command(Command::StartManual, CommandSource::Serial, now).success);
        sys.tick(now + 20);
        assert!(sys.handle_command(Command::ArmEsc, CommandSource::Serial, now + 40).success);
        while now < 5000 {
            now += 20;
            sys.tick(now);
        }
        assert!(sys.hardware().is_armed());
        let reply = sys.handle_command(Command::Forward, CommandSource::Serial, now);
        assert!(reply.success, "{}", reply.message);
        assert_eq!(reply.message.as_str(), "Moving forward at 0.5 m/s");
        assert_eq!(sys.status().manual.last_command_source.as_str(), "serial");
    }

    #[test]
    fn emergency_stop_reply() {
        let mut sys = system();
        let reply = sys.handle_command(Command::EmergencyStop, CommandSource::Api, 10);
        assert!(reply.success);
        assert_eq!(sys.hardware().target_speed_ms(), 0.0);
        assert_eq!(sys.status().mode.current_mode_status.as_str(), "EMERGENCY STOP");
    }

    #[test]
    fn status_line() {
        let mut sys = system();
        let reply = sys.handle_command(Command::Status, CommandSource::Serial, 0);
        assert!(reply.message.starts_with("Mode: None, Sensors: Not Validated"));
    }

    #[cfg(feature = "json")]
    #[test]
    fn status_exports_as_json() {
        let sys = system();
        let json = sys.status().to_json().unwrap();
        assert!(json.contains("\"current_mode\":\"none\""));
        assert!(json.contains("\"system_healthy\":false"));
    }

    #[test]
    fn unknown_char_is_ignored() {
        let mut sys = system();
        assert!(sys.handle_char('x', CommandSource::Serial, 0).is_none());
        let reply = sys.handle_char('t', CommandSource::Serial, 0).unwrap();
        assert_eq!(reply.command, Command::Status);
    }

    #[test]
    fn accel_failure_keeps_ticking() {
        let mut sys = system();
        sys.accel_mut().set_fail(true);
        sys.tick(20);
        sys.tick(40);
        sys.accel_mut().set_fail(false);
        sys.tick(60);
        assert!((sys.status().sensors.total_accel_g - 1.0).abs() < 0.01);
    }
}
