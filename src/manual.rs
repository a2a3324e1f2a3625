//! Manual control.
//!
//! Operator commands go through a fixed validation pipeline before they
//! reach the motor:
//!
//! 1. Rate limit (commands per window, with a circular history)
//! 2. Mode active
//! 3. Speed in range and the change from the current target bounded
//! 4. ESC armed for non-zero motion
//! 5. Sensor health: validated, no impact, Hall alive while moving
//!
//! Emergency stop skips the pipeline and always succeeds.

use core::fmt::Write;

use heapless::HistoryBuffer;
use log::{error, info, warn};

use crate::config::{
    format_message, set_message, short_string, LongString, ManualConfig, ReportString, ShortString,
};
use crate::error::ControlError;
use crate::esc::EscState;
use crate::traits::{Direction, EngineContext, EscOutput, ModeEngine, Outbox};

/// Entries kept in the command history.
pub const COMMAND_HISTORY_SIZE: usize = 20;

/// Manual mode state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum ManualState {
    /// Not running.
    #[default]
    Idle,
    /// Starting up.
    Initializing,
    /// Running, ESC disarmed.
    Ready,
    /// Waiting for the ESC arming sequence.
    EscArming,
    /// ESC armed, motor stopped.
    Active,
    /// Driving forward.
    MovingForward,
    /// Driving backward.
    MovingBackward,
    /// Motor ramping to zero.
    Stopping,
    /// Waiting for the ESC to disarm.
    EscDisarming,
    /// A command failed at the hardware layer.
    Error,
    /// Halted; the mode must be restarted.
    EmergencyStop,
}

impl ManualState {
    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ManualState::Idle => "Idle",
            ManualState::Initializing => "Initializing",
            ManualState::Ready => "Ready",
            ManualState::EscArming => "ESC Arming",
            ManualState::Active => "Active",
            ManualState::MovingForward => "Moving Forward",
            ManualState::MovingBackward => "Moving Backward",
            ManualState::Stopping => "Stopping",
            ManualState::EscDisarming => "ESC Disarming",
            ManualState::Error => "Error",
            ManualState::EmergencyStop => "Emergency Stop",
        }
    }
}

/// Operator command.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub enum ManualCommand {
    /// Explicit speed and direction.
    SetSpeed {
        /// Requested speed, m/s
        speed_ms: f32,
        /// Direction
        forward: bool,
    },
    /// Default speed forward.
    Forward,
    /// Default speed backward.
    Backward,
    /// Stop the motor.
    Stop,
    /// Start the arming sequence.
    ArmEsc,
    /// Stop and disarm.
    DisarmEsc,
    /// Neutral output immediately.
    EmergencyStop,
    /// Target speed plus one increment.
    IncreaseSpeed,
    /// Target speed minus one increment, floored at zero.
    DecreaseSpeed,
}

impl ManualCommand {
    /// Returns the command as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ManualCommand::SetSpeed { .. } => "Set Speed",
            ManualCommand::Forward => "Forward",
            ManualCommand::Backward => "Backward",
            ManualCommand::Stop => "Stop",
            ManualCommand::ArmEsc => "Arm ESC",
            ManualCommand::DisarmEsc => "Disarm ESC",
            ManualCommand::EmergencyStop => "Emergency Stop",
            ManualCommand::IncreaseSpeed => "Increase Speed",
            ManualCommand::DecreaseSpeed => "Decrease Speed",
        }
    }
}

/// Fixed-window command rate limiter with a circular timestamp history.
#[derive(Clone, Debug)]
pub struct CommandRateLimiter {
    max_per_window: u32,
    window_ms: u64,
    window_start_ms: Option<u64>,
    in_window: u32,
    history: HistoryBuffer<u64, COMMAND_HISTORY_SIZE>,
}

impl CommandRateLimiter {
    /// Create a limiter allowing `max_per_window` commands per `window_ms`.
    pub fn new(max_per_window: u32, window_ms: u32) -> Self {
        Self {
            max_per_window,
            window_ms: u64::from(window_ms),
            window_start_ms: None,
            in_window: 0,
            history: HistoryBuffer::new(),
        }
    }

    /// Record a command if the limit allows it.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        let expired = self
            .window_start_ms
            .map_or(true, |start| now_ms.saturating_sub(start) >= self.window_ms);
        if expired {
            self.window_start_ms = Some(now_ms);
            self.in_window = 0;
        }
        if self.in_window >= self.max_per_window {
            return false;
        }
        self.history.write(now_ms);
        self.in_window += 1;
        true
    }

    /// Accepted commands within the last window, from the history.
    pub fn recent(&self, now_ms: u64) -> usize {
        // Oldest first, so skip everything that has aged out
        self.history
            .oldest_ordered()
            .skip_while(|&&t| now_ms.saturating_sub(t) >= self.window_ms)
            .count()
    }

    /// Forget all history.
    pub fn clear(&mut self) {
        *self = Self::new(self.max_per_window, self.window_ms as u32);
    }
}

/// Live manual mode status.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct ManualStatus {
    /// Current state
    pub state: ManualState,
    /// Last accepted speed, m/s
    pub target_speed_ms: f32,
    /// Measured speed, m/s
    pub current_speed_ms: f32,
    /// Last commanded direction
    pub direction: Direction,
    /// Target above the minimum speed
    pub motor_active: bool,
    /// ESC armed
    pub esc_armed: bool,
    /// ESC accepting duty updates
    pub esc_responding: bool,
    /// Last executed command
    pub last_command: Option<ManualCommand>,
    /// Where the last command came from
    pub last_command_source: ShortString,
    /// Commands executed this session
    pub command_count: u32,
    /// Commands rejected or failed this session
    pub error_count: u32,
    /// Consecutive failed Hall liveness checks
    pub hall_failures: u32,
    /// Human-readable status
    pub status_message: LongString,
    /// Last failure
    pub error_message: LongString,
}

/// Session statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct ManualSession {
    /// Session start time
    pub started_ms: u64,
    /// Commands executed
    pub total_commands: u32,
    /// Forward commands
    pub forward_commands: u32,
    /// Backward commands
    pub backward_commands: u32,
    /// Set/increase/decrease commands
    pub speed_changes: u32,
    /// Successful arm commands
    pub esc_arm_disarm_cycles: u32,
    /// Highest commanded speed, m/s
    pub max_speed_ms: f32,
    /// Distance covered, m
    pub total_distance_m: f32,
    /// Time with the motor active, ms
    pub motor_active_time_ms: u64,
    /// Distance over active time, m/s
    pub average_speed_ms: f32,
}

/// Manual control engine.
pub struct ManualEngine {
    config: ManualConfig,
    state: ManualState,
    state_since_ms: u64,
    status: ManualStatus,
    session: ManualSession,
    limiter: CommandRateLimiter,
    last_position_m: f32,
    last_update_ms: Option<u64>,
    last_motion_check_ms: u64,
    outbox: Outbox,
}

impl ManualEngine {
    /// Create an idle engine.
    pub fn new(config: &ManualConfig) -> Self {
        let mut status = ManualStatus::default();
        set_message(&mut status.status_message, "Manual mode ready");
        Self {
            config: config.clone(),
            state: ManualState::Idle,
            state_since_ms: 0,
            status,
            session: ManualSession::default(),
            limiter: CommandRateLimiter::new(config.max_commands_per_window, config.rate_window_ms),
            last_position_m: 0.0,
            last_update_ms: None,
            last_motion_check_ms: 0,
            outbox: Outbox::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> ManualState {
        self.state
    }

    /// Snapshot of the live status.
    pub fn status(&self) -> ManualStatus {
        self.status.clone()
    }

    /// Snapshot of the session statistics.
    pub fn session(&self) -> ManualSession {
        self.session
    }

    /// The rate limiter.
    pub fn limiter(&self) -> &CommandRateLimiter {
        &self.limiter
    }

    fn enter(&mut self, state: ManualState, now_ms: u64) {
        if self.state != state {
            info!(target: "manual", "{} -> {}", self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.state_since_ms = now_ms;
        self.status.state = state;
    }

    fn reject(&mut self, err: ControlError) -> Result<(), ControlError> {
        warn!(target: "manual", "Command rejected: {}", err);
        self.status.error_count += 1;
        format_message(&mut self.status.error_message, format_args!("{}", err));
        Err(err)
    }

    /// Speed a motion command asks for, or `None` for non-motion commands.
    fn requested_speed(&self, command: &ManualCommand) -> Result<Option<(f32, bool)>, ControlError> {
        let target = self.status.target_speed_ms;
        let forward = self.status.direction.is_forward();
        Ok(match *command {
            ManualCommand::SetSpeed { speed_ms, forward } => Some((speed_ms, forward)),
            ManualCommand::Forward => Some((self.config.default_speed_ms, true)),
            ManualCommand::Backward => Some((self.config.default_speed_ms, false)),
            ManualCommand::IncreaseSpeed => {
                let next = target + self.config.speed_increment_ms;
                if next > self.config.max_speed_ms + 1e-4 {
                    return Err(ControlError::InvalidArgument("already at maximum speed"));
                }
                Some((next.min(self.config.max_speed_ms), forward))
            }
            ManualCommand::DecreaseSpeed => {
                Some(((target - self.config.speed_increment_ms).max(0.0), forward))
            }
            ManualCommand::Stop
            | ManualCommand::ArmEsc
            | ManualCommand::DisarmEsc
            | ManualCommand::EmergencyStop => None,
        })
    }

    fn validate<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        command: &ManualCommand,
    ) -> Result<Option<(f32, bool)>, ControlError> {
        if !self.limiter.try_acquire(ctx.now_ms) {
            return Err(ControlError::RateLimited);
        }
        if !self.is_active() {
            return Err(ControlError::InvalidState("manual mode not active"));
        }

        let requested = self.requested_speed(command)?;
        if let Some((speed, _)) = requested {
            if !(0.0..=self.config.max_speed_ms).contains(&speed) {
                return Err(ControlError::InvalidArgument("speed out of range"));
            }
            if (speed - self.status.target_speed_ms).abs() > self.config.max_speed_step_ms + 1e-4 {
                return Err(ControlError::InvalidArgument("speed change too large"));
            }
            if speed > 0.0 && !ctx.hw.is_armed() {
                return Err(ControlError::InvalidState("ESC not armed"));
            }
        }

        if !ctx.sensors_validated() {
            return Err(ControlError::InvalidState("sensors no longer validated"));
        }
        if ctx.dynamic_accel_g() > self.config.max_impact_g {
            self.emergency_stop(ctx);
            return Err(ControlError::SafetyViolation("impact detected"));
        }
        if self.status.motor_active && self.status.hall_failures >= self.config.hall_failure_limit {
            return Err(ControlError::SafetyViolation("Hall sensor not responding"));
        }
        Ok(requested)
    }

    /// Validate and execute an operator command.
    pub fn execute<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        command: ManualCommand,
        source: &str,
    ) -> Result<(), ControlError> {
        if command == ManualCommand::EmergencyStop {
            self.emergency_stop(ctx);
            self.record(command, source);
            return Ok(());
        }

        let requested = match self.validate(ctx, &command) {
            Ok(requested) => requested,
            Err(e) => return self.reject(e),
        };
        info!(target: "manual", "Executing {} from {}", command.as_str(), source);

        let result = match (command, requested) {
            (ManualCommand::ArmEsc, _) => self.arm(ctx),
            (ManualCommand::DisarmEsc, _) => self.disarm(ctx),
            (ManualCommand::Stop, _) => self.stop_movement(ctx),
            (_, Some((speed, forward))) => self.set_speed(ctx, speed, forward),
            _ => Ok(()),
        };
        match result {
            Ok(()) => {
                match command {
                    ManualCommand::Forward => self.session.forward_commands += 1,
                    ManualCommand::Backward => self.session.backward_commands += 1,
                    ManualCommand::SetSpeed { .. }
                    | ManualCommand::IncreaseSpeed
                    | ManualCommand::DecreaseSpeed => self.session.speed_changes += 1,
                    _ => {}
                }
                self.record(command, source);
                Ok(())
            }
            Err(e) => self.reject(e),
        }
    }

    fn record(&mut self, command: ManualCommand, source: &str) {
        self.status.last_command = Some(command);
        self.status.last_command_source = short_string(source);
        self.status.command_count += 1;
        self.session.total_commands += 1;
    }

    fn set_speed<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        speed_ms: f32,
        forward: bool,
    ) -> Result<(), ControlError> {
        if let Err(e) = ctx.hw.set_motor_speed(speed_ms, forward) {
            error!(target: "manual", "Failed to set hardware speed: {}", e);
            return Err(e.into());
        }
        self.status.target_speed_ms = speed_ms;
        self.status.direction = Direction::from_forward(forward);
        let was_active = self.status.motor_active;
        self.status.motor_active = speed_ms > self.config.min_speed_ms;
        if self.status.motor_active && !was_active {
            self.last_motion_check_ms = ctx.now_ms;
            self.status.hall_failures = 0;
        }
        self.session.max_speed_ms = self.session.max_speed_ms.max(speed_ms);

        if self.status.motor_active {
            let state = if forward {
                ManualState::MovingForward
            } else {
                ManualState::MovingBackward
            };
            self.enter(state, ctx.now_ms);
            set_message(&mut self.status.status_message, "Motor active - manual control");
        } else {
            self.enter(ManualState::Active, ctx.now_ms);
            set_message(&mut self.status.status_message, "Motor stopped - ready for commands");
        }
        Ok(())
    }

    fn stop_movement<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if ctx.hw.is_armed() {
            ctx.hw.stop_motor()?;
        }
        self.status.target_speed_ms = 0.0;
        self.status.motor_active = false;
        self.enter(ManualState::Stopping, ctx.now_ms);
        set_message(&mut self.status.status_message, "Stopping motor...");
        Ok(())
    }

    fn arm<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if ctx.hw.is_armed() {
            info!(target: "manual", "ESC already armed");
            return Ok(());
        }
        ctx.hw.arm_esc(ctx.now_ms)?;
        self.session.esc_arm_disarm_cycles += 1;
        self.enter(ManualState::EscArming, ctx.now_ms);
        set_message(&mut self.status.status_message, "Arming ESC...");
        Ok(())
    }

    fn disarm<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        ctx.hw.cut_power(ctx.now_ms);
        ctx.hw.disarm_esc(ctx.now_ms)?;
        self.status.target_speed_ms = 0.0;
        self.status.motor_active = false;
        self.status.esc_armed = false;
        self.enter(ManualState::EscDisarming, ctx.now_ms);
        set_message(&mut self.status.status_message, "Disarming ESC...");
        Ok(())
    }

    fn safety_stop<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        reason: &'static str,
    ) -> Result<(), ControlError> {
        warn!(target: "manual", "Safety check failed: {}", reason);
        self.emergency_stop(ctx);
        set_message(&mut self.status.error_message, reason);
        Err(ControlError::SafetyViolation(reason))
    }

    /// Clear statistics and position without leaving the mode.
    pub fn reset_session<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        info!(target: "manual", "Resetting manual session");
        if self.status.motor_active {
            if let Err(e) = self.stop_movement(ctx) {
                warn!(target: "manual", "Stop during session reset failed: {}", e);
            }
        }
        self.session = ManualSession {
            started_ms: ctx.now_ms,
            ..ManualSession::default()
        };
        self.status.command_count = 0;
        self.status.error_count = 0;
        self.status.error_message.clear();
        ctx.hw.reset_position();
        self.last_position_m = 0.0;
        let message = if ctx.hw.is_armed() {
            "Session reset - ESC armed and ready"
        } else {
            "Session reset - ARM ESC to enable motor control"
        };
        set_message(&mut self.status.status_message, message);
    }

    /// Session duration so far.
    pub fn session_duration_ms(&self, now_ms: u64) -> u64 {
        if self.state == ManualState::Idle && self.session.started_ms == 0 {
            return 0;
        }
        now_ms.saturating_sub(self.session.started_ms)
    }

    /// Session statistics as `key=value` lines.
    pub fn export_session(&self, now_ms: u64) -> ReportString {
        let s = &self.session;
        let mut out = ReportString::new();
        let _ = write!(
            out,
            "MANUAL_MODE_SESSION_DATA\n\
             session_duration_ms={}\n\
             total_commands={}\n\
             forward_commands={}\n\
             backward_commands={}\n\
             speed_changes={}\n\
             esc_cycles={}\n\
             max_speed_ms={:.2}\n\
             total_distance_m={:.2}\n\
             motor_active_time_ms={}\n\
             average_speed_ms={:.2}\n\
             error_count={}\n",
            self.session_duration_ms(now_ms),
            s.total_commands,
            s.forward_commands,
            s.backward_commands,
            s.speed_changes,
            s.esc_arm_disarm_cycles,
            s.max_speed_ms,
            s.total_distance_m,
            s.motor_active_time_ms,
            s.average_speed_ms,
            self.status.error_count,
        );
        out
    }

    /// Operator help for the command keys.
    pub fn help_text(&self) -> ReportString {
        let c = &self.config;
        let mut out = ReportString::new();
        let _ = write!(
            out,
            "MANUAL MODE COMMANDS:\n\
             A = Arm ESC (required before movement)\n\
             D = Disarm ESC (safe state)\n\
             F = Move Forward ({:.1} m/s)\n\
             B = Move Backward ({:.1} m/s)\n\
             S = Stop movement\n\
             + = Increase speed (+{:.1} m/s)\n\
             - = Decrease speed (-{:.1} m/s)\n\
             E = Emergency stop (immediate)\n\
             Max Speed: {:.1} m/s\n\
             Rate Limit: {} commands/second",
            c.default_speed_ms,
            c.default_speed_ms,
            c.speed_increment_ms,
            c.speed_increment_ms,
            c.max_speed_ms,
            c.max_commands_per_window,
        );
        out
    }

    /// Commands that make sense in the current state.
    pub fn available_commands(&self) -> &'static str {
        match self.state {
            ManualState::Ready => "A=Arm ESC",
            ManualState::Active
            | ManualState::MovingForward
            | ManualState::MovingBackward
            | ManualState::Stopping => {
                "F=Forward, B=Backward, S=Stop, +=Faster, -=Slower, D=Disarm, E=Emergency"
            }
            _ => "No commands available in current state",
        }
    }

    fn track_motion(&mut self, now_ms: u64, position_m: f32) {
        self.session.total_distance_m += (position_m - self.last_position_m).abs();
        self.last_position_m = position_m;
        if let Some(last) = self.last_update_ms {
            if self.status.motor_active {
                self.session.motor_active_time_ms += now_ms.saturating_sub(last);
            }
        }
        self.last_update_ms = Some(now_ms);
        if self.session.motor_active_time_ms > 0 {
            self.session.average_speed_ms =
                self.session.total_distance_m / (self.session.motor_active_time_ms as f32 / 1000.0);
        }
    }

    /// Returns false once the liveness check has failed too often.
    fn check_hall_liveness<E: EscOutput>(&mut self, ctx: &EngineContext<'_, E>) -> bool {
        if !self.status.motor_active {
            return true;
        }
        let interval = u64::from(self.config.motion_check_interval_ms);
        if ctx.now_ms.saturating_sub(self.last_motion_check_ms) <= interval {
            return true;
        }
        self.last_motion_check_ms = ctx.now_ms;
        let silent = ctx
            .hw
            .time_since_last_pulse(ctx.now_ms)
            .map_or(true, |gap| gap > interval);
        if silent {
            self.status.hall_failures += 1;
            warn!(
                target: "manual",
                "No Hall pulse while moving ({}/{})",
                self.status.hall_failures, self.config.hall_failure_limit
            );
        } else {
            self.status.hall_failures = 0;
        }
        self.status.hall_failures < self.config.hall_failure_limit
    }
}

impl ModeEngine for ManualEngine {
    fn name(&self) -> &'static str {
        "Manual"
    }

    fn start<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if !ctx.sensors_validated() {
            set_message(&mut self.status.error_message, "Sensors not validated");
            return Err(ControlError::InvalidState("sensors not validated"));
        }
        let now = ctx.now_ms;
        self.session = ManualSession {
            started_ms: now,
            ..ManualSession::default()
        };
        self.status = ManualStatus {
            direction: Direction::Forward,
            ..ManualStatus::default()
        };
        self.limiter.clear();
        ctx.hw.reset_position();
        self.last_position_m = 0.0;
        self.last_update_ms = None;
        self.last_motion_check_ms = now;
        info!(target: "manual", "Manual mode started");
        self.enter(ManualState::Initializing, now);
        set_message(&mut self.status.status_message, "Manual mode starting");
        Ok(())
    }

    fn stop<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        immediate: bool,
    ) -> Result<(), ControlError> {
        if self.state == ManualState::Idle {
            return Ok(());
        }
        let now = ctx.now_ms;
        if immediate {
            ctx.hw.emergency_stop(now);
        } else {
            ctx.hw.cut_power(now);
        }
        if ctx.hw.is_armed() || ctx.hw.esc_state().is_arming() {
            ctx.hw.disarm_esc(now)?;
        }
        self.status.target_speed_ms = 0.0;
        self.status.motor_active = false;
        self.status.esc_armed = false;
        info!(
            target: "manual",
            "Manual mode stopped: {} commands, {:.2} m",
            self.session.total_commands, self.session.total_distance_m
        );
        self.enter(ManualState::Idle, now);
        set_message(&mut self.status.status_message, "Manual mode stopped");
        Ok(())
    }

    fn update<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError> {
        if matches!(self.state, ManualState::Idle | ManualState::EmergencyStop) {
            return Ok(());
        }
        let now = ctx.now_ms;
        self.status.current_speed_ms = ctx.hw.current_speed_ms();
        self.status.esc_armed = ctx.hw.is_armed();
        self.status.esc_responding = ctx.hw.is_esc_responding();
        self.track_motion(now, ctx.hw.position_m());

        match self.state {
            ManualState::Initializing => {
                if ctx.hw.is_armed() {
                    self.enter(ManualState::Active, now);
                    set_message(&mut self.status.status_message, "ESC armed - ready for motor commands");
                } else {
                    self.enter(ManualState::Ready, now);
                    set_message(
                        &mut self.status.status_message,
                        "Manual mode active - ARM ESC to enable motor control",
                    );
                }
            }
            ManualState::EscArming => {
                if ctx.hw.is_armed() {
                    info!(target: "manual", "ESC armed");
                    self.enter(ManualState::Active, now);
                    set_message(&mut self.status.status_message, "ESC armed - ready for motor commands");
                } else if ctx.hw.esc_state() == EscState::Disarmed {
                    self.enter(ManualState::Error, now);
                    set_message(&mut self.status.error_message, "Failed to arm ESC");
                    return Err(ControlError::InvalidState("ESC arming aborted"));
                }
            }
            ManualState::EscDisarming => {
                if ctx.hw.esc_state() == EscState::Disarmed {
                    self.enter(ManualState::Ready, now);
                    set_message(&mut self.status.status_message, "ESC disarmed - ready for arming");
                }
            }
            ManualState::Stopping => {
                if now.saturating_sub(self.state_since_ms) >= u64::from(self.config.stop_settle_ms) {
                    self.enter(ManualState::Active, now);
                    set_message(&mut self.status.status_message, "Motor stopped - ready for commands");
                }
            }
            _ => {}
        }

        if !ctx.sensors_validated() {
            return self.safety_stop(ctx, "sensors no longer validated");
        }
        if ctx.dynamic_accel_g() > self.config.max_impact_g {
            return self.safety_stop(ctx, "impact detected");
        }
        if self.status.esc_armed && !self.status.esc_responding && self.status.motor_active {
            return self.safety_stop(ctx, "ESC not responding");
        }
        if !self.check_hall_liveness(ctx) {
            return self.safety_stop(ctx, "Hall sensor not responding");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        !matches!(self.state, ManualState::Idle | ManualState::EmergencyStop)
    }

    fn emergency_stop<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) {
        warn!(target: "manual", "EMERGENCY STOP activated in manual mode");
        ctx.hw.emergency_stop(ctx.now_ms);
        self.status.target_speed_ms = 0.0;
        self.status.current_speed_ms = 0.0;
        self.status.motor_active = false;
        if self.state != ManualState::Idle {
            self.enter(ManualState::EmergencyStop, ctx.now_ms);
            set_message(&mut self.status.status_message, "EMERGENCY STOP - All motion halted");
        }
    }

    fn take_events(&mut self) -> Outbox {
        core::mem::take(&mut self.outbox)
    }
}
