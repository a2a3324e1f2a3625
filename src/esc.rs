//! ESC driver: arming sequence, speed-to-duty mapping and rate-limited output.
//!
//! The ESC expects a 50 Hz servo signal. With 14-bit LEDC resolution the
//! usable window is 819 (1.0 ms, full reverse) to 1638 (2.0 ms, full
//! forward) with neutral at 1229 (1.5 ms).
//!
//! Arming and disarming are timed steps advanced by [`EscDriver::update`],
//! so nothing in here ever blocks the control loop.
//!
//! ```text
//! Disarmed ──arm()──▶ ArmingNeutral ──1000ms──▶ ArmingSignal ──3000ms──▶ Armed
//!    ▲                                                                    │
//!    └────────────── 500ms ◀── Disarming ◀──────── disarm() ──────────────┘
//! ```

use log::{error, info, warn};

use crate::config::HardwareConfig;
use crate::error::HardwareError;
use crate::traits::{Direction, EscOutput};

/// Arming state of the ESC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum EscState {
    /// Output neutral, motor commands refused.
    #[default]
    Disarmed,
    /// First arming step: neutral hold.
    ArmingNeutral,
    /// Second arming step: minimum-duty pulse.
    ArmingSignal,
    /// Accepting speed commands.
    Armed,
    /// Neutral hold before reporting disarmed.
    Disarming,
}

impl EscState {
    /// Returns the state as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EscState::Disarmed => "disarmed",
            EscState::ArmingNeutral | EscState::ArmingSignal => "arming",
            EscState::Armed => "armed",
            EscState::Disarming => "disarming",
        }
    }

    /// True during either arming step.
    pub const fn is_arming(&self) -> bool {
        matches!(self, EscState::ArmingNeutral | EscState::ArmingSignal)
    }
}

/// Drives an [`EscOutput`] from speed commands.
pub struct EscDriver<E: EscOutput> {
    output: E,
    config: HardwareConfig,
    initialized: bool,
    state: EscState,
    state_since_ms: u64,
    current_duty: u32,
    target_duty: u32,
    target_speed_ms: f32,
    direction: Direction,
    responding: bool,
    write_failures: u32,
}

impl<E: EscOutput> EscDriver<E> {
    /// Create a driver. Nothing is written until [`init`](Self::init).
    pub fn new(output: E, config: &HardwareConfig) -> Self {
        Self {
            output,
            config: config.clone(),
            initialized: false,
            state: EscState::Disarmed,
            state_since_ms: 0,
            current_duty: config.esc_neutral_duty,
            target_duty: config.esc_neutral_duty,
            target_speed_ms: 0.0,
            direction: Direction::Forward,
            responding: false,
            write_failures: 0,
        }
    }

    /// Put neutral on the wire and accept commands from now on.
    pub fn init(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        let neutral = self.config.esc_neutral_duty;
        self.current_duty = neutral;
        self.target_duty = neutral;
        self.target_speed_ms = 0.0;
        self.state = EscState::Disarmed;
        self.state_since_ms = now_ms;
        self.output.set_duty(neutral).map_err(|e| {
            error!(target: "esc", "Failed to set neutral duty on init: {:?}", e);
            HardwareError::Pwm
        })?;
        self.initialized = true;
        info!(target: "esc", "ESC output initialized at neutral ({})", neutral);
        Ok(())
    }

    // =========================================================================
    // Arming
    // =========================================================================

    /// Begin the arming sequence. Arming an armed ESC is a no-op.
    pub fn arm(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        if !self.initialized {
            return Err(HardwareError::NotInitialized);
        }
        match self.state {
            EscState::Armed | EscState::ArmingNeutral | EscState::ArmingSignal => Ok(()),
            EscState::Disarmed | EscState::Disarming => {
                info!(target: "esc", "Arming ESC: neutral hold");
                self.target_speed_ms = 0.0;
                self.target_duty = self.config.esc_neutral_duty;
                self.enter(EscState::ArmingNeutral, now_ms);
                self.write_now(self.config.esc_neutral_duty)
            }
        }
    }

    /// Begin disarming: neutral output, then Disarmed after a short hold.
    pub fn disarm(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        if !self.initialized {
            return Err(HardwareError::NotInitialized);
        }
        self.target_speed_ms = 0.0;
        self.target_duty = self.config.esc_neutral_duty;
        let result = self.write_now(self.config.esc_neutral_duty);
        match self.state {
            EscState::Disarmed => {}
            EscState::ArmingNeutral | EscState::ArmingSignal => {
                warn!(target: "esc", "Disarm during arming sequence, aborting");
                self.enter(EscState::Disarmed, now_ms);
            }
            EscState::Armed | EscState::Disarming => {
                info!(target: "esc", "Disarming ESC");
                self.enter(EscState::Disarming, now_ms);
            }
        }
        self.responding = false;
        result
    }

    // =========================================================================
    // Speed and duty
    // =========================================================================

    /// Map a speed to a duty count.
    ///
    /// Speeds below the deadband give exactly neutral; the result is always
    /// inside the configured duty envelope.
    pub fn speed_to_duty(&self, speed_ms: f32, forward: bool) -> u32 {
        let cfg = &self.config;
        if !(speed_ms >= cfg.speed_deadband_ms) || cfg.max_speed_ms <= 0.0 {
            return cfg.esc_neutral_duty;
        }
        let ratio = (speed_ms / cfg.max_speed_ms).clamp(0.0, 1.0);
        let neutral = cfg.esc_neutral_duty as f32;
        let duty = if forward {
            neutral + ratio * (cfg.esc_max_duty - cfg.esc_neutral_duty) as f32
        } else {
            neutral - ratio * (cfg.esc_neutral_duty - cfg.esc_min_duty) as f32
        };
        (duty.round() as u32).clamp(cfg.esc_min_duty, cfg.esc_max_duty)
    }

    /// Command a speed and direction.
    ///
    /// Checks in order: initialized, speed in `0..=max`, armed. On error the
    /// previous target is left untouched.
    pub fn set_speed(&mut self, speed_ms: f32, forward: bool) -> Result<(), HardwareError> {
        if !self.initialized {
            return Err(HardwareError::NotInitialized);
        }
        if !(0.0..=self.config.max_speed_ms).contains(&speed_ms) {
            return Err(HardwareError::SpeedOutOfRange {
                speed: speed_ms,
                max: self.config.max_speed_ms,
            });
        }
        if self.state != EscState::Armed {
            return Err(HardwareError::NotArmed);
        }

        self.target_speed_ms = speed_ms;
        self.direction = Direction::from_forward(forward);
        self.target_duty = self.speed_to_duty(speed_ms, forward);

        if !self.config.rate_limiting {
            return self.write_now(self.target_duty);
        }
        Ok(())
    }

    /// Set a raw duty directly (diagnostics). Bypasses the rate limiter.
    pub fn set_duty_direct(&mut self, duty: u32) -> Result<(), HardwareError> {
        if !self.initialized {
            return Err(HardwareError::NotInitialized);
        }
        if self.state != EscState::Armed {
            return Err(HardwareError::NotArmed);
        }
        let (min, max) = (self.config.esc_min_duty, self.config.esc_max_duty);
        if !(min..=max).contains(&duty) {
            return Err(HardwareError::DutyOutOfRange { duty, min, max });
        }
        self.target_duty = duty;
        self.write_now(duty)
    }

    /// Immediate neutral output. Never fails; write errors are logged.
    ///
    /// An emergency stop during the arming sequence aborts it.
    pub fn emergency_stop(&mut self, now_ms: u64) {
        let neutral = self.config.esc_neutral_duty;
        self.target_speed_ms = 0.0;
        self.target_duty = neutral;
        if self.initialized {
            if let Err(e) = self.write_now(neutral) {
                error!(target: "esc", "Emergency stop write failed: {}", e);
            }
        } else {
            self.current_duty = neutral;
        }
        if self.state.is_arming() {
            warn!(target: "esc", "Emergency stop aborted arming sequence");
            self.enter(EscState::Disarmed, now_ms);
        }
    }

    /// Enable or disable duty rate limiting.
    pub fn set_rate_limiting(&mut self, enabled: bool) {
        self.config.rate_limiting = enabled;
    }

    // =========================================================================
    // Periodic update
    // =========================================================================

    /// Advance the arming/disarming steps and ramp the live duty.
    pub fn update(&mut self, now_ms: u64) {
        if !self.initialized {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.state_since_ms);

        match self.state {
            EscState::ArmingNeutral => {
                if elapsed >= u64::from(self.config.arm_neutral_ms) {
                    info!(target: "esc", "Arming ESC: arm signal");
                    self.enter(EscState::ArmingSignal, now_ms);
                    self.log_write(self.config.esc_arm_duty);
                }
            }
            EscState::ArmingSignal => {
                if elapsed >= u64::from(self.config.arm_signal_ms) {
                    self.enter(EscState::Armed, now_ms);
                    match self.write_now(self.config.esc_neutral_duty) {
                        Ok(()) => info!(target: "esc", "ESC armed"),
                        Err(e) => error!(target: "esc", "ESC armed but output failed: {}", e),
                    }
                }
            }
            EscState::Disarming => {
                if elapsed >= u64::from(self.config.disarm_hold_ms) {
                    info!(target: "esc", "ESC disarmed");
                    self.enter(EscState::Disarmed, now_ms);
                }
            }
            EscState::Armed => {
                if self.current_duty != self.target_duty {
                    let next = if self.config.rate_limiting {
                        step_toward(self.current_duty, self.target_duty, self.config.max_duty_step)
                    } else {
                        self.target_duty
                    };
                    self.log_write(next);
                }
            }
            EscState::Disarmed => {}
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current arming state.
    pub fn state(&self) -> EscState {
        self.state
    }

    /// True when speed commands are accepted.
    pub fn is_armed(&self) -> bool {
        self.state == EscState::Armed
    }

    /// True after a successful [`init`](Self::init).
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True if the last write while armed succeeded.
    pub fn is_responding(&self) -> bool {
        self.responding
    }

    /// Duty currently on the wire.
    pub fn current_duty(&self) -> u32 {
        self.current_duty
    }

    /// Duty the rate limiter is moving toward.
    pub fn target_duty(&self) -> u32 {
        self.target_duty
    }

    /// Last accepted speed command.
    pub fn target_speed_ms(&self) -> f32 {
        self.target_speed_ms
    }

    /// Last commanded direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether rate limiting is enabled.
    pub fn rate_limiting(&self) -> bool {
        self.config.rate_limiting
    }

    /// Failed PWM writes since boot.
    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    /// Access the underlying output.
    pub fn output(&self) -> &E {
        &self.output
    }

    /// Mutable access to the underlying output.
    pub fn output_mut(&mut self) -> &mut E {
        &mut self.output
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn enter(&mut self, state: EscState, now_ms: u64) {
        self.state = state;
        self.state_since_ms = now_ms;
    }

    fn write_now(&mut self, duty: u32) -> Result<(), HardwareError> {
        match self.output.set_duty(duty) {
            Ok(()) => {
                self.current_duty = duty;
                if self.state == EscState::Armed {
                    self.responding = true;
                }
                Ok(())
            }
            Err(e) => {
                self.write_failures = self.write_failures.saturating_add(1);
                self.responding = false;
                warn!(target: "esc", "PWM write of {} failed: {:?}", duty, e);
                Err(HardwareError::Pwm)
            }
        }
    }

    fn log_write(&mut self, duty: u32) {
        if let Err(e) = self.write_now(duty) {
            error!(target: "esc", "Duty update failed: {}", e);
        }
    }
}

fn step_toward(current: u32, target: u32, max_step: u32) -> u32 {
    if target > current {
        current + (target - current).min(max_step)
    } else {
        current - (current - target).min(max_step)
    }
}
