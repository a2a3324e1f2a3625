//! Hardware control facade: the ESC driver plus the Hall processor.
//!
//! [`HardwareControl`] is the single owner of [`HardwareStatus`]. Mode
//! engines talk to the motor only through it, and every status read is a
//! snapshot copy.

use log::{info, warn};

use crate::config::HardwareConfig;
use crate::error::HardwareError;
use crate::esc::{EscDriver, EscState};
use crate::hall::HallProcessor;
use crate::traits::{Direction, EscOutput, HallObserver, PulseSource};

/// Snapshot of the hardware layer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize))]
pub struct HardwareStatus {
    /// ESC output initialized
    pub initialized: bool,
    /// ESC accepting speed commands
    pub armed: bool,
    /// Arming state
    pub esc_state: EscState,
    /// Last PWM write while armed succeeded
    pub esc_responding: bool,
    /// Duty on the wire
    pub current_duty: u32,
    /// Duty the rate limiter is moving toward
    pub target_duty: u32,
    /// Last accepted speed command, m/s
    pub target_speed_ms: f32,
    /// Measured speed, m/s
    pub current_speed_ms: f32,
    /// Last commanded direction
    pub direction: Direction,
    /// Rotations since the last reset
    pub rotation_count: u32,
    /// Signed position from the last reset, meters
    pub position_m: f32,
    /// Timestamp of the most recent pulse
    pub last_pulse_ms: Option<u64>,
    /// Hall sensor delivering pulses
    pub hall_healthy: bool,
    /// Pulses lost to a full queue
    pub dropped_pulses: u32,
    /// Duty rate limiting enabled
    pub rate_limiting: bool,
}

/// Owns the ESC driver and the Hall processor.
pub struct HardwareControl<E: EscOutput> {
    esc: EscDriver<E>,
    hall: HallProcessor,
    config: HardwareConfig,
    dropped_pulses: u32,
    commanded_since_ms: Option<u64>,
}

impl<E: EscOutput> HardwareControl<E> {
    /// Create the facade around an ESC output.
    pub fn new(output: E, config: &HardwareConfig) -> Self {
        Self {
            esc: EscDriver::new(output, config),
            hall: HallProcessor::new(config.wheel_circumference_m, config.speed_smoothing),
            config: config.clone(),
            dropped_pulses: 0,
            commanded_since_ms: None,
        }
    }

    /// Initialize the ESC output at neutral.
    pub fn init(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.esc.init(now_ms)?;
        info!(
            target: "hardware",
            "Hardware ready (wheel {:.4} m, max {:.1} m/s)",
            self.config.wheel_circumference_m,
            self.config.max_speed_ms
        );
        Ok(())
    }

    /// Drain pending pulses in arrival order.
    ///
    /// Each pulse updates speed and position, then the observer (if any) is
    /// notified. Returns the number of pulses processed.
    pub fn process_pulses<S: PulseSource + ?Sized>(
        &mut self,
        source: &mut S,
        mut observer: Option<&mut dyn HallObserver>,
    ) -> u32 {
        let mut processed = 0;
        while let Some(ts) = source.pop_pulse() {
            let count = self.hall.on_pulse(ts, self.esc.direction());
            if let Some(obs) = observer.as_mut() {
                obs.on_hall_pulse(ts, count);
            }
            processed += 1;
        }

        let dropped = source.dropped_pulses();
        if dropped > self.dropped_pulses {
            warn!(target: "hardware", "Hall queue overflow: {} pulses dropped", dropped - self.dropped_pulses);
            self.dropped_pulses = dropped;
        }
        processed
    }

    /// Periodic update: ESC timed steps, rate limiting and Hall health.
    ///
    /// The Hall health clock starts when motion is commanded; a fault clears
    /// again once the command drops back below the deadband.
    pub fn update(&mut self, now_ms: u64) {
        self.esc.update(now_ms);

        let commanded = self.esc.target_speed_ms() > self.config.speed_deadband_ms;
        if commanded {
            self.commanded_since_ms.get_or_insert(now_ms);
        } else {
            self.commanded_since_ms = None;
            self.hall.restore_health();
        }

        let was_healthy = self.hall.is_healthy();
        self.hall
            .check_timeout(now_ms, self.config.hall_timeout_ms, self.commanded_since_ms);
        if was_healthy && !self.hall.is_healthy() {
            warn!(target: "hardware", "Hall sensor timeout while motor commanded");
        }
    }

    // =========================================================================
    // Motor commands
    // =========================================================================

    /// Command speed and direction. See [`EscDriver::set_speed`].
    pub fn set_motor_speed(&mut self, speed_ms: f32, forward: bool) -> Result<(), HardwareError> {
        self.esc.set_speed(speed_ms, forward)
    }

    /// Ramp the motor to zero through the rate limiter.
    pub fn stop_motor(&mut self) -> Result<(), HardwareError> {
        let forward = self.esc.direction().is_forward();
        self.esc.set_speed(0.0, forward)
    }

    /// Neutral output immediately. Never fails.
    pub fn emergency_stop(&mut self, now_ms: u64) {
        self.esc.emergency_stop(now_ms);
    }

    /// Drop to neutral immediately so the trolley rolls freely.
    pub fn cut_power(&mut self, now_ms: u64) {
        self.esc.emergency_stop(now_ms);
    }

    /// Start the arming sequence.
    pub fn arm_esc(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.esc.arm(now_ms)
    }

    /// Start disarming.
    pub fn disarm_esc(&mut self, now_ms: u64) -> Result<(), HardwareError> {
        self.esc.disarm(now_ms)
    }

    /// Raw duty, bypassing the rate limiter. Bench diagnostics only; the
    /// control path always goes through [`set_motor_speed`](Self::set_motor_speed).
    #[cfg(test)]
    pub(crate) fn set_duty_direct(&mut self, duty: u32) -> Result<(), HardwareError> {
        self.esc.set_duty_direct(duty)
    }

    /// Enable or disable duty rate limiting.
    pub fn set_rate_limiting(&mut self, enabled: bool) {
        self.esc.set_rate_limiting(enabled);
    }

    // =========================================================================
    // Position
    // =========================================================================

    /// Restart the rotation count at zero.
    pub fn reset_rotation_count(&mut self) {
        self.hall.reset_rotation_count();
    }

    /// Zero position and rotation count.
    pub fn reset_position(&mut self) {
        self.hall.reset_position();
    }

    /// Rotations to meters.
    pub fn rotations_to_distance(&self, rotations: u32) -> f32 {
        self.hall.rotations_to_distance(rotations)
    }

    /// Meters to rotations.
    pub fn distance_to_rotations(&self, distance_m: f32) -> u32 {
        self.hall.distance_to_rotations(distance_m)
    }

    /// Milliseconds since the last pulse.
    pub fn time_since_last_pulse(&self, now_ms: u64) -> Option<u64> {
        self.hall.time_since_last_pulse(now_ms)
    }

    // =========================================================================
    // Readouts
    // =========================================================================

    /// Snapshot copy of the hardware state.
    pub fn status(&self) -> HardwareStatus {
        HardwareStatus {
            initialized: self.esc.is_initialized(),
            armed: self.esc.is_armed(),
            esc_state: self.esc.state(),
            esc_responding: self.esc.is_responding(),
            current_duty: self.esc.current_duty(),
            target_duty: self.esc.target_duty(),
            target_speed_ms: self.esc.target_speed_ms(),
            current_speed_ms: self.hall.current_speed_ms(),
            direction: self.esc.direction(),
            rotation_count: self.hall.rotation_count(),
            position_m: self.hall.position_m(),
            last_pulse_ms: self.hall.last_pulse_ms(),
            hall_healthy: self.hall.is_healthy(),
            dropped_pulses: self.dropped_pulses,
            rate_limiting: self.esc.rate_limiting(),
        }
    }

    /// ESC output initialized.
    pub fn is_initialized(&self) -> bool {
        self.esc.is_initialized()
    }

    /// ESC accepting speed commands.
    pub fn is_armed(&self) -> bool {
        self.esc.is_armed()
    }

    /// Arming state.
    pub fn esc_state(&self) -> EscState {
        self.esc.state()
    }

    /// Last PWM write while armed succeeded.
    pub fn is_esc_responding(&self) -> bool {
        self.esc.is_responding()
    }

    /// Hall sensor delivering pulses.
    pub fn is_hall_healthy(&self) -> bool {
        self.hall.is_healthy()
    }

    /// Measured speed, m/s.
    pub fn current_speed_ms(&self) -> f32 {
        self.hall.current_speed_ms()
    }

    /// Last accepted speed command, m/s.
    pub fn target_speed_ms(&self) -> f32 {
        self.esc.target_speed_ms()
    }

    /// Last commanded direction.
    pub fn direction(&self) -> Direction {
        self.esc.direction()
    }

    /// Signed position, meters.
    pub fn position_m(&self) -> f32 {
        self.hall.position_m()
    }

    /// Rotations since the last reset.
    pub fn rotation_count(&self) -> u32 {
        self.hall.rotation_count()
    }

    /// Timestamp of the most recent pulse.
    pub fn last_pulse_ms(&self) -> Option<u64> {
        self.hall.last_pulse_ms()
    }

    /// Highest accepted speed command.
    pub fn max_speed_ms(&self) -> f32 {
        self.config.max_speed_ms
    }

    /// Hardware configuration in use.
    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    /// The ESC driver.
    pub fn esc(&self) -> &EscDriver<E> {
        &self.esc
    }
}
