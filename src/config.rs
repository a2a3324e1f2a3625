//! Tunable parameters for the hardware layer and the three mode engines.
//!
//! Every threshold the firmware was tuned with lives here instead of in
//! literals, so a different wheel, chassis or ESC only needs a different
//! [`Config`]. Strings use `heapless::String` so the same structs work for
//! status messages without allocation.
//!
//! # Example
//!
//! ```rust
//! use trolley_core::config::{Config, HardwareConfig, ManualConfig};
//!
//! // Use defaults (61 mm wheel, 14-bit LEDC at 50 Hz)
//! let config = Config::default();
//! assert_eq!(config.hardware.max_speed_ms, 2.0);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_hardware(HardwareConfig::default().with_wheel_circumference_m(0.25))
//!     .with_manual(ManualConfig::default().with_default_speed(0.3));
//! assert_eq!(config.manual.default_speed_ms, 0.3);
//! ```

use heapless::String as HString;

/// Maximum length for short strings (command sources, store keys)
pub const MAX_SHORT_STRING: usize = 32;

/// Maximum length for status and error messages
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for status/error message strings
pub type LongString = HString<MAX_LONG_STRING>;

/// Maximum length for multi-line text reports
pub const MAX_REPORT_STRING: usize = 512;

/// Type alias for text reports (session export, help, detailed status)
pub type ReportString = HString<MAX_REPORT_STRING>;

// ============================================================================
// Helpers for creating heapless strings
// ============================================================================

fn truncate_to_boundary(s: &str, max: usize) -> &str {
    let take = s.len().min(max);
    let valid_end = s
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= take)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &s[..valid_end]
}

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let _ = hs.push_str(truncate_to_boundary(s, MAX_SHORT_STRING));
    hs
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    let mut hs = LongString::new();
    let _ = hs.push_str(truncate_to_boundary(s, MAX_LONG_STRING));
    hs
}

/// Replace the contents of a message buffer, truncating if too long.
pub fn set_message(target: &mut LongString, s: &str) {
    target.clear();
    let _ = target.push_str(truncate_to_boundary(s, MAX_LONG_STRING));
}

/// Format into a message buffer, truncating on overflow.
pub fn format_message(target: &mut LongString, args: core::fmt::Arguments<'_>) {
    use core::fmt::Write;
    target.clear();
    let _ = target.write_fmt(args);
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete trolley configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// ESC and Hall sensor parameters
    pub hardware: HardwareConfig,
    /// Sensor validation gate parameters
    pub sensors: SensorConfig,
    /// Wire learning parameters
    pub wire_learning: WireLearningConfig,
    /// Automatic cycling parameters
    pub automatic: AutomaticConfig,
    /// Manual control parameters
    pub manual: ManualConfig,
    /// Coordinator parameters
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Set hardware configuration
    pub fn with_hardware(mut self, hardware: HardwareConfig) -> Self {
        self.hardware = hardware;
        self
    }

    /// Set sensor gate configuration
    pub fn with_sensors(mut self, sensors: SensorConfig) -> Self {
        self.sensors = sensors;
        self
    }

    /// Set wire learning configuration
    pub fn with_wire_learning(mut self, wire_learning: WireLearningConfig) -> Self {
        self.wire_learning = wire_learning;
        self
    }

    /// Set automatic mode configuration
    pub fn with_automatic(mut self, automatic: AutomaticConfig) -> Self {
        self.automatic = automatic;
        self
    }

    /// Set manual mode configuration
    pub fn with_manual(mut self, manual: ManualConfig) -> Self {
        self.manual = manual;
        self
    }

    /// Set coordinator configuration
    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }
}

// ============================================================================
// Hardware Config
// ============================================================================

/// ESC, PWM and Hall sensor parameters.
///
/// Duty values are raw LEDC counts at 14-bit resolution and 50 Hz, so one
/// count is ~1.22 µs of pulse width (1000 µs = 819, 1500 µs = 1229,
/// 2000 µs = 1638).
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HardwareConfig {
    /// Wheel circumference in meters (one Hall pulse per revolution)
    pub wheel_circumference_m: f32,
    /// Highest speed the ESC driver accepts, m/s
    pub max_speed_ms: f32,
    /// Speeds below this map to exactly neutral duty
    pub speed_deadband_ms: f32,
    /// Periodic update cadence in milliseconds
    pub update_interval_ms: u32,
    /// No pulse for this long forces speed to zero
    pub hall_timeout_ms: u32,
    /// Weight of the previous speed estimate in the smoothing filter
    pub speed_smoothing: f32,
    /// Full-reverse duty
    pub esc_min_duty: u32,
    /// Stop duty
    pub esc_neutral_duty: u32,
    /// Full-forward duty
    pub esc_max_duty: u32,
    /// Duty held during the arming pulse
    pub esc_arm_duty: u32,
    /// Largest duty change per update when rate limiting
    pub max_duty_step: u32,
    /// Whether duty changes are rate limited
    pub rate_limiting: bool,
    /// Neutral hold before the arming pulse
    pub arm_neutral_ms: u32,
    /// Duration of the arming pulse
    pub arm_signal_ms: u32,
    /// Neutral hold while disarming
    pub disarm_hold_ms: u32,
    /// PWM frequency for the ESC signal
    pub pwm_frequency_hz: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            wheel_circumference_m: 0.1916,
            max_speed_ms: 2.0,
            speed_deadband_ms: 0.05,
            update_interval_ms: 20,
            hall_timeout_ms: 2000,
            speed_smoothing: 0.7,
            esc_min_duty: 819,
            esc_neutral_duty: 1229,
            esc_max_duty: 1638,
            esc_arm_duty: 819,
            max_duty_step: 100,
            rate_limiting: true,
            arm_neutral_ms: 1000,
            arm_signal_ms: 3000,
            disarm_hold_ms: 500,
            pwm_frequency_hz: 50,
        }
    }
}

impl HardwareConfig {
    /// Set the wheel circumference
    pub fn with_wheel_circumference_m(mut self, meters: f32) -> Self {
        self.wheel_circumference_m = meters.max(0.001);
        self
    }

    /// Set the maximum accepted speed
    pub fn with_max_speed(mut self, speed_ms: f32) -> Self {
        self.max_speed_ms = speed_ms.max(0.0);
        self
    }

    /// Enable or disable duty rate limiting
    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.rate_limiting = enabled;
        self
    }

    /// Set the Hall timeout
    pub fn with_hall_timeout_ms(mut self, ms: u32) -> Self {
        self.hall_timeout_ms = ms;
        self
    }

    /// Set the arming sequence timing
    pub fn with_arm_timing(mut self, neutral_ms: u32, signal_ms: u32) -> Self {
        self.arm_neutral_ms = neutral_ms;
        self.arm_signal_ms = signal_ms;
        self
    }

    /// Total duration of the arming sequence
    pub fn arm_sequence_ms(&self) -> u32 {
        self.arm_neutral_ms + self.arm_signal_ms
    }
}

// ============================================================================
// Sensor Config
// ============================================================================

/// Sensor validation gate parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorConfig {
    /// Time allowed for the wheel rotation step
    pub hall_validation_timeout_ms: u32,
    /// Time allowed for the trolley shake step
    pub accel_validation_timeout_ms: u32,
    /// Dynamic acceleration that counts as a shake
    pub shake_threshold_g: f32,
    /// Dynamic acceleration recorded as an impact after validation
    pub impact_record_threshold_g: f32,
    /// RPM readout is zeroed after this long without pulses
    pub hall_pulse_timeout_ms: u32,
    /// Remove 1 g of gravity from the magnitude before thresholding
    pub gravity_compensation: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            hall_validation_timeout_ms: 60_000,
            accel_validation_timeout_ms: 60_000,
            shake_threshold_g: 0.3,
            impact_record_threshold_g: 0.1,
            hall_pulse_timeout_ms: 5000,
            gravity_compensation: true,
        }
    }
}

impl SensorConfig {
    /// Set both validation step timeouts
    pub fn with_validation_timeout_ms(mut self, ms: u32) -> Self {
        self.hall_validation_timeout_ms = ms;
        self.accel_validation_timeout_ms = ms;
        self
    }

    /// Set the shake threshold
    pub fn with_shake_threshold_g(mut self, g: f32) -> Self {
        self.shake_threshold_g = g;
        self
    }
}

// ============================================================================
// Wire End Detection Config
// ============================================================================

/// Thresholds for the three wire-end detectors
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireEndConfig {
    /// Dynamic acceleration that counts as hitting the wire end
    pub impact_threshold_g: f32,
    /// Gap since the last pulse that counts as one timeout observation
    pub hall_timeout_ms: u32,
    /// Consecutive timeout observations required
    pub hall_timeout_confirmations: u32,
    /// Window average below this percentage of target is a speed drop
    pub speed_drop_percent: f32,
    /// Speed drop is only evaluated above this target speed
    pub speed_drop_min_target_ms: f32,
    /// Speed drop is suppressed for this long after a target change.
    ///
    /// Hardening on top of the plain five-sample average: the window also
    /// has to be full, so stale or zero samples taken while the wheel is
    /// still spinning up cannot end a run. Set to 0 to disable the settle
    /// period.
    pub speed_drop_settle_ms: u32,
}

impl Default for WireEndConfig {
    fn default() -> Self {
        Self {
            impact_threshold_g: 1.0,
            hall_timeout_ms: 2000,
            hall_timeout_confirmations: 3,
            speed_drop_percent: 70.0,
            speed_drop_min_target_ms: 0.2,
            speed_drop_settle_ms: 1000,
        }
    }
}

// ============================================================================
// Coasting Config
// ============================================================================

/// Coasting calibration parameters shared by wire learning and automatic mode
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoastingConfig {
    /// Speed at which power is cut for the measurement
    pub calibration_speed_ms: f32,
    /// Calibration speed counts as reached within this margin
    pub reached_tolerance_ms: f32,
    /// Added to the measured coast distance to get the cut-off point
    pub safety_margin_m: f32,
    /// Shortest plausible coast distance
    pub min_distance_m: f32,
    /// Longest plausible coast distance
    pub max_distance_m: f32,
    /// Below this speed the trolley counts as stopped
    pub stopped_speed_ms: f32,
    /// Measurement gives up after this long
    pub timeout_ms: u32,
}

impl Default for CoastingConfig {
    fn default() -> Self {
        Self {
            calibration_speed_ms: 5.0,
            reached_tolerance_ms: 0.2,
            safety_margin_m: 2.0,
            min_distance_m: 0.5,
            max_distance_m: 50.0,
            stopped_speed_ms: 0.1,
            timeout_ms: 30_000,
        }
    }
}

// ============================================================================
// Wire Learning Config
// ============================================================================

/// Wire learning parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireLearningConfig {
    /// First test speed in each direction
    pub start_speed_ms: f32,
    /// Highest test speed
    pub max_speed_ms: f32,
    /// Step between test speeds
    pub speed_increment_ms: f32,
    /// Overall learning timeout.
    ///
    /// At the 0.1 m/s start speed ten pulses take about 19 s, so the first
    /// speed is never validated and the run crawls the whole wire. The
    /// default leaves room for that crawl on a wire of about 25 m.
    pub timeout_ms: u32,
    /// Allowed forward/reverse disagreement in percent
    pub length_tolerance_percent: f32,
    /// Shortest plausible wire
    pub min_length_m: f32,
    /// Longest plausible wire
    pub max_length_m: f32,
    /// Pulses needed to validate a test speed
    pub min_hall_pulses: u32,
    /// Time allowed to validate a test speed
    pub speed_validation_timeout_ms: u32,
    /// Pause between speed steps
    pub speed_step_pause_ms: u32,
    /// Pause between forward and reverse runs
    pub direction_pause_ms: u32,
    /// Highest test speed that triggers the coasting side measurement
    pub coasting_trigger_speed_ms: f32,
    /// Cruise recommendation = learning speed × this factor
    pub cruise_speed_factor: f32,
    /// Minimum accuracy for a stored result to be usable
    pub min_accuracy_percent: f32,
    /// Wire end detector thresholds
    pub detection: WireEndConfig,
    /// Coasting measurement parameters
    pub coasting: CoastingConfig,
}

impl Default for WireLearningConfig {
    fn default() -> Self {
        Self {
            start_speed_ms: 0.1,
            max_speed_ms: 1.0,
            speed_increment_ms: 0.1,
            timeout_ms: 600_000,
            length_tolerance_percent: 5.0,
            min_length_m: 2.0,
            max_length_m: 2000.0,
            min_hall_pulses: 10,
            speed_validation_timeout_ms: 3000,
            speed_step_pause_ms: 500,
            direction_pause_ms: 2000,
            coasting_trigger_speed_ms: 4.0,
            cruise_speed_factor: 1.5,
            min_accuracy_percent: 90.0,
            detection: WireEndConfig::default(),
            coasting: CoastingConfig::default(),
        }
    }
}

impl WireLearningConfig {
    /// Set the overall timeout
    pub fn with_timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Set the speed progression
    pub fn with_speed_range(mut self, start: f32, max: f32, increment: f32) -> Self {
        self.start_speed_ms = start;
        self.max_speed_ms = max.max(start);
        self.speed_increment_ms = increment;
        self
    }

    /// Set the forward/reverse tolerance
    pub fn with_tolerance_percent(mut self, percent: f32) -> Self {
        self.length_tolerance_percent = percent;
        self
    }
}

// ============================================================================
// Automatic Config
// ============================================================================

/// Automatic cycling parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutomaticConfig {
    /// Cruise ceiling (further limited by the ESC maximum)
    pub max_speed_ms: f32,
    /// Speed the acceleration ramp starts from
    pub start_speed_ms: f32,
    /// Acceleration rate, m/s²
    pub accel_rate_ms2: f32,
    /// Deceleration rate for the stop ramp, m/s²
    pub decel_rate_ms2: f32,
    /// Minimum learned wire length for automatic mode
    pub min_wire_length_m: f32,
    /// Cycles before the engine completes on its own
    pub max_cycles: u32,
    /// Pause after a full forward+reverse cycle
    pub cycle_pause_ms: u32,
    /// Pause before reversing
    pub direction_pause_ms: u32,
    /// A single run longer than this is treated as a fault
    pub direction_timeout_ms: u32,
    /// Creep speed used at the wire end
    pub approach_speed_ms: f32,
    /// How long to creep at the wire end
    pub approach_time_ms: u32,
    /// Impact above this outside the wire-end approach stops the run
    pub max_impact_g: f32,
    /// Ramp step period (10 steps per second)
    pub ramp_step_ms: u32,
    /// Wire end detector thresholds
    pub detection: WireEndConfig,
    /// Coasting calibration parameters
    pub coasting: CoastingConfig,
}

impl Default for AutomaticConfig {
    fn default() -> Self {
        Self {
            max_speed_ms: 5.0,
            start_speed_ms: 0.1,
            accel_rate_ms2: 0.5,
            decel_rate_ms2: 0.3,
            min_wire_length_m: 2.0,
            max_cycles: 1000,
            cycle_pause_ms: 5000,
            direction_pause_ms: 3000,
            direction_timeout_ms: 300_000,
            approach_speed_ms: 1.0,
            approach_time_ms: 500,
            max_impact_g: 0.5,
            ramp_step_ms: 100,
            detection: WireEndConfig::default(),
            coasting: CoastingConfig::default(),
        }
    }
}

impl AutomaticConfig {
    /// Set the cycle limit
    pub fn with_max_cycles(mut self, cycles: u32) -> Self {
        self.max_cycles = cycles.max(1);
        self
    }

    /// Set the pauses between runs and cycles
    pub fn with_pauses_ms(mut self, direction_ms: u32, cycle_ms: u32) -> Self {
        self.direction_pause_ms = direction_ms;
        self.cycle_pause_ms = cycle_ms;
        self
    }

    /// Set the coasting safety margin
    pub fn with_safety_margin_m(mut self, meters: f32) -> Self {
        self.coasting.safety_margin_m = meters.max(0.0);
        self
    }
}

// ============================================================================
// Manual Config
// ============================================================================

/// Manual control parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManualConfig {
    /// Highest speed a manual command may request
    pub max_speed_ms: f32,
    /// Below this the motor counts as inactive
    pub min_speed_ms: f32,
    /// Step for `+` and `-`
    pub speed_increment_ms: f32,
    /// Speed used by forward/backward
    pub default_speed_ms: f32,
    /// Largest change a single command may request
    pub max_speed_step_ms: f32,
    /// Impact that triggers an emergency stop
    pub max_impact_g: f32,
    /// Commands accepted per rate window
    pub max_commands_per_window: u32,
    /// Rate window length
    pub rate_window_ms: u32,
    /// Time spent in Stopping before returning to Active
    pub stop_settle_ms: u32,
    /// Interval between Hall liveness checks while moving
    pub motion_check_interval_ms: u32,
    /// Consecutive failed liveness checks before an emergency stop
    pub hall_failure_limit: u32,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            max_speed_ms: 2.0,
            min_speed_ms: 0.05,
            speed_increment_ms: 0.1,
            default_speed_ms: 0.5,
            max_speed_step_ms: 1.0,
            max_impact_g: 0.8,
            max_commands_per_window: 10,
            rate_window_ms: 1000,
            stop_settle_ms: 200,
            motion_check_interval_ms: 2000,
            hall_failure_limit: 3,
        }
    }
}

impl ManualConfig {
    /// Set the forward/backward speed
    pub fn with_default_speed(mut self, speed_ms: f32) -> Self {
        self.default_speed_ms = speed_ms.clamp(0.0, self.max_speed_ms);
        self
    }

    /// Set the command rate limit
    pub fn with_rate_limit(mut self, commands: u32, window_ms: u32) -> Self {
        self.max_commands_per_window = commands;
        self.rate_window_ms = window_ms;
        self
    }
}

// ============================================================================
// Coordinator Config
// ============================================================================

/// Mode coordinator parameters
#[derive(Clone, Debug)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordinatorConfig {
    /// Reported errors that force an emergency stop
    pub max_system_errors: u32,
    /// Quiet period after which the error count clears
    pub error_reset_ms: u32,
    /// Persistent storage namespace
    pub store_namespace: ShortString,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_system_errors: 10,
            error_reset_ms: 30_000,
            store_namespace: short_string("trolley_modes"),
        }
    }
}

impl CoordinatorConfig {
    /// Set the error threshold
    pub fn with_max_system_errors(mut self, errors: u32) -> Self {
        self.max_system_errors = errors.max(1);
        self
    }

    /// Set the storage namespace
    pub fn with_store_namespace(mut self, namespace: &str) -> Self {
        self.store_namespace = short_string(namespace);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
