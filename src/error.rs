//! Error types for hardware control and mode engines.
//!
//! Low-level faults are returned as typed results and never abort. The
//! [`ErrorKind`] classification lets the coordinator decide whether a failure
//! is the caller's problem (bad argument, wrong state) or something that must
//! count against system health.

use thiserror::Error;

/// Errors raised by the ESC driver and Hall processor.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum HardwareError {
    /// The hardware layer has not been initialized yet.
    #[error("hardware not initialized")]
    NotInitialized,

    /// Requested speed is outside `0..=max` (or not a number).
    #[error("speed {speed:.2} m/s outside 0..={max:.2} m/s")]
    SpeedOutOfRange {
        /// Requested speed.
        speed: f32,
        /// Configured maximum.
        max: f32,
    },

    /// Motor command issued while the ESC is not armed.
    #[error("ESC not armed")]
    NotArmed,

    /// Raw duty value outside the configured envelope.
    #[error("duty {duty} outside {min}..={max}")]
    DutyOutOfRange {
        /// Requested duty.
        duty: u32,
        /// Minimum allowed duty.
        min: u32,
        /// Maximum allowed duty.
        max: u32,
    },

    /// The PWM peripheral rejected a duty update.
    #[error("PWM output failed")]
    Pwm,

    /// The ESC stopped acknowledging duty updates.
    #[error("ESC not responding")]
    EscNotResponding,

    /// No Hall pulse within the timeout while the motor was commanded.
    #[error("Hall sensor timeout")]
    HallSensorTimeout,
}

/// Errors raised by the mode engines, the sensor gate and the coordinator.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ControlError {
    /// Malformed or out-of-range input.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Operation not valid in the current mode or state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Manual command rejected by the per-second rate limit.
    #[error("command rate limit exceeded")]
    RateLimited,

    /// Hardware layer failure.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// A safety check failed; the motor has been stopped.
    #[error("safety violation: {0}")]
    SafetyViolation(&'static str),

    /// A measurement failed its plausibility checks.
    #[error("validation failed: {0}")]
    ValidationFailed(&'static str),

    /// Persistent storage read or write failed.
    #[error("storage error: {0}")]
    Storage(&'static str),
}

/// Coarse classification of a [`ControlError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Rejected synchronously, caller unaffected.
    InvalidArgument,
    /// Rejected synchronously, no hardware effect.
    InvalidState,
    /// Sticky hardware fault surfaced through system health.
    HardwareFault,
    /// Resolved by an emergency stop.
    SafetyViolation,
    /// Measurement rejected; the engine refuses to publish.
    ValidationFailure,
}

impl ControlError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ControlError::InvalidState(_) | ControlError::RateLimited => ErrorKind::InvalidState,
            ControlError::Hardware(hw) => match hw {
                HardwareError::SpeedOutOfRange { .. } | HardwareError::DutyOutOfRange { .. } => {
                    ErrorKind::InvalidArgument
                }
                HardwareError::NotArmed | HardwareError::NotInitialized => ErrorKind::InvalidState,
                HardwareError::Pwm
                | HardwareError::EscNotResponding
                | HardwareError::HallSensorTimeout => ErrorKind::HardwareFault,
            },
            ControlError::Storage(_) => ErrorKind::HardwareFault,
            ControlError::SafetyViolation(_) => ErrorKind::SafetyViolation,
            ControlError::ValidationFailed(_) => ErrorKind::ValidationFailure,
        }
    }

    /// Returns true if this error should count against system health.
    pub fn counts_against_health(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::HardwareFault | ErrorKind::SafetyViolation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_error_message() {
        let err = HardwareError::SpeedOutOfRange {
            speed: 3.0,
            max: 2.0,
        };
        assert_eq!(err.to_string(), "speed 3.00 m/s outside 0..=2.00 m/s");
    }

    #[test]
    fn hardware_errors_wrap_transparently() {
        let err: ControlError = HardwareError::NotArmed.into();
        assert_eq!(err.to_string(), "ESC not armed");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn taxonomy_mapping() {
        assert_eq!(
            ControlError::InvalidArgument("x").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(ControlError::RateLimited.kind(), ErrorKind::InvalidState);
        assert_eq!(
            ControlError::Hardware(HardwareError::HallSensorTimeout).kind(),
            ErrorKind::HardwareFault
        );
        assert_eq!(
            ControlError::ValidationFailed("asymmetric").kind(),
            ErrorKind::ValidationFailure
        );
    }

    #[test]
    fn only_faults_count_against_health() {
        assert!(!ControlError::RateLimited.counts_against_health());
        assert!(!ControlError::InvalidArgument("speed").counts_against_health());
        assert!(ControlError::SafetyViolation("impact").counts_against_health());
        assert!(ControlError::Hardware(HardwareError::Pwm).counts_against_health());
    }
}
