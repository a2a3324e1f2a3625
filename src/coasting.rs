//! Coasting measurement shared by wire learning and automatic mode.
//!
//! Power is cut at a known speed and the trolley is left to roll out. The
//! distance covered until it counts as stopped tells automatic mode how far
//! before the wire end it has to cut power on every later run.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::CoastingConfig;

/// Result of a coasting measurement. Immutable once `calibrated`.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct CoastingCalibration {
    /// Measurement finished and passed its range checks
    pub calibrated: bool,
    /// Speed at which power was cut, m/s
    pub calibration_speed_ms: f32,
    /// Distance rolled after the cut, m
    pub coast_distance_m: f32,
    /// Time from cut to stop, ms
    pub coast_time_ms: u32,
    /// Average deceleration, m/s²
    pub decel_rate_ms2: f32,
    /// Distance before the wire end to cut power, m
    pub coast_start_distance_m: f32,
}

/// Outcome of one measurement step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CoastOutcome {
    /// Still rolling.
    Pending,
    /// Stopped within range.
    Done(CoastingCalibration),
    /// Timed out or stopped out of range.
    Failed(&'static str),
}

/// Timed-step coast measurement.
#[derive(Clone, Debug)]
pub struct CoastingMeasurement {
    config: CoastingConfig,
    active: bool,
    start_ms: u64,
    start_position_m: f32,
    start_speed_ms: f32,
}

impl CoastingMeasurement {
    /// Create an idle measurement.
    pub fn new(config: &CoastingConfig) -> Self {
        Self {
            config: config.clone(),
            active: false,
            start_ms: 0,
            start_position_m: 0.0,
            start_speed_ms: 0.0,
        }
    }

    /// Start measuring. The caller cuts motor power at the same time.
    pub fn begin(&mut self, now_ms: u64, position_m: f32, speed_ms: f32) {
        self.active = true;
        self.start_ms = now_ms;
        self.start_position_m = position_m;
        self.start_speed_ms = speed_ms;
        info!(
            target: "coasting",
            "Coasting measurement started at {:.2} m/s, position {:.2} m", speed_ms, position_m
        );
    }

    /// Abandon a running measurement.
    pub fn cancel(&mut self) {
        self.active = false;
    }

    /// True while a measurement is running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Distance rolled so far.
    pub fn distance_so_far(&self, position_m: f32) -> f32 {
        (position_m - self.start_position_m).abs()
    }

    /// Advance the measurement.
    pub fn update(&mut self, now_ms: u64, position_m: f32, measured_speed_ms: f32) -> CoastOutcome {
        if !self.active {
            return CoastOutcome::Pending;
        }
        let elapsed = now_ms.saturating_sub(self.start_ms);

        if measured_speed_ms < self.config.stopped_speed_ms {
            self.active = false;
            let distance = self.distance_so_far(position_m);
            if distance < self.config.min_distance_m || distance > self.config.max_distance_m {
                warn!(
                    target: "coasting",
                    "Coast distance {:.2} m outside {:.1}..={:.1} m",
                    distance, self.config.min_distance_m, self.config.max_distance_m
                );
                return CoastOutcome::Failed("coast distance out of range");
            }
            let time_s = elapsed as f32 / 1000.0;
            let decel = if time_s > 0.0 {
                self.start_speed_ms / time_s
            } else {
                0.0
            };
            let calibration = CoastingCalibration {
                calibrated: true,
                calibration_speed_ms: self.start_speed_ms,
                coast_distance_m: distance,
                coast_time_ms: elapsed.min(u64::from(u32::MAX)) as u32,
                decel_rate_ms2: decel,
                coast_start_distance_m: distance + self.config.safety_margin_m,
            };
            info!(
                target: "coasting",
                "Coasting complete: {:.2} m in {} ms, decel {:.2} m/s², cut at {:.2} m",
                calibration.coast_distance_m,
                calibration.coast_time_ms,
                calibration.decel_rate_ms2,
                calibration.coast_start_distance_m
            );
            return CoastOutcome::Done(calibration);
        }

        if elapsed > u64::from(self.config.timeout_ms) {
            self.active = false;
            warn!(target: "coasting", "Coasting measurement timed out");
            return CoastOutcome::Failed("coasting measurement timeout");
        }
        CoastOutcome::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_distance_and_decel() {
        let mut m = CoastingMeasurement::new(&CoastingConfig::default());
        m.begin(1000, 10.0, 2.0);
        assert_eq!(m.update(2000, 11.5, 1.0), CoastOutcome::Pending);

        match m.update(5000, 14.0, 0.05) {
            CoastOutcome::Done(c) => {
                assert!(c.calibrated);
                assert!((c.coast_distance_m - 4.0).abs() < 1e-5);
                assert_eq!(c.coast_time_ms, 4000);
                assert!((c.decel_rate_ms2 - 0.5).abs() < 1e-5);
                assert!((c.coast_start_distance_m - 6.0).abs() < 1e-5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!m.is_active());
    }

    #[test]
    fn reverse_coast_uses_absolute_distance() {
        let mut m = CoastingMeasurement::new(&CoastingConfig::default());
        m.begin(0, 20.0, 2.0);
        match m.update(3000, 17.0, 0.0) {
            CoastOutcome::Done(c) => assert!((c.coast_distance_m - 3.0).abs() < 1e-5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn too_short_coast_fails() {
        let mut m = CoastingMeasurement::new(&CoastingConfig::default());
        m.begin(0, 0.0, 2.0);
        assert_eq!(
            m.update(500, 0.2, 0.0),
            CoastOutcome::Failed("coast distance out of range")
        );
    }

    #[test]
    fn coast_times_out() {
        let mut m = CoastingMeasurement::new(&CoastingConfig::default());
        m.begin(0, 0.0, 2.0);
        assert_eq!(m.update(30_000, 5.0, 0.5), CoastOutcome::Pending);
        assert_eq!(
            m.update(30_001, 5.0, 0.5),
            CoastOutcome::Failed("coasting measurement timeout")
        );
    }

    #[test]
    fn idle_measurement_stays_pending() {
        let mut m = CoastingMeasurement::new(&CoastingConfig::default());
        assert_eq!(m.update(100, 0.0, 0.0), CoastOutcome::Pending);
        m.begin(0, 0.0, 1.0);
        m.cancel();
        assert_eq!(m.update(100, 9.0, 0.0), CoastOutcome::Pending);
    }
}
