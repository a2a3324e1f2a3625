//! Wire end detection shared by wire learning and automatic mode.
//!
//! Three detectors run every tick and the first match, in fixed priority,
//! ends the run:
//!
//! 1. **Impact** - dynamic acceleration above the threshold.
//! 2. **Speed drop** - the average of the last five measured speeds falls
//!    below a percentage of the commanded speed. Hardened against false
//!    triggers: it needs a full window and stays quiet for
//!    `speed_drop_settle_ms` after every speed change.
//! 3. **Hall timeout** - three consecutive observations with no pulse for
//!    longer than the timeout.

use heapless::HistoryBuffer;
use log::info;
use serde::{Deserialize, Serialize};

use crate::config::WireEndConfig;

/// Samples averaged by the speed drop detector.
pub const SPEED_WINDOW: usize = 5;

/// How a wire end was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Not detected.
    #[default]
    None,
    /// Acceleration spike.
    Impact,
    /// Measured speed collapsed.
    SpeedDrop,
    /// Wheel stopped turning.
    HallTimeout,
    /// Trolley coasted to a stop.
    Stopped,
}

impl DetectionMethod {
    /// Returns the method as a display string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::None => "none",
            DetectionMethod::Impact => "impact",
            DetectionMethod::SpeedDrop => "speed_drop",
            DetectionMethod::HallTimeout => "hall_timeout",
            DetectionMethod::Stopped => "stopped",
        }
    }
}

/// Inputs for one detector evaluation.
#[derive(Clone, Copy, Debug)]
pub struct DetectorInput {
    /// Current time
    pub now_ms: u64,
    /// Gravity-compensated acceleration, g
    pub dynamic_accel_g: f32,
    /// Measured speed, m/s
    pub measured_speed_ms: f32,
    /// Commanded speed, m/s
    pub target_speed_ms: f32,
    /// Timestamp of the most recent Hall pulse
    pub last_pulse_ms: Option<u64>,
}

/// Stateful wire-end detector.
#[derive(Clone, Debug)]
pub struct WireEndDetector {
    config: WireEndConfig,
    window: HistoryBuffer<f32, SPEED_WINDOW>,
    settle_until_ms: u64,
    hall_timeouts: u32,
    armed_at_ms: u64,
}

impl WireEndDetector {
    /// Create a detector with the given thresholds.
    pub fn new(config: &WireEndConfig) -> Self {
        Self {
            config: config.clone(),
            window: HistoryBuffer::new(),
            settle_until_ms: 0,
            hall_timeouts: 0,
            armed_at_ms: 0,
        }
    }

    /// Clear all detector state at the start of a run.
    ///
    /// Hall silence is measured from `now_ms` if no later pulse arrives.
    pub fn reset(&mut self, now_ms: u64) {
        self.clear_window();
        self.hall_timeouts = 0;
        self.armed_at_ms = now_ms;
        self.settle_until_ms = now_ms + u64::from(self.config.speed_drop_settle_ms);
    }

    /// Note a change of commanded speed.
    ///
    /// The speed window is cleared and speed drop detection is suppressed
    /// until the trolley has had time to follow.
    pub fn on_speed_change(&mut self, now_ms: u64) {
        self.clear_window();
        self.settle_until_ms = now_ms + u64::from(self.config.speed_drop_settle_ms);
    }

    /// Run all detectors. Returns the highest-priority match.
    pub fn evaluate(&mut self, input: &DetectorInput) -> Option<DetectionMethod> {
        self.window.write(input.measured_speed_ms);

        let impact = self.check_impact(input.dynamic_accel_g);
        let drop = self.check_speed_drop(input.now_ms, input.target_speed_ms);
        let timeout = self.check_hall_timeout(input.now_ms, input.last_pulse_ms);

        let found = if impact {
            Some(DetectionMethod::Impact)
        } else if drop {
            Some(DetectionMethod::SpeedDrop)
        } else if timeout {
            Some(DetectionMethod::HallTimeout)
        } else {
            None
        };
        if let Some(method) = found {
            info!(target: "wire_end", "Wire end detected by {}", method.as_str());
        }
        found
    }

    /// Impact detector alone.
    pub fn check_impact(&self, dynamic_accel_g: f32) -> bool {
        dynamic_accel_g > self.config.impact_threshold_g
    }

    /// Average of the speed window, once it is full.
    pub fn window_average(&self) -> Option<f32> {
        if self.window.len() < self.window.capacity() {
            return None;
        }
        Some(self.window.iter().sum::<f32>() / SPEED_WINDOW as f32)
    }

    /// Consecutive Hall timeout observations so far.
    pub fn hall_timeout_count(&self) -> u32 {
        self.hall_timeouts
    }

    fn clear_window(&mut self) {
        self.window.clear();
    }

    fn check_speed_drop(&self, now_ms: u64, target_speed_ms: f32) -> bool {
        if target_speed_ms <= self.config.speed_drop_min_target_ms || now_ms < self.settle_until_ms {
            return false;
        }
        match self.window_average() {
            Some(avg) => avg < target_speed_ms * self.config.speed_drop_percent / 100.0,
            None => false,
        }
    }

    fn check_hall_timeout(&mut self, now_ms: u64, last_pulse_ms: Option<u64>) -> bool {
        let since = last_pulse_ms.map_or(self.armed_at_ms, |t| t.max(self.armed_at_ms));
        if now_ms.saturating_sub(since) > u64::from(self.config.hall_timeout_ms) {
            self.hall_timeouts += 1;
        } else {
            self.hall_timeouts = 0;
        }
        self.hall_timeouts >= self.config.hall_timeout_confirmations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(now_ms: u64, accel: f32, speed: f32, target: f32, last: Option<u64>) -> DetectorInput {
        DetectorInput {
            now_ms,
            dynamic_accel_g: accel,
            measured_speed_ms: speed,
            target_speed_ms: target,
            last_pulse_ms: last,
        }
    }

    #[test]
    fn impact_wins() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        let found = d.evaluate(&input(100, 1.2, 0.5, 0.5, Some(90)));
        assert_eq!(found, Some(DetectionMethod::Impact));
    }

    #[test]
    fn impact_at_threshold_is_ignored() {
        let d = WireEndDetector::new(&WireEndConfig::default());
        assert!(!d.check_impact(1.0));
        assert!(d.check_impact(1.01));
    }

    #[test]
    fn speed_drop_needs_full_window() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        for i in 0..4 {
            let t = 2000 + i * 20;
            assert_eq!(d.evaluate(&input(t, 0.0, 0.0, 1.0, Some(t))), None);
        }
        assert_eq!(
            d.evaluate(&input(2080, 0.0, 0.0, 1.0, Some(2080))),
            Some(DetectionMethod::SpeedDrop)
        );
    }

    #[test]
    fn speed_drop_suppressed_while_settling() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        d.on_speed_change(5000);
        for i in 0..10 {
            let t = 5000 + i * 20;
            assert_eq!(d.evaluate(&input(t, 0.0, 0.0, 1.0, Some(t))), None);
        }
    }

    #[test]
    fn speed_drop_ignored_at_low_target() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        for i in 0..10 {
            let t = 2000 + i * 20;
            assert_eq!(d.evaluate(&input(t, 0.0, 0.0, 0.2, Some(t))), None);
        }
    }

    #[test]
    fn healthy_speed_no_drop() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        for i in 0..10 {
            let t = 2000 + i * 20;
            assert_eq!(d.evaluate(&input(t, 0.0, 0.8, 1.0, Some(t))), None);
        }
        assert!((d.window_average().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn hall_timeout_needs_three_observations() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        assert_eq!(d.evaluate(&input(2001, 0.0, 0.1, 0.1, Some(0))), None);
        assert_eq!(d.evaluate(&input(2021, 0.0, 0.1, 0.1, Some(0))), None);
        assert_eq!(d.hall_timeout_count(), 2);
        assert_eq!(
            d.evaluate(&input(2041, 0.0, 0.1, 0.1, Some(0))),
            Some(DetectionMethod::HallTimeout)
        );
    }

    #[test]
    fn pulse_resets_hall_timeout_count() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        d.evaluate(&input(2001, 0.0, 0.1, 0.1, Some(0)));
        d.evaluate(&input(2021, 0.0, 0.1, 0.1, Some(0)));
        d.evaluate(&input(2041, 0.0, 0.1, 0.1, Some(2030)));
        assert_eq!(d.hall_timeout_count(), 0);
    }

    #[test]
    fn hall_silence_measured_from_reset() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        // Last pulse long before this run started
        d.reset(10_000);
        assert_eq!(d.evaluate(&input(11_000, 0.0, 0.0, 0.1, Some(100))), None);
        assert_eq!(d.hall_timeout_count(), 0);
    }

    #[test]
    fn speed_drop_beats_hall_timeout() {
        let mut d = WireEndDetector::new(&WireEndConfig::default());
        d.reset(0);
        let mut found = None;
        // Both detectors fire on the fifth sample
        for i in 0..5 {
            let t = 3000 + i * 20;
            found = d.evaluate(&input(t, 0.0, 0.0, 1.0, Some(0)));
        }
        assert_eq!(found, Some(DetectionMethod::SpeedDrop));
    }
}
