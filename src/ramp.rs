//! Discrete speed ramps for automatic mode.
//!
//! A ramp moves a speed command from one value to another in equal steps,
//! one step per period. The first step is due immediately and the last step
//! lands exactly on the goal, so callers never have to fix up rounding.
//!
//! # Example
//!
//! ```rust
//! use trolley_core::ramp::SpeedRamp;
//!
//! // 1.0 m/s down to 0 at 0.5 m/s², 100 ms steps: 20 steps
//! let mut ramp = SpeedRamp::decelerate(1.0, 0.0, 0.5, 100, 0);
//! assert_eq!(ramp.steps(), 20);
//!
//! let first = ramp.poll(0).unwrap();
//! assert!((first - 0.95).abs() < 1e-6);
//! assert!(ramp.poll(50).is_none()); // next step not due yet
//! ```

/// A speed change split into fixed-period steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedRamp {
    from: f32,
    to: f32,
    steps: u32,
    step_ms: u32,
    started_ms: u64,
    emitted: u32,
}

impl SpeedRamp {
    /// Ramp at `rate_ms2`, rounding the step count up so no step exceeds
    /// the rate.
    pub fn accelerate(from: f32, to: f32, rate_ms2: f32, step_ms: u32, now_ms: u64) -> Self {
        let per_step = rate_ms2 * step_ms as f32 / 1000.0;
        let steps = if per_step > 0.0 {
            ((to - from).abs() / per_step).ceil() as u32
        } else {
            1
        };
        Self::with_steps(from, to, steps, step_ms, now_ms)
    }

    /// Ramp at `rate_ms2` with the step count rounded down,
    /// `steps = (Δv / rate) × steps per second`.
    pub fn decelerate(from: f32, to: f32, rate_ms2: f32, step_ms: u32, now_ms: u64) -> Self {
        let steps_per_s = 1000.0 / step_ms.max(1) as f32;
        let steps = if rate_ms2 > 0.0 {
            ((to - from).abs() / rate_ms2 * steps_per_s).floor() as u32
        } else {
            1
        };
        Self::with_steps(from, to, steps, step_ms, now_ms)
    }

    /// Ramp with an explicit step count (at least one).
    pub fn with_steps(from: f32, to: f32, steps: u32, step_ms: u32, now_ms: u64) -> Self {
        Self {
            from,
            to,
            steps: steps.max(1),
            step_ms: step_ms.max(1),
            started_ms: now_ms,
            emitted: 0,
        }
    }

    /// Value after `step` steps.
    pub fn value_at(&self, step: u32) -> f32 {
        if step >= self.steps {
            self.to
        } else {
            self.from + (self.to - self.from) * step as f32 / self.steps as f32
        }
    }

    /// Returns the next value if a new step is due.
    ///
    /// Late polls jump straight to the step that is due; skipped steps are
    /// not replayed.
    pub fn poll(&mut self, now_ms: u64) -> Option<f32> {
        if self.is_complete() {
            return None;
        }
        let elapsed = now_ms.saturating_sub(self.started_ms);
        let due = ((elapsed / u64::from(self.step_ms)) as u32)
            .saturating_add(1)
            .min(self.steps);
        if due <= self.emitted {
            return None;
        }
        self.emitted = due;
        Some(self.value_at(due))
    }

    /// All steps emitted.
    pub fn is_complete(&self) -> bool {
        self.emitted >= self.steps
    }

    /// Total number of steps.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Final value.
    pub fn goal(&self) -> f32 {
        self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerate_step_size_respects_rate() {
        // 0.5 m/s² at 100 ms = 0.05 m/s per step
        let mut ramp = SpeedRamp::accelerate(0.1, 1.0, 0.5, 100, 0);
        assert_eq!(ramp.steps(), 18);
        let first = ramp.poll(0).unwrap();
        assert!((first - 0.15).abs() < 1e-5);
    }

    #[test]
    fn decel_steps_are_floored() {
        // 1.0 / 0.3 * 10 = 33.3
        let ramp = SpeedRamp::decelerate(1.0, 0.0, 0.3, 100, 0);
        assert_eq!(ramp.steps(), 33);
    }

    #[test]
    fn tiny_change_still_takes_one_step() {
        let mut ramp = SpeedRamp::decelerate(0.02, 0.0, 0.3, 100, 0);
        assert_eq!(ramp.steps(), 1);
        assert_eq!(ramp.poll(0), Some(0.0));
        assert!(ramp.is_complete());
    }

    #[test]
    fn last_step_hits_goal_exactly() {
        let mut ramp = SpeedRamp::with_steps(0.7, 0.0, 3, 100, 1000);
        let mut last = None;
        for t in (1000..=1300).step_by(20) {
            if let Some(v) = ramp.poll(t) {
                last = Some(v);
            }
        }
        assert_eq!(last, Some(0.0));
        assert!(ramp.is_complete());
        assert!(ramp.poll(5000).is_none());
    }

    #[test]
    fn one_step_per_period() {
        let mut ramp = SpeedRamp::with_steps(0.0, 1.0, 10, 100, 0);
        assert!(ramp.poll(0).is_some());
        assert!(ramp.poll(20).is_none());
        assert!(ramp.poll(99).is_none());
        let v = ramp.poll(100).unwrap();
        assert!((v - 0.2).abs() < 1e-6);
    }

    #[test]
    fn late_poll_skips_ahead() {
        let mut ramp = SpeedRamp::with_steps(0.0, 1.0, 10, 100, 0);
        let v = ramp.poll(450).unwrap();
        assert!((v - 0.5).abs() < 1e-6);
    }
}
