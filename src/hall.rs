//! Hall pulse pipeline: interrupt-side capture and consumer-side speed/position.
//!
//! One magnet on the wheel gives one pulse per revolution. The interrupt
//! handler only timestamps the pulse and pushes it into a bounded SPSC queue
//! through [`PulseCapture`]; everything involving floating point happens in
//! [`HallProcessor`] on the control loop, in arrival order.
//!
//! # Example
//!
//! ```rust
//! use core::sync::atomic::AtomicU32;
//! use trolley_core::hall::{split_queue, PulseQueue, HallProcessor};
//! use trolley_core::traits::{Direction, PulseSource};
//!
//! let mut queue = PulseQueue::new();
//! let dropped = AtomicU32::new(0);
//! let (mut capture, mut drain) = split_queue(&mut queue, &dropped);
//!
//! capture.capture(1000);
//! capture.capture(1200);
//!
//! let mut hall = HallProcessor::new(0.2, 0.7);
//! while let Some(ts) = drain.pop_pulse() {
//!     hall.on_pulse(ts, Direction::Forward);
//! }
//! assert_eq!(hall.rotation_count(), 2);
//! assert!((hall.current_speed_ms() - 1.0).abs() < 0.001);
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

use crate::traits::{Direction, PulseSource};

/// Pulses that can wait between two control ticks.
pub const PULSE_QUEUE_DEPTH: usize = 10;

/// Backing storage for the pulse queue (heapless keeps one slot free).
pub type PulseQueue = Queue<u64, { PULSE_QUEUE_DEPTH + 1 }>;

/// Split a queue into its interrupt and control-loop halves.
pub fn split_queue<'a>(
    queue: &'a mut PulseQueue,
    dropped: &'a AtomicU32,
) -> (PulseCapture<'a>, PulseDrain<'a>) {
    let (producer, consumer) = queue.split();
    (
        PulseCapture { producer, dropped },
        PulseDrain { consumer, dropped },
    )
}

// ============================================================================
// Interrupt side
// ============================================================================

/// Producer half, owned by the GPIO interrupt handler.
pub struct PulseCapture<'a> {
    producer: Producer<'a, u64, { PULSE_QUEUE_DEPTH + 1 }>,
    dropped: &'a AtomicU32,
}

impl PulseCapture<'_> {
    /// Record one pulse. Never blocks; a full queue drops the pulse.
    #[inline]
    pub fn capture(&mut self, timestamp_ms: u64) {
        if self.producer.enqueue(timestamp_ms).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Consumer half, drained by the control loop.
pub struct PulseDrain<'a> {
    consumer: Consumer<'a, u64, { PULSE_QUEUE_DEPTH + 1 }>,
    dropped: &'a AtomicU32,
}

impl PulseSource for PulseDrain<'_> {
    fn pop_pulse(&mut self) -> Option<u64> {
        self.consumer.dequeue()
    }

    fn dropped_pulses(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Consumer side
// ============================================================================

/// Turns pulse timestamps into speed, rotation count and position.
#[derive(Clone, Debug)]
pub struct HallProcessor {
    circumference_m: f32,
    smoothing: f32,
    total_rotations: u32,
    rotation_offset: u32,
    position_m: f32,
    last_pulse_ms: Option<u64>,
    speed_ms: f32,
    speed_seeded: bool,
    healthy: bool,
}

impl HallProcessor {
    /// Create a processor for the given wheel circumference.
    ///
    /// `smoothing` is the weight kept from the previous speed estimate.
    pub fn new(circumference_m: f32, smoothing: f32) -> Self {
        Self {
            circumference_m,
            smoothing: smoothing.clamp(0.0, 1.0),
            total_rotations: 0,
            rotation_offset: 0,
            position_m: 0.0,
            last_pulse_ms: None,
            speed_ms: 0.0,
            speed_seeded: false,
            healthy: false,
        }
    }

    /// Fold one pulse into the running state.
    ///
    /// Position moves by one circumference in `direction`, the last commanded
    /// direction. Returns the rotation count after this pulse.
    pub fn on_pulse(&mut self, timestamp_ms: u64, direction: Direction) -> u32 {
        self.total_rotations = self.total_rotations.wrapping_add(1);

        if let Some(prev) = self.last_pulse_ms {
            let dt_ms = timestamp_ms.saturating_sub(prev);
            if dt_ms > 0 {
                let measured = self.circumference_m / (dt_ms as f32 / 1000.0);
                self.speed_ms = if self.speed_seeded {
                    self.smoothing * self.speed_ms + (1.0 - self.smoothing) * measured
                } else {
                    measured
                };
                self.speed_seeded = true;
            }
        }

        self.position_m += direction.sign() * self.circumference_m;
        self.last_pulse_ms = Some(timestamp_ms);
        self.healthy = true;
        self.rotation_count()
    }

    /// Apply the timeout rule.
    ///
    /// Once a pulse has been seen, silence longer than `timeout_ms` forces the
    /// speed to zero. If motion has been commanded since `commanded_since_ms`
    /// and neither a pulse nor the command start falls inside the timeout,
    /// the sensor is marked unhealthy. Returns true if the speed was zeroed.
    pub fn check_timeout(
        &mut self,
        now_ms: u64,
        timeout_ms: u32,
        commanded_since_ms: Option<u64>,
    ) -> bool {
        let Some(last) = self.last_pulse_ms else {
            return false;
        };
        let timeout = u64::from(timeout_ms);
        if let Some(since) = commanded_since_ms {
            if now_ms.saturating_sub(last.max(since)) > timeout {
                self.healthy = false;
            }
        }
        if now_ms.saturating_sub(last) <= timeout {
            return false;
        }
        self.speed_ms = 0.0;
        self.speed_seeded = false;
        true
    }

    /// Clear a timeout fault once motion is no longer commanded.
    pub fn restore_health(&mut self) {
        self.healthy = self.last_pulse_ms.is_some();
    }

    /// Smoothed speed in m/s.
    #[inline]
    pub fn current_speed_ms(&self) -> f32 {
        self.speed_ms
    }

    /// Rotations since the last reset.
    #[inline]
    pub fn rotation_count(&self) -> u32 {
        self.total_rotations.wrapping_sub(self.rotation_offset)
    }

    /// Rotations since boot, ignoring resets.
    #[inline]
    pub fn total_rotations(&self) -> u32 {
        self.total_rotations
    }

    /// Signed position in meters from the last position reset.
    #[inline]
    pub fn position_m(&self) -> f32 {
        self.position_m
    }

    /// Timestamp of the most recent pulse.
    #[inline]
    pub fn last_pulse_ms(&self) -> Option<u64> {
        self.last_pulse_ms
    }

    /// True after a pulse until a timeout while commanded.
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Milliseconds since the last pulse, `None` if none was ever seen.
    pub fn time_since_last_pulse(&self, now_ms: u64) -> Option<u64> {
        self.last_pulse_ms.map(|t| now_ms.saturating_sub(t))
    }

    /// Restart the rotation count at zero.
    pub fn reset_rotation_count(&mut self) {
        self.rotation_offset = self.total_rotations;
    }

    /// Zero position and rotation count.
    pub fn reset_position(&mut self) {
        self.position_m = 0.0;
        self.reset_rotation_count();
    }

    /// Convert rotations to meters.
    #[inline]
    pub fn rotations_to_distance(&self, rotations: u32) -> f32 {
        rotations as f32 * self.circumference_m
    }

    /// Convert meters to whole rotations (rounded down).
    #[inline]
    pub fn distance_to_rotations(&self, distance_m: f32) -> u32 {
        if distance_m <= 0.0 {
            return 0;
        }
        (distance_m / self.circumference_m) as u32
    }

    /// Wheel circumference in meters.
    #[inline]
    pub fn circumference_m(&self) -> f32 {
        self.circumference_m
    }
}
