//! Hardware abstraction traits for the ESC, Hall sensor, accelerometer and storage.
//!
//! These interfaces let the motion core run against the ESP32 peripherals or
//! against the desktop mocks used by the test suite.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`EscOutput`] | Raw PWM duty output to the ESC |
//! | [`PulseSource`] | Hall pulse timestamps captured by an interrupt |
//! | [`Accelerometer`] | 3-axis acceleration in g |
//! | [`ParamStore`] | Namespaced key/value blobs (NVS) |
//! | [`Clock`] | Monotonic millisecond time source |
//! | [`HallObserver`] | Per-pulse notification |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`]. For ESP32 hardware, use the
//! implementations from `hal::esp32` (requires `esp32` feature).
//!
//! # Example
//!
//! ```rust
//! use trolley_core::traits::{EscOutput, Accelerometer};
//! use trolley_core::hal::{MockEsc, MockAccelerometer};
//!
//! let mut esc = MockEsc::new();
//! esc.set_duty(1229).unwrap();
//! assert_eq!(esc.last_duty(), Some(1229));
//!
//! let mut accel = MockAccelerometer::new();
//! let sample = accel.read_g().unwrap();
//! assert!((sample.magnitude() - 1.0).abs() < 0.001);
//! ```

/// Direction of trolley travel along the wire.
///
/// # Default
///
/// Defaults to [`Forward`](Self::Forward), the direction wire learning
/// starts in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "status-serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Away from the home end (position increases).
    #[default]
    Forward,
    /// Towards the home end (position decreases).
    Reverse,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// # Examples
    ///
    /// ```
    /// use trolley_core::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Reverse.as_str(), "reverse");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Reverse => "reverse",
        }
    }

    /// Parse direction from text input.
    ///
    /// Accepts `"forward"`/`"fwd"`/`"1"` and `"reverse"`/`"rev"`/`"backward"`/`"-1"`,
    /// trimmed and case-insensitive.
    ///
    /// # Examples
    ///
    /// ```
    /// use trolley_core::Direction;
    ///
    /// assert_eq!(Direction::from_text("  FWD "), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text("backward"), Some(Direction::Reverse));
    /// assert_eq!(Direction::from_text("sideways"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" | "1" => Some(Direction::Forward),
            "reverse" | "rev" | "backward" | "back" | "-1" => Some(Direction::Reverse),
            _ => None,
        }
    }

    /// Build from the `forward` flag used by motor commands.
    #[inline]
    pub const fn from_forward(forward: bool) -> Self {
        if forward {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    /// True for [`Direction::Forward`].
    #[inline]
    pub const fn is_forward(&self) -> bool {
        matches!(self, Direction::Forward)
    }

    /// The other direction.
    #[inline]
    pub const fn opposite(&self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// +1.0 forward, -1.0 reverse.
    #[inline]
    pub const fn sign(&self) -> f32 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

/// ESC signal output - abstracts a 50 Hz servo-style PWM channel.
///
/// The driver in [`crate::esc`] owns all duty arithmetic; implementations
/// only have to put the raw count on the wire.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use trolley_core::traits::EscOutput;
///
/// struct MyPwm { /* timer handles */ }
///
/// impl EscOutput for MyPwm {
///     type Error = ();
///
///     fn set_duty(&mut self, duty: u32) -> Result<(), ()> {
///         // Write compare register...
///         Ok(())
///     }
/// }
/// ```
pub trait EscOutput {
    /// Error type for PWM writes.
    type Error: core::fmt::Debug;

    /// Write a raw duty count (14-bit at 50 Hz on the reference board).
    fn set_duty(&mut self, duty: u32) -> Result<(), Self::Error>;
}

/// Source of Hall pulse timestamps.
///
/// The interrupt side pushes millisecond timestamps into a bounded queue;
/// this is the consumer end, drained once per tick in arrival order.
pub trait PulseSource {
    /// Pop the oldest pending pulse timestamp.
    fn pop_pulse(&mut self) -> Option<u64>;

    /// Pulses discarded because the queue was full.
    fn dropped_pulses(&self) -> u32 {
        0
    }
}

/// One accelerometer reading in g.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "status-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccelSample {
    /// X axis
    pub x: f32,
    /// Y axis
    pub y: f32,
    /// Z axis
    pub z: f32,
}

impl AccelSample {
    /// A sample at rest with gravity on Z.
    pub const AT_REST: AccelSample = AccelSample {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    /// Create a sample from three axis values.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Vector magnitude including gravity.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Magnitude with 1 g of gravity removed.
    pub fn dynamic(&self) -> f32 {
        (self.magnitude() - 1.0).abs()
    }
}

/// 3-axis accelerometer.
pub trait Accelerometer {
    /// Error type for bus reads.
    type Error: core::fmt::Debug;

    /// Read a sample converted to g.
    fn read_g(&mut self) -> Result<AccelSample, Self::Error>;
}

/// Namespaced key/value blob storage.
///
/// Mirrors the NVS blob API: values are opaque byte strings the caller
/// encodes and decodes.
pub trait ParamStore {
    /// Error type for storage operations.
    type Error: core::fmt::Debug;

    /// Read a blob into `buf`. Returns the stored length, or `None` if the
    /// key does not exist.
    fn load(&mut self, namespace: &str, key: &str, buf: &mut [u8])
        -> Result<Option<usize>, Self::Error>;

    /// Write a blob, replacing any previous value.
    fn store(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Remove a key. Removing a missing key is not an error.
    fn erase(&mut self, namespace: &str, key: &str) -> Result<(), Self::Error>;
}

/// Time source trait.
///
/// Provides monotonic time in milliseconds for timed steps.
///
/// # Example
///
/// ```rust
/// use trolley_core::traits::Clock;
/// use trolley_core::hal::MockClock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(20);
/// assert_eq!(clock.now_ms(), 20);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

/// Receives one call per processed Hall pulse.
///
/// The hardware layer holds no observer of its own; callers pass at most one
/// into [`crate::hardware::HardwareControl::process_pulses`].
pub trait HallObserver {
    /// Called after the pulse has been folded into speed and position.
    fn on_hall_pulse(&mut self, timestamp_ms: u64, rotation_count: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Direction Tests
    // =========================================================================

    #[test]
    fn direction_default() {
        assert_eq!(Direction::default(), Direction::Forward);
    }

    #[test]
    fn direction_from_text() {
        assert_eq!(Direction::from_text("forward"), Some(Direction::Forward));
        assert_eq!(Direction::from_text("REV"), Some(Direction::Reverse));
        assert_eq!(Direction::from_text("\t-1\n"), Some(Direction::Reverse));
        assert_eq!(Direction::from_text(""), None);
        assert_eq!(Direction::from_text("stopped"), None);
    }

    #[test]
    fn direction_helpers() {
        assert_eq!(Direction::from_forward(true), Direction::Forward);
        assert_eq!(Direction::from_forward(false), Direction::Reverse);
        assert_eq!(Direction::Forward.opposite(), Direction::Reverse);
        assert_eq!(Direction::Reverse.opposite(), Direction::Forward);
        assert_eq!(Direction::Reverse.sign(), -1.0);
        assert!(!Direction::Reverse.is_forward());
    }

    // =========================================================================
    // AccelSample Tests
    // =========================================================================

    #[test]
    fn accel_at_rest_has_no_dynamic_component() {
        let s = AccelSample::AT_REST;
        assert!((s.magnitude() - 1.0).abs() < 1e-6);
        assert!(s.dynamic() < 1e-6);
    }

    #[test]
    fn accel_dynamic_removes_gravity() {
        let s = AccelSample::new(0.0, 0.0, 1.5);
        assert!((s.dynamic() - 0.5).abs() < 1e-6);

        // Free fall reads as 1 g of dynamic acceleration
        let s = AccelSample::new(0.0, 0.0, 0.0);
        assert!((s.dynamic() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn accel_magnitude_three_axes() {
        let s = AccelSample::new(2.0, 3.0, 6.0);
        assert!((s.magnitude() - 7.0).abs() < 1e-5);
    }

    // =========================================================================
    // PulseSource Default Methods Tests
    // =========================================================================

    struct VecSource(Vec<u64>);

    impl PulseSource for VecSource {
        fn pop_pulse(&mut self) -> Option<u64> {
            if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0))
            }
        }
    }

    #[test]
    fn pulse_source_default_drop_count() {
        let mut src = VecSource(vec![10, 20]);
        assert_eq!(src.dropped_pulses(), 0);
        assert_eq!(src.pop_pulse(), Some(10));
        assert_eq!(src.pop_pulse(), Some(20));
        assert_eq!(src.pop_pulse(), None);
    }
}
