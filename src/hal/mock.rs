//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for all hardware traits, enabling
//! development and testing on desktop without a trolley on a wire.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockEsc`] | [`EscOutput`] | Records every duty write |
//! | [`MockPulseSource`] | [`PulseSource`] | Queued pulse timestamps |
//! | [`MockAccelerometer`] | [`Accelerometer`] | Steady sample plus one-shot spikes |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockParamStore`] | [`ParamStore`] | In-memory NVS |
//!
//! # Example
//!
//! ```rust
//! use trolley_core::hal::{MockEsc, MockPulseSource};
//! use trolley_core::hardware::HardwareControl;
//! use trolley_core::config::HardwareConfig;
//!
//! let mut hw = HardwareControl::new(MockEsc::new(), &HardwareConfig::default());
//! hw.init(0).unwrap();
//!
//! let mut pulses = MockPulseSource::new();
//! pulses.push(100);
//! pulses.push(300);
//! hw.process_pulses(&mut pulses, None);
//!
//! assert_eq!(hw.rotation_count(), 2);
//! ```
//!
//! [`EscOutput`]: crate::traits::EscOutput
//! [`PulseSource`]: crate::traits::PulseSource
//! [`Accelerometer`]: crate::traits::Accelerometer
//! [`Clock`]: crate::traits::Clock
//! [`ParamStore`]: crate::traits::ParamStore

use std::collections::{BTreeMap, VecDeque};

use crate::traits::{AccelSample, Accelerometer, Clock, EscOutput, ParamStore, PulseSource};

// ============================================================================
// Hardware Mocks
// ============================================================================

/// Mock ESC output for testing.
///
/// Records all duty writes for verification. Writes can be made to fail
/// to exercise the error paths.
///
/// # Example
///
/// ```rust
/// use trolley_core::hal::MockEsc;
/// use trolley_core::traits::EscOutput;
///
/// let mut esc = MockEsc::new();
/// esc.set_duty(1229).unwrap();
/// esc.set_duty(1329).unwrap();
///
/// assert_eq!(esc.last_duty(), Some(1329));
/// assert_eq!(esc.writes.len(), 2);
///
/// esc.set_fail(true);
/// assert!(esc.set_duty(1229).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MockEsc {
    /// Every successful duty write, oldest first.
    pub writes: Vec<u32>,
    /// Number of rejected writes.
    pub failed_writes: usize,
    fail: bool,
}

impl MockEsc {
    /// Creates a new mock ESC.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail(&mut self, fail: bool) {
        self.fail = fail;
    }

    /// Most recent successful write.
    pub fn last_duty(&self) -> Option<u32> {
        self.writes.last().copied()
    }
}

impl EscOutput for MockEsc {
    type Error = ();

    fn set_duty(&mut self, duty: u32) -> Result<(), ()> {
        if self.fail {
            self.failed_writes += 1;
            return Err(());
        }
        self.writes.push(duty);
        Ok(())
    }
}

/// Mock Hall pulse source.
///
/// Pulses come out in the order they were pushed.
///
/// # Example
///
/// ```rust
/// use trolley_core::hal::MockPulseSource;
/// use trolley_core::traits::PulseSource;
///
/// let mut src = MockPulseSource::new();
/// src.push_many(&[10, 20]);
///
/// assert_eq!(src.pop_pulse(), Some(10));
/// assert_eq!(src.pop_pulse(), Some(20));
/// assert_eq!(src.pop_pulse(), None);
/// ```
#[derive(Debug, Default)]
pub struct MockPulseSource {
    pending: VecDeque<u64>,
    dropped: u32,
}

impl MockPulseSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one pulse.
    pub fn push(&mut self, timestamp_ms: u64) {
        self.pending.push_back(timestamp_ms);
    }

    /// Queue several pulses.
    pub fn push_many(&mut self, timestamps: &[u64]) {
        self.pending.extend(timestamps.iter().copied());
    }

    /// Set the reported drop counter.
    pub fn set_dropped(&mut self, dropped: u32) {
        self.dropped = dropped;
    }

    /// Pulses not yet consumed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl PulseSource for MockPulseSource {
    fn pop_pulse(&mut self) -> Option<u64> {
        self.pending.pop_front()
    }

    fn dropped_pulses(&self) -> u32 {
        self.dropped
    }
}

/// Mock accelerometer.
///
/// Returns a steady sample (1 g on Z by default). One-shot samples queued
/// with [`spike`](Self::spike) are returned first, once each.
///
/// # Example
///
/// ```rust
/// use trolley_core::hal::MockAccelerometer;
/// use trolley_core::traits::{AccelSample, Accelerometer};
///
/// let mut accel = MockAccelerometer::new();
/// accel.spike(AccelSample::new(0.0, 0.0, 2.0));
///
/// assert_eq!(accel.read_g().unwrap().z, 2.0);
/// assert_eq!(accel.read_g().unwrap().z, 1.0);
/// ```
#[derive(Debug)]
pub struct MockAccelerometer {
    steady: AccelSample,
    spikes: VecDeque<AccelSample>,
    fail: bool,
    /// Number of reads performed.
    pub reads: usize,
}

impl MockAccelerometer {
    /// Creates a mock at rest.
    pub fn new() -> Self {
        Self {
            steady: AccelSample::AT_REST,
            spikes: VecDeque::new(),
            fail: false,
            reads: 0,
        }
    }

    /// Replace the steady sample.
    pub fn set(&mut self, sample: AccelSample) {
        self.steady = sample;
    }

    /// Queue a sample returned once before the steady value.
    pub fn spike(&mut self, sample: AccelSample) {
        self.spikes.push_back(sample);
    }

    /// Make reads fail (or succeed again).
    pub fn set_fail(&mut self, fail: bool) {
        self.fail = fail;
    }
}

impl Default for MockAccelerometer {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerometer for MockAccelerometer {
    type Error = ();

    fn read_g(&mut self) -> Result<AccelSample, ()> {
        self.reads += 1;
        if self.fail {
            return Err(());
        }
        Ok(self.spikes.pop_front().unwrap_or(self.steady))
    }
}

/// Mock clock for testing.
///
/// Time only advances when explicitly set or advanced.
///
/// # Example
///
/// ```rust
/// use trolley_core::hal::MockClock;
/// use trolley_core::traits::Clock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
///
/// clock.set(5000);
/// assert_eq!(clock.now_ms(), 5000);
/// ```
#[derive(Debug)]
pub struct MockClock {
    current_ms: u64,
}

impl MockClock {
    /// Creates a new mock clock at time 0.
    pub fn new() -> Self {
        Self { current_ms: 0 }
    }

    /// Sets the current time.
    pub fn set(&mut self, ms: u64) {
        self.current_ms = ms;
    }

    /// Advances time by the given amount.
    pub fn advance(&mut self, ms: u64) {
        self.current_ms += ms;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms
    }
}

// ============================================================================
// Storage Mock
// ============================================================================

/// Errors from [`MockParamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStoreError {
    /// Failure injected with [`MockParamStore::set_fail`].
    Injected,
    /// The caller's buffer is smaller than the stored blob.
    BufferTooSmall,
}

/// In-memory parameter store.
///
/// # Example
///
/// ```rust
/// use trolley_core::hal::MockParamStore;
/// use trolley_core::traits::ParamStore;
///
/// let mut store = MockParamStore::new();
/// store.store("ns", "key", b"hello").unwrap();
///
/// let mut buf = [0u8; 16];
/// assert_eq!(store.load("ns", "key", &mut buf).unwrap(), Some(5));
/// assert_eq!(&buf[..5], b"hello");
/// assert_eq!(store.load("ns", "missing", &mut buf).unwrap(), None);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MockParamStore {
    entries: BTreeMap<(String, String), Vec<u8>>,
    fail: bool,
    /// Number of successful writes.
    pub write_count: usize,
}

impl MockParamStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all operations fail (or succeed again).
    pub fn set_fail(&mut self, fail: bool) {
        self.fail = fail;
    }

    /// Raw stored bytes for a key.
    pub fn get(&self, namespace: &str, key: &str) -> Option<&[u8]> {
        self.entries
            .get(&(namespace.to_string(), key.to_string()))
            .map(Vec::as_slice)
    }

    /// True if the key exists.
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.get(namespace, key).is_some()
    }
}

impl ParamStore for MockParamStore {
    type Error = MockStoreError;

    fn load(
        &mut self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> Result<Option<usize>, MockStoreError> {
        if self.fail {
            return Err(MockStoreError::Injected);
        }
        match self.get(namespace, key) {
            None => Ok(None),
            Some(data) if data.len() > buf.len() => Err(MockStoreError::BufferTooSmall),
            Some(data) => {
                buf[..data.len()].copy_from_slice(data);
                Ok(Some(data.len()))
            }
        }
    }

    fn store(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), MockStoreError> {
        if self.fail {
            return Err(MockStoreError::Injected);
        }
        self.entries
            .insert((namespace.to_string(), key.to_string()), data.to_vec());
        self.write_count += 1;
        Ok(())
    }

    fn erase(&mut self, namespace: &str, key: &str) -> Result<(), MockStoreError> {
        if self.fail {
            return Err(MockStoreError::Injected);
        }
        self.entries
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // MockEsc Tests
    // =========================================================================

    #[test]
    fn mock_esc_records_writes() {
        let mut esc = MockEsc::new();
        assert_eq!(esc.last_duty(), None);
        esc.set_duty(1229).unwrap();
        esc.set_duty(1638).unwrap();
        assert_eq!(esc.writes, vec![1229, 1638]);
    }

    #[test]
    fn mock_esc_failure_injection() {
        let mut esc = MockEsc::new();
        esc.set_fail(true);
        assert!(esc.set_duty(1229).is_err());
        assert_eq!(esc.failed_writes, 1);
        assert!(esc.writes.is_empty());

        esc.set_fail(false);
        esc.set_duty(1229).unwrap();
        assert_eq!(esc.last_duty(), Some(1229));
    }

    // =========================================================================
    // MockPulseSource Tests
    // =========================================================================

    #[test]
    fn mock_pulse_source_fifo() {
        let mut src = MockPulseSource::new();
        src.push(5);
        src.push_many(&[6, 7]);
        assert_eq!(src.pending(), 3);
        assert_eq!(src.pop_pulse(), Some(5));
        assert_eq!(src.pop_pulse(), Some(6));
        assert_eq!(src.pop_pulse(), Some(7));
        assert_eq!(src.pop_pulse(), None);
    }

    // =========================================================================
    // MockAccelerometer Tests
    // =========================================================================

    #[test]
    fn mock_accel_default_at_rest() {
        let mut accel = MockAccelerometer::new();
        let s = accel.read_g().unwrap();
        assert!(s.dynamic() < 1e-6);
        assert_eq!(accel.reads, 1);
    }

    #[test]
    fn mock_accel_spikes_then_steady() {
        let mut accel = MockAccelerometer::new();
        accel.set(AccelSample::new(0.1, 0.0, 1.0));
        accel.spike(AccelSample::new(0.0, 0.0, 3.0));
        accel.spike(AccelSample::new(0.0, 0.0, 2.0));
        assert_eq!(accel.read_g().unwrap().z, 3.0);
        assert_eq!(accel.read_g().unwrap().z, 2.0);
        assert_eq!(accel.read_g().unwrap().x, 0.1);
    }

    #[test]
    fn mock_accel_failure() {
        let mut accel = MockAccelerometer::new();
        accel.set_fail(true);
        assert!(accel.read_g().is_err());
    }

    // =========================================================================
    // MockClock Tests
    // =========================================================================

    #[test]
    fn mock_clock_default() {
        let clock = MockClock::default();
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn mock_clock_advance() {
        let mut clock = MockClock::new();
        clock.advance(20);
        clock.advance(20);
        assert_eq!(clock.now_ms(), 40);
    }

    // =========================================================================
    // MockParamStore Tests
    // =========================================================================

    #[test]
    fn mock_store_namespaces_are_separate() {
        let mut store = MockParamStore::new();
        store.store("a", "k", b"1").unwrap();
        store.store("b", "k", b"22").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(store.load("a", "k", &mut buf).unwrap(), Some(1));
        assert_eq!(store.load("b", "k", &mut buf).unwrap(), Some(2));
        assert_eq!(store.write_count, 2);
    }

    #[test]
    fn mock_store_small_buffer() {
        let mut store = MockParamStore::new();
        store.store("ns", "k", b"too long").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(
            store.load("ns", "k", &mut buf),
            Err(MockStoreError::BufferTooSmall)
        );
    }

    #[test]
    fn mock_store_erase_and_fail() {
        let mut store = MockParamStore::new();
        store.store("ns", "k", b"x").unwrap();
        store.erase("ns", "k").unwrap();
        store.erase("ns", "k").unwrap();
        assert!(!store.contains("ns", "k"));

        store.set_fail(true);
        assert_eq!(store.store("ns", "k", b"x"), Err(MockStoreError::Injected));
    }
}
