//! ESP32 clock implementation using the ESP-IDF timer.

use crate::traits::Clock;

/// Milliseconds since boot from `esp_timer_get_time()`.
///
/// Also the timestamp source for the Hall interrupt, so pulse times and tick
/// times share one epoch.
///
/// # Example
///
/// ```ignore
/// use trolley_core::hal::esp32::Esp32Clock;
/// use trolley_core::traits::Clock;
///
/// let clock = Esp32Clock::new();
/// system.tick(clock.now_ms());
/// ```
pub struct Esp32Clock;

impl Esp32Clock {
    /// Creates a new ESP32 clock instance.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Default for Esp32Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for Esp32Clock {
    #[inline]
    fn now_ms(&self) -> u64 {
        boot_ms()
    }
}

/// Milliseconds since boot. Callable from interrupt context.
#[inline]
pub(super) fn boot_ms() -> u64 {
    // Plain read of the system timer
    let micros = unsafe { esp_idf_hal::sys::esp_timer_get_time() };
    (micros / 1000) as u64
}
