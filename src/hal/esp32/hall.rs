//! Hall sensor input on a GPIO interrupt.
//!
//! The interrupt handler timestamps the falling edge and pushes it through a
//! [`PulseCapture`]; the control loop drains the matching [`PulseDrain`].
//! Nothing else runs in interrupt context.

use core::sync::atomic::AtomicU32;

use esp_idf_hal::gpio::{Input, InputPin, InterruptType, OutputPin, PinDriver, Pull};
use esp_idf_hal::peripheral::Peripheral;

use super::clock::boot_ms;
use crate::hall::{split_queue, PulseCapture, PulseDrain, PulseQueue};
use crate::traits::PulseSource;

/// Interrupt-driven Hall sensor.
///
/// esp-idf disables a GPIO interrupt after it fires; call
/// [`rearm`](Self::rearm) once per tick. At 2 m/s on a 0.19 m wheel pulses
/// are about 95 ms apart, well above the 20 ms tick.
///
/// # Example
///
/// ```ignore
/// use trolley_core::hal::esp32::Esp32Hall;
///
/// let peripherals = Peripherals::take()?;
/// let mut hall = Esp32Hall::new(peripherals.pins.gpio4)?;
///
/// loop {
///     hall.rearm()?;
///     system.tick(clock.now_ms());
/// }
/// ```
pub struct Esp32Hall<'d, P>
where
    P: InputPin + OutputPin,
{
    pin: PinDriver<'d, P, Input>,
    drain: PulseDrain<'static>,
}

impl<'d, P> Esp32Hall<'d, P>
where
    P: InputPin + OutputPin,
{
    /// Configure the pin with a pull-up and subscribe the capture handler.
    ///
    /// The pulse queue lives for the rest of the program; create one
    /// instance per board.
    ///
    /// # Errors
    ///
    /// Returns an error if the GPIO or its interrupt cannot be configured.
    pub fn new(pin: impl Peripheral<P = P> + 'd) -> Result<Self, esp_idf_hal::sys::EspError> {
        let queue: &'static mut PulseQueue = Box::leak(Box::new(PulseQueue::new()));
        let dropped: &'static AtomicU32 = Box::leak(Box::new(AtomicU32::new(0)));
        let (mut capture, drain): (PulseCapture<'static>, PulseDrain<'static>) =
            split_queue(queue, dropped);

        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_interrupt_type(InterruptType::NegEdge)?;

        // The handler only timestamps and enqueues
        unsafe {
            pin.subscribe(move || capture.capture(boot_ms()))?;
        }
        pin.enable_interrupt()?;

        Ok(Self { pin, drain })
    }

    /// Re-enable the edge interrupt after it fired.
    pub fn rearm(&mut self) -> Result<(), esp_idf_hal::sys::EspError> {
        self.pin.enable_interrupt()
    }

    /// Current pin level (true when no magnet is present).
    pub fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}

impl<P> PulseSource for Esp32Hall<'_, P>
where
    P: InputPin + OutputPin,
{
    fn pop_pulse(&mut self) -> Option<u64> {
        self.drain.pop_pulse()
    }

    fn dropped_pulses(&self) -> u32 {
        self.drain.dropped_pulses()
    }
}
