//! ESC signal output using ESP32 LEDC PWM.
//!
//! The ESC expects a standard servo frame: 50 Hz with a 1.0 to 2.0 ms pulse.
//! At 14-bit resolution one frame is 16384 counts, so
//!
//! - 1.0 ms (full reverse) = 819
//! - 1.5 ms (neutral) = 1229
//! - 2.0 ms (full forward) = 1638
//!
//! The duty arithmetic lives in [`crate::esc`]; this type only writes counts.

use esp_idf_hal::gpio::OutputPin;
use esp_idf_hal::ledc::{config::TimerConfig, LedcChannel, LedcDriver, LedcTimer, LedcTimerDriver, Resolution};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;

use crate::traits::EscOutput;

/// LEDC channel driving the ESC signal wire.
///
/// # Example
///
/// ```ignore
/// use trolley_core::hal::esp32::Esp32Esc;
///
/// let peripherals = Peripherals::take()?;
/// let esc = Esp32Esc::new(
///     peripherals.pins.gpio18,
///     peripherals.ledc.timer0,
///     peripherals.ledc.channel0,
/// )?;
/// ```
pub struct Esp32Esc<'d> {
    channel: LedcDriver<'d>,
    last_duty: u32,
}

impl<'d> Esp32Esc<'d> {
    /// Servo frame rate
    const PWM_FREQ_HZ: u32 = 50;

    /// 14-bit resolution (16384 counts per 20 ms frame)
    const PWM_RESOLUTION: Resolution = Resolution::Bits14;

    /// Configure the timer and channel. The output starts at 0 (no pulse)
    /// until the driver writes neutral during init.
    ///
    /// # Errors
    ///
    /// Returns an error if the LEDC timer or channel cannot be configured.
    pub fn new<T, TI, C, CI, P, PI>(pin: P, timer: T, channel: C) -> Result<Self, esp_idf_hal::sys::EspError>
    where
        TI: LedcTimer + 'd,
        T: Peripheral<P = TI> + 'd,
        CI: LedcChannel<SpeedMode = TI::SpeedMode> + 'd,
        C: Peripheral<P = CI> + 'd,
        PI: OutputPin + 'd,
        P: Peripheral<P = PI> + 'd,
    {
        let timer_config = TimerConfig::default()
            .frequency(Self::PWM_FREQ_HZ.Hz())
            .resolution(Self::PWM_RESOLUTION);
        let timer_driver = LedcTimerDriver::new(timer, &timer_config)?;
        let mut channel = LedcDriver::new(channel, &timer_driver, pin)?;
        channel.set_duty(0)?;

        Ok(Self {
            channel,
            last_duty: 0,
        })
    }

    /// Last duty written.
    #[inline]
    pub fn duty(&self) -> u32 {
        self.last_duty
    }

    /// Largest duty the channel accepts.
    #[inline]
    pub fn max_duty(&self) -> u32 {
        self.channel.get_max_duty()
    }
}

impl EscOutput for Esp32Esc<'_> {
    type Error = esp_idf_hal::sys::EspError;

    fn set_duty(&mut self, duty: u32) -> Result<(), Self::Error> {
        self.channel.set_duty(duty)?;
        self.last_duty = duty;
        Ok(())
    }
}
