//! MPU6050 accelerometer over I2C.
//!
//! Only the accelerometer is used. The device is woken from sleep and set to
//! the ±8 g range, where one g is 4096 LSB.

use embedded_hal::i2c::I2c;

use crate::traits::{AccelSample, Accelerometer};

/// Default I2C address (AD0 low).
pub const MPU6050_ADDR: u8 = 0x68;

const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B;
const REG_WHO_AM_I: u8 = 0x75;

/// ±8 g full scale
const ACCEL_RANGE_8G: u8 = 0x10;
const LSB_PER_G: f32 = 4096.0;

/// MPU6050 driver, generic over any embedded-hal 1.0 I2C bus.
///
/// # Example
///
/// ```ignore
/// use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
/// use trolley_core::hal::esp32::{Mpu6050, MPU6050_ADDR};
///
/// let i2c = I2cDriver::new(
///     peripherals.i2c0,
///     peripherals.pins.gpio8,
///     peripherals.pins.gpio9,
///     &I2cConfig::new().baudrate(400.kHz().into()),
/// )?;
/// let accel = Mpu6050::new(i2c, MPU6050_ADDR)?;
/// ```
pub struct Mpu6050<I: I2c> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mpu6050<I> {
    /// Wake the device and select the ±8 g range.
    ///
    /// # Errors
    ///
    /// Returns the bus error if the device does not acknowledge.
    pub fn new(i2c: I, address: u8) -> Result<Self, I::Error> {
        let mut dev = Self { i2c, address };
        dev.write_register(REG_PWR_MGMT_1, 0x00)?;
        dev.write_register(REG_ACCEL_CONFIG, ACCEL_RANGE_8G)?;
        Ok(dev)
    }

    /// WHO_AM_I register (0x68 on a genuine part).
    pub fn who_am_i(&mut self) -> Result<u8, I::Error> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_WHO_AM_I], &mut buf)?;
        Ok(buf[0])
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.i2c
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), I::Error> {
        self.i2c.write(self.address, &[register, value])
    }
}

impl<I: I2c> Accelerometer for Mpu6050<I> {
    type Error = I::Error;

    fn read_g(&mut self) -> Result<AccelSample, Self::Error> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(self.address, &[REG_ACCEL_XOUT_H], &mut raw)?;
        Ok(AccelSample::new(
            counts_to_g(raw[0], raw[1]),
            counts_to_g(raw[2], raw[3]),
            counts_to_g(raw[4], raw[5]),
        ))
    }
}

/// Big-endian two's complement register pair to g.
fn counts_to_g(high: u8, low: u8) -> f32 {
    f32::from(i16::from_be_bytes([high, low])) / LSB_PER_G
}
