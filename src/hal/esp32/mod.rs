//! ESP32-S3 hardware abstraction layer for the trolley.
//!
//! This module provides hardware implementations for an ESP32-S3 board
//! driving a brushless motor through an RC-style ESC.
//!
//! # Hardware Configuration
//!
//! - **MCU**: ESP32-S3 (esp-idf, std)
//! - **Motor**: Brushless motor behind a bidirectional RC ESC (50 Hz PWM)
//! - **Speed sensor**: Single Hall sensor, one magnet on the wheel
//! - **Accelerometer**: MPU6050 (I2C, ±8 g range)
//! - **Storage**: NVS partition for learned results
//!
//! # Pin Assignments
//!
//! See the [`pins`] module for GPIO assignments.

mod accel;
mod clock;
mod esc;
mod hall;
mod nvs;

pub use accel::{Mpu6050, MPU6050_ADDR};
pub use clock::Esp32Clock;
pub use esc::Esp32Esc;
pub use hall::Esp32Hall;
pub use nvs::NvsParamStore;

/// Pin assignments for the trolley controller board.
pub mod pins {
    // =========================================================================
    // ESC
    // =========================================================================

    /// ESC PWM signal (LEDC capable)
    pub const ESC_PWM: i32 = 18;

    // =========================================================================
    // Hall Sensor
    // =========================================================================

    /// Hall sensor input (interrupt capable, open collector)
    pub const HALL: i32 = 4;

    // =========================================================================
    // I2C (MPU6050)
    // =========================================================================

    /// I2C data line
    pub const I2C_SDA: i32 = 8;

    /// I2C clock line
    pub const I2C_SCL: i32 = 9;
}
