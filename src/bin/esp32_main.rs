//! ESP32-S3 wire-guided trolley controller.
//!
//! This is the main entry point for the physical hardware controller.
//! It runs a 50Hz control loop that:
//! - Drains Hall pulses captured by the GPIO interrupt
//! - Samples the MPU6050 accelerometer
//! - Steps the ESC, the sensor gate and the active mode engine
//! - Reads single-character operator commands from the UART console
//!
//! # Hardware Setup
//!
//! - GPIO18: ESC signal (50 Hz servo PWM)
//! - GPIO4: Hall sensor (pull-up, falling edge)
//! - GPIO8/9: MPU6050 SDA/SCL
//!
//! # Operation
//!
//! After boot press `V`, turn the wheel by hand and press `H`, then shake the
//! trolley and press `C`. Once the sensors are validated, `W` learns the
//! wire, `U` starts automatic cycling and `M` enters manual control. `E`
//! stops everything at any time; `T` prints a status line.

use std::thread;
use std::time::Duration;

use esp_idf_hal::delay::NON_BLOCK;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};

use trolley_core::hal::esp32::{Esp32Clock, Esp32Esc, Esp32Hall, Mpu6050, NvsParamStore, MPU6050_ADDR};
use trolley_core::traits::Clock;
use trolley_core::{CommandSource, Config, SystemContext};

/// Main loop interval in milliseconds (50Hz = 20ms)
const LOOP_INTERVAL_MS: u64 = 20;

/// Full status report interval in loop ticks (every 250 ticks = 5 s at 50Hz)
const REPORT_INTERVAL: u32 = 250;

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_hal::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("================================");
    info!("  trolley-core controller");
    info!("================================");

    let config = Config::default();
    let peripherals = Peripherals::take()?;

    // =========================================================================
    // ESC (LEDC on GPIO18)
    // =========================================================================
    let esc = Esp32Esc::new(
        peripherals.pins.gpio18,
        peripherals.ledc.timer0,
        peripherals.ledc.channel0,
    )?;
    info!("[OK] ESC output initialized (GPIO18, 50 Hz)");

    // =========================================================================
    // Hall sensor (interrupt on GPIO4)
    // =========================================================================
    let hall = Esp32Hall::new(peripherals.pins.gpio4)?;
    info!("[OK] Hall sensor initialized (GPIO4)");

    // =========================================================================
    // MPU6050 (I2C on GPIO8/9)
    // =========================================================================
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio8,
        peripherals.pins.gpio9,
        &I2cConfig::new().baudrate(400.kHz().into()),
    )?;
    let mut accel = Mpu6050::new(i2c, MPU6050_ADDR)?;
    match accel.who_am_i() {
        Ok(id) => info!("[OK] MPU6050 initialized (id 0x{:02X})", id),
        Err(e) => warn!("MPU6050 identity read failed: {:?}", e),
    }

    // =========================================================================
    // NVS and UART console
    // =========================================================================
    let store = NvsParamStore::new(EspDefaultNvsPartition::take()?);

    let uart = UartDriver::new(
        peripherals.uart0,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::default().baudrate(Hertz(115_200)),
    )?;

    // =========================================================================
    // System
    // =========================================================================
    let clock = Esp32Clock::new();
    let mut system = SystemContext::new(config, esc, hall, accel, store);
    system
        .init(clock.now_ms())
        .map_err(|e| anyhow::anyhow!("System init failed: {}", e))?;

    info!("Commands: V H C (validate)  W U M (modes)  A D F B S + - (manual)");
    info!("          Q I (stop mode)  E (emergency)  R (reset)  T (status)");
    info!("Starting control loop (50Hz)...");

    let mut report_counter: u32 = 0;
    let mut rx = [0u8; 8];

    // =========================================================================
    // Main Control Loop (50Hz)
    // =========================================================================
    loop {
        let now = clock.now_ms();

        if let Err(e) = system.pulses_mut().rearm() {
            error!("Hall interrupt re-enable failed: {:?}", e);
        }

        // ---------------------------------------------------------------------
        // Operator commands
        // ---------------------------------------------------------------------
        let received = uart.read(&mut rx, NON_BLOCK).unwrap_or(0);
        for &byte in &rx[..received] {
            let c = char::from(byte);
            if c.is_ascii_whitespace() {
                continue;
            }
            if let Some(reply) = system.handle_char(c, CommandSource::Serial, now) {
                info!("{}", reply.message);
            }
        }

        system.tick(now);

        // ---------------------------------------------------------------------
        // Periodic report
        // ---------------------------------------------------------------------
        report_counter += 1;
        if report_counter >= REPORT_INTERVAL {
            report_counter = 0;
            info!("{}", system.coordinator().detailed_status());
        }

        // Sleep until next tick
        thread::sleep(Duration::from_millis(LOOP_INTERVAL_MS));
    }
}
