//! Trait definitions for hardware abstraction and mode engines.
//!
//! This module defines the core abstractions that allow trolley-core to:
//! - Run on different hardware (ESP32, desktop mock)
//! - Drive three interchangeable operating modes from one control loop
//!
//! # Submodules
//!
//! - `hardware`: ESC output, Hall pulses, accelerometer, storage, clock
//! - `engine`: The [`ModeEngine`] state machine interface
//!
//! # Hardware Abstraction
//!
//! The key hardware traits are:
//!
//! - [`EscOutput`]: Raw PWM duty to the ESC
//! - [`PulseSource`]: Hall pulse timestamps
//! - [`Accelerometer`]: 3-axis acceleration
//! - [`ParamStore`]: Persistent key/value blobs
//! - [`Clock`]: Time source

pub mod engine;
pub mod hardware;

pub use engine::*;
pub use hardware::*;
