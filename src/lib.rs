//! # trolley-core
//!
//! Motion-control core for a wire-guided trolley driven by a brushless motor
//! through an RC-style ESC, with one Hall sensor on the wheel and a 3-axis
//! accelerometer.
//!
//! ## Features
//!
//! - **Hall speed sensing**: interrupt-safe pulse capture, smoothed speed, signed position
//! - **ESC driver**: timed arming sequence, duty rate limiting, emergency stop
//! - **Sensor gate**: operator-confirmed wheel rotation and trolley shake before any motion
//! - **Wire learning**: measures the wire in both directions and finds a safe cruise speed
//! - **Automatic cycling**: end-to-end runs with coasting calibration and stopping margins
//! - **Manual control**: rate-limited operator commands with safety checks
//! - **Mode coordinator**: one mode at a time, persistence of learned results
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Hardware abstractions and the mode engine interface
//! - `hall`, `esc`, `hardware` - Sensor and actuator layer
//! - `sensor_health` - Validation handshake and live sensor readings
//! - `wire_learning`, `automatic`, `manual` - The three mode engines
//! - `coordinator` - Mode arbitration, errors and persistence
//! - `system` - Control loop and command dispatch
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use trolley_core::{Command, CommandSource, Config, SystemContext};
//! use trolley_core::hal::{MockAccelerometer, MockEsc, MockParamStore, MockPulseSource};
//!
//! let mut system = SystemContext::new(
//!     Config::default(),
//!     MockEsc::new(),
//!     MockPulseSource::new(),
//!     MockAccelerometer::new(),
//!     MockParamStore::new(),
//! );
//! system.init(0).unwrap();
//!
//! // Operator keys arrive as single characters
//! let reply = system.handle_char('v', CommandSource::Serial, 20).unwrap();
//! assert!(reply.success);
//!
//! // Run the control loop every 20 ms
//! system.tick(40);
//! ```

#![warn(missing_docs)]

/// Automatic end-to-end cycling.
pub mod automatic;
/// Coasting distance measurement and calibration.
pub mod coasting;
/// Single-character operator commands.
pub mod commands;
/// Configuration for every component.
pub mod config;
/// Mode arbitration, error accounting and persistence.
pub mod coordinator;
/// Error types.
pub mod error;
/// ESC PWM driver with arming sequence.
pub mod esc;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Hall pulse capture and speed/position tracking.
pub mod hall;
/// Hardware facade combining the ESC and the Hall sensor.
pub mod hardware;
/// Manual control engine.
pub mod manual;
/// Timed speed ramps.
pub mod ramp;
/// Sensor validation handshake.
pub mod sensor_health;
/// Control loop and command dispatch.
pub mod system;
/// Core traits for hardware abstraction and mode engines.
pub mod traits;
/// Wire end detection.
pub mod wire_end;
/// Wire learning engine.
pub mod wire_learning;

// Re-exports for convenience
pub use automatic::{AutomaticEngine, AutomaticState, AutomaticStatus};
pub use coasting::{CoastingCalibration, CoastingMeasurement};
pub use commands::{Command, CommandReply, CommandSource};
pub use coordinator::{ModeAvailability, ModeCoordinator, ModeStatus, OperatingMode, ValidationState};
pub use error::{ControlError, ErrorKind, HardwareError};
pub use esc::EscState;
pub use hardware::{HardwareControl, HardwareStatus};
pub use manual::{ManualCommand, ManualEngine, ManualSession, ManualState, ManualStatus};
pub use sensor_health::{InitState, SensorHealth, SensorHealthGate, SensorStatus};
pub use system::{SystemContext, SystemStatus};
pub use traits::{
    // Hardware
    AccelSample,
    Accelerometer,
    Clock,
    Direction,
    EscOutput,
    HallObserver,
    ParamStore,
    PulseSource,
    // Engines
    EngineContext,
    EngineEvent,
    ModeEngine,
};
pub use wire_end::{DetectionMethod, WireEndDetector};
pub use wire_learning::{WireLearningEngine, WireLearningProgress, WireLearningResult, WireLearningState};

// Config re-exports
pub use config::{
    AutomaticConfig, CoastingConfig, Config, CoordinatorConfig, HardwareConfig, ManualConfig,
    SensorConfig, WireEndConfig, WireLearningConfig,
};
