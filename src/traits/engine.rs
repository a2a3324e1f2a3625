//! Mode engine interface.
//!
//! Each operating mode is a state machine that is started, stopped and
//! ticked by the system context. Engines never own hardware; they borrow it
//! through an [`EngineContext`] for the duration of one call and publish
//! finished results into an outbox drained once per tick.

use heapless::Vec;

use crate::coasting::CoastingCalibration;
use crate::error::ControlError;
use crate::hardware::HardwareControl;
use crate::sensor_health::SensorHealth;
use crate::traits::EscOutput;
use crate::wire_end::DetectorInput;
use crate::wire_learning::WireLearningResult;

/// Results an engine hands to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineEvent {
    /// Wire learning finished and passed its symmetry check.
    WireLearned(WireLearningResult),
    /// A coasting measurement finished.
    CoastingCalibrated(CoastingCalibration),
    /// Automatic mode finished a forward+reverse cycle.
    CycleCompleted {
        /// Cycles completed since automatic mode started.
        cycles: u32,
    },
}

/// Pending events of one engine.
pub type Outbox = Vec<EngineEvent, 4>;

/// Push an event, dropping it with a log line if the outbox is full.
pub fn publish(outbox: &mut Outbox, event: EngineEvent) {
    if outbox.push(event).is_err() {
        log::error!(target: "engine", "Outbox full, dropping {:?}", event);
    }
}

/// Everything an engine may touch during one call.
pub struct EngineContext<'a, E: EscOutput> {
    /// Motor and Hall state
    pub hw: &'a mut HardwareControl<E>,
    /// Sensor gate snapshot for this tick
    pub sensors: &'a SensorHealth,
    /// Coordinator's motion-safe verdict for this tick
    pub motion_safe: bool,
    /// Current time
    pub now_ms: u64,
}

impl<E: EscOutput> EngineContext<'_, E> {
    /// Sensors have passed the operator handshake.
    pub fn sensors_validated(&self) -> bool {
        self.sensors.sensors_validated
    }

    /// Gravity-compensated acceleration, g.
    pub fn dynamic_accel_g(&self) -> f32 {
        self.sensors.dynamic_accel_g
    }

    /// Inputs for the wire end detectors.
    pub fn detector_input(&self) -> DetectorInput {
        DetectorInput {
            now_ms: self.now_ms,
            dynamic_accel_g: self.sensors.dynamic_accel_g,
            measured_speed_ms: self.hw.current_speed_ms(),
            target_speed_ms: self.hw.target_speed_ms(),
            last_pulse_ms: self.hw.last_pulse_ms(),
        }
    }
}

/// An operating mode driven by the coordinator.
pub trait ModeEngine {
    /// Display name.
    fn name(&self) -> &'static str;

    /// Check prerequisites and begin.
    fn start<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError>;

    /// Stop. `immediate` skips any graceful wind-down.
    fn stop<E: EscOutput>(
        &mut self,
        ctx: &mut EngineContext<'_, E>,
        immediate: bool,
    ) -> Result<(), ControlError>;

    /// Advance the state machine by one tick.
    fn update<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>) -> Result<(), ControlError>;

    /// True while the engine is running.
    fn is_active(&self) -> bool;

    /// True while a stop is winding down.
    fn is_stopping(&self) -> bool {
        false
    }

    /// Neutral output and a terminal state. Never fails.
    fn emergency_stop<E: EscOutput>(&mut self, ctx: &mut EngineContext<'_, E>);

    /// Take the events published since the last call.
    fn take_events(&mut self) -> Outbox;
}
