//! Motion sensor and battery monitor contracts.
//!
//! The state machine never talks to hardware directly; it consumes the
//! discrete events published through these traits. Calibration, axis
//! remapping and gyroscope integration live behind the implementation.

/// Axis-aligned orientation of the dice as reported by the motion sensor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Orientation {
    XUp,
    XDown,
    YUp,
    YDown,
    ZUp,
    ZDown,
    /// Resting against something, no face clearly up
    Tilted,
    Unknown,
}

/// Discrete motion events consumed by the state machine
///
/// `update` is called once per tick before any of the predicates are read.
/// `tumbled` latches from the moment a throw is detected until
/// `reset_tumble_detection` is called.
pub trait MotionSensor {
    fn update(&mut self);

    /// The dice has been thrown since the last tumble reset
    fn tumbled(&self) -> bool;

    /// Acceleration has settled
    fn stable(&self) -> bool;

    /// The dice is resting flat on a surface
    fn on_table(&self) -> bool;

    /// The dice is currently in motion
    fn moving(&self) -> bool;

    fn orientation(&self) -> Orientation;

    /// Re-arms tumble detection for the next throw
    fn reset_tumble_detection(&mut self);
}

/// Battery voltage collaborator
pub trait VoltageMonitor {
    /// True when the battery voltage fell below the operating minimum
    fn check_minimum_voltage(&mut self) -> bool;
}
