//! Radio device implementations
//!
//! This module contains the radio backends that can carry the dice
//! protocol:
//!
//! - `echo`: loopback device that echoes transmitted frames back
//! - `simulator`: channel-backed device speaking to a simulated shared
//!   medium, for multi-dice scenarios without hardware
//! - `medium`: the table-top side of the simulator, routing frames
//!   between seated dice by configured link strength (std only)
//!
//! Exactly one backend is selected at compile time through cargo
//! features; the chosen `RadioDevice` and `radio_device_task` are
//! re-exported here.

#[cfg(feature = "radio-device-echo")]
pub mod echo;

#[cfg(feature = "radio-device-simulator")]
pub mod simulator;

#[cfg(all(feature = "radio-device-simulator", feature = "std"))]
pub mod medium;

// Re-export the active radio device implementation
#[cfg(feature = "radio-device-echo")]
pub use echo::{radio_device_task, RadioDevice};

#[cfg(feature = "radio-device-simulator")]
pub use simulator::{radio_device_task, RadioDevice};
