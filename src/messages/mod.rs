//! # Messages Module
//!
//! Core data structures for dice-to-dice radio communication.
//!
//! ## Architecture
//!
//! The messages module is organized into two main components:
//!
//! - **DiceMessage**: Typed protocol messages (handshake, measurement,
//!   teleport, watchdog) with their wire codec
//! - **RadioFrame**: Fixed-size wire-format frame for radio transmission
//!
//! Every message fits in a single frame; there is no fragmentation,
//! acknowledgement, or retransmission at this layer.

// Module declarations
pub mod dice_message;
pub mod frame;

// Re-export public types for convenient access
pub use dice_message::{DiceMessage, DiceNumber, EntanglementState, MeasuredAxis, Mode, State, ThrowState, UpSide};
pub use frame::RadioFrame;
