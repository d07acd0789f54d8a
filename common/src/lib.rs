//! Common Utilities and Types Library
//!
//! This crate provides the protocol-agnostic primitives shared by the RLC
//! layer: a bit-exact field codec, ring sequence numbers and clock-driven
//! timers.

pub mod bits;
pub mod sequence;
pub mod timer;
pub mod utils;

// Re-export commonly used items
pub use bits::{BitError, BitReader, BitWriter, Field};
pub use sequence::SeqNum;
pub use timer::{Millis, Timer, TimerState};
pub use utils::*;
