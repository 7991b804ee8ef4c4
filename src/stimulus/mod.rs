//! Stimulus primitives: what is shown, how it moves, how long a phase holds,
//! and the channel every command goes out on.

pub mod channel;
pub mod delay;
pub mod pattern;
pub mod starfield;
