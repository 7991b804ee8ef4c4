//! Display-side plumbing: the client connection and the fan-out thread feeding it.

pub mod dispatcher;
pub mod display;
