//! # FlyFlix stimulus server
//!
//! Drives open-loop and closed-loop visual-stimulus experiments for a tethered fly. One display
//! client renders what the server commands; in closed loop, the fly's turning (read from a
//! FicTrac motion tracker over UDP) drives the pattern.
//!
//! ## Layout
//! - `stimulus`: pattern geometry, timing holds, and the outbound message channel
//! - `condition`: open-loop, sweep and closed-loop phase machines, plus the sensor feedback task
//! - `experiment`: trials, shuffled blocks and sessions
//! - `transport`: display client connection and message fan-out
//! - `utils`: config, data log, errors, metrics, summary export

pub mod condition;
pub mod experiment;
pub mod stimulus;
pub mod transport;
pub mod utils;
