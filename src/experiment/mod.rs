//! Experiment structure: trials built from conditions, blocks of shuffled trials, sessions.

pub mod block;
pub mod builder;
pub mod session;
pub mod trial;

pub use block::{Block, BlockReport};
pub use builder::{TrialBuilder, TrialSpec};
pub use session::Session;
pub use trial::{Trial, TrialReport};
