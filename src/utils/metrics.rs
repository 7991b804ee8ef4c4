//! Feedback-loop metrics: what the sensor stream looked like during one closed-loop window.
//!
//! Buffers are bounded to the most recent `MAX_POINTS` samples so a long closed-loop phase
//! cannot grow memory without limit.

use std::{collections::VecDeque, time::Instant};

pub const MAX_POINTS: usize = 1_000;

/// Outcome of one feedback task run, returned through its join handle.
#[derive(Debug, Default, Clone)]
pub struct FeedbackReport {
    /// Sensor handshake succeeded.
    pub connected: bool,
    /// Valid frames parsed.
    pub frames: u64,
    /// Records dropped as malformed or foreign.
    pub skipped_records: u64,
    pub speed_commands: u64,
    /// Heading deltas that crossed the 0/2π boundary and were unwrapped.
    pub wrapped_deltas: u64,
    /// Angular velocity before gain (rad/s), most recent last.
    pub velocity: VecDeque<f64>,
    /// Sensor-side interval between consecutive frames (ms).
    pub frame_interval_ms: VecDeque<f64>,
    /// When the last speed command left the task.
    pub last_emit: Option<Instant>,
}

impl FeedbackReport {
    pub fn record_velocity(&mut self, velocity: f64, interval_ms: f64) {
        push_capped(&mut self.velocity, velocity);
        push_capped(&mut self.frame_interval_ms, interval_ms);
    }
}

/// Appends value to buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Computes min, max, mean for float buffer.
pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}
