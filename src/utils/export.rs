//! Per-session feedback summary: one CSV row per closed-loop condition that ran.
//!
//! Rows are appended to a persistent file so several sessions accumulate in one place; the
//! header is written only when the file is new.

use std::{
    fs::{create_dir_all, OpenOptions},
    io,
    path::Path,
};

use csv::WriterBuilder;
use serde::Serialize;
use log::info;

use crate::experiment::trial::TrialReport;
use crate::utils::metrics::{calculate_stats, FeedbackReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummaryRow {
    pub trial_id: String,
    pub condition: String,
    pub connected: bool,
    pub frames: u64,
    pub skipped_records: u64,
    pub speed_commands: u64,
    pub wrapped_deltas: u64,
    pub velocity_min: f64,
    pub velocity_max: f64,
    pub velocity_mean: f64,
    pub frame_interval_mean_ms: f64,
}

impl FeedbackSummaryRow {
    pub fn new(trial_id: &str, condition: &str, report: &FeedbackReport) -> Self {
        let velocity = calculate_stats(&report.velocity);
        let interval = calculate_stats(&report.frame_interval_ms);
        Self {
            trial_id: trial_id.to_string(),
            condition: condition.to_string(),
            connected: report.connected,
            frames: report.frames,
            skipped_records: report.skipped_records,
            speed_commands: report.speed_commands,
            wrapped_deltas: report.wrapped_deltas,
            velocity_min: velocity.as_ref().map_or(0.0, |s| s.min),
            velocity_max: velocity.as_ref().map_or(0.0, |s| s.max),
            velocity_mean: velocity.as_ref().map_or(0.0, |s| s.mean),
            frame_interval_mean_ms: interval.map_or(0.0, |s| s.mean),
        }
    }
}

/// Appends one row per closed-loop condition in `trials`. Returns the number of rows written.
pub fn export_feedback_summary(path: &Path, trials: &[TrialReport]) -> io::Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }
    let file_exists = path.exists() && path.metadata()?.len() > 0;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut wtr = WriterBuilder::new().has_headers(!file_exists).from_writer(file);

    let mut rows = 0;
    for trial in trials {
        for (label, report) in trial.feedback() {
            wtr.serialize(FeedbackSummaryRow::new(&trial.trial_id, label, report))?;
            rows += 1;
        }
    }
    wtr.flush()?;
    info!("[Export] {} feedback rows appended to {:?}", rows, path);
    Ok(rows)
}
