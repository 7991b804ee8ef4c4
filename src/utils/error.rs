//! Error types shared across the crate.
//!
//! Hard construction-time contracts (empty trial, undefined sweep duration) are errors.
//! Soft geometry/frame-rate issues are never errors; see [`Diagnostic`].

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("trial '{0}' has no conditions")]
    EmptyTrial(String),

    #[error("sweep duration undefined: rotation speed is {0} deg/s")]
    UndefinedSweepDuration(f64),

    #[error("sweep of {0} ms exceeds the longest allowed hold")]
    SweepTooLong(f64),

    #[error("pattern with bar {bar}° and space {space}° is neither a bar sweep nor a space sweep")]
    NotASweep { bar: f64, space: f64 },

    #[error("sweep requested on an oscillating pattern")]
    SweepOnOscillation,

    #[error("sweep requested on a starfield pattern")]
    SweepOnStarfield,

    #[error("trial '{0}' needs either an open-loop duration or a sweep")]
    MissingOpenLoopTiming(String),

    #[error("trial '{0}' needs either a bar size or a sphere count")]
    MissingPattern(String),

    #[error("closed-loop bar size {0}° outside (0, 360]")]
    InvalidClosedLoopBar(f64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path:?}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("invalid address '{0}'")]
    Address(String),

    #[error(transparent)]
    Trial(#[from] ExperimentError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("data logger already running")]
    LoggerRunning,

    #[error("failed to create data log {path:?}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
}

pub type Result<T, E = ExperimentError> = std::result::Result<T, E>;

/// Advisory, non-fatal configuration findings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    #[error("bar ({bar}°) or space ({space}°) is negative")]
    NegativeSize { bar: f64, space: f64 },

    #[error("pattern is not seamless with bar {bar}° and space {space}°")]
    NotSeamless { bar: f64, space: f64 },

    #[error("mask has invalid range {start}°..{end}°")]
    InvertedMask { start: f64, end: f64 },

    #[error("fps ({0}) outside meaningful constraints")]
    FpsOutOfRange(f64),

    #[error("rotation and oscillation both set, oscillation takes precedence")]
    RotationAndOscillation,

    #[error("open-loop duration and sweep both set, duration takes precedence")]
    DurationAndSweep,

    #[error("bar size and sphere count both set, bars take precedence")]
    BarsAndStarfield,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_render_their_values() {
        let seam = Diagnostic::NotSeamless { bar: 25.0, space: 25.0 };
        assert_eq!(seam.to_string(), "pattern is not seamless with bar 25° and space 25°");
        assert_eq!(Diagnostic::FpsOutOfRange(0.5).to_string(), "fps (0.5) outside meaningful constraints");
        let err: &dyn std::error::Error = &Diagnostic::BarsAndStarfield;
        assert!(err.source().is_none());
    }
}
