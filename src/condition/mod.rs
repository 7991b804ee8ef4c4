//! Conditions: the timed phases a trial is made of.
//!
//! Each variant runs a fixed phase order on the calling thread. Only the closed-loop variant
//! spawns a helper thread, and joins it before returning.

pub mod closed_loop;
pub mod feedback;
pub mod open_loop;
pub mod sweep;

use std::time::Duration;
use log::warn;

use crate::stimulus::{
    channel::{Channel, CorrelationKey, Message},
    delay::Delay,
    pattern::StimulusPattern,
};
use crate::utils::{error::Diagnostic, metrics::FeedbackReport};

pub use closed_loop::ClosedLoopCondition;
pub use open_loop::OpenLoopCondition;
pub use sweep::SweepCondition;

pub const DEFAULT_FPS: f64 = 60.0;
const MAX_FPS: f64 = 60.0; // client display refresh
pub const DEFAULT_PHASE_HOLD_MS: f64 = 500.0;

/// Frame rate plus the holds around the animated phase. Shared by every condition kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTiming {
    pub fps: f64,
    pub pretrial: Delay,
    pub posttrial: Delay,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            pretrial: Delay::from_millis(DEFAULT_PHASE_HOLD_MS),
            posttrial: Delay::from_millis(DEFAULT_PHASE_HOLD_MS),
        }
    }
}

impl PhaseTiming {
    pub fn new(fps: f64, pretrial: Delay, posttrial: Delay) -> Self {
        Self { fps, pretrial, posttrial }
    }

    /// Advisory check; out-of-range frame rates are still sent to the client.
    pub fn fps_diagnostic(&self) -> Option<Diagnostic> {
        if self.fps <= 0.0 || self.fps > MAX_FPS || self.fps.is_nan() {
            Some(Diagnostic::FpsOutOfRange(self.fps))
        } else {
            None
        }
    }

    pub(crate) fn checked(self) -> Self {
        if let Some(d) = self.fps_diagnostic() {
            warn!("[Condition] {d}");
        }
        self
    }

    pub fn trigger_fps(&self, channel: &dyn Channel) {
        channel.emit(Message::Fps { key: CorrelationKey::now(), fps: self.fps });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    OpenLoop,
    ClosedLoop,
}

impl ConditionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::OpenLoop => "open-loop",
            ConditionKind::ClosedLoop => "closed-loop",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    OpenLoop(OpenLoopCondition),
    Sweep(SweepCondition),
    ClosedLoop(ClosedLoopCondition),
}

impl Condition {
    /// Sweeps are reported as open loop.
    pub fn kind(&self) -> ConditionKind {
        match self {
            Condition::OpenLoop(_) | Condition::Sweep(_) => ConditionKind::OpenLoop,
            Condition::ClosedLoop(_) => ConditionKind::ClosedLoop,
        }
    }

    /// Runs every phase; blocks for the whole condition. Closed-loop runs return the
    /// feedback task's report.
    pub fn trigger(&self, channel: &dyn Channel) -> Option<FeedbackReport> {
        match self {
            Condition::OpenLoop(c) => {
                c.trigger(channel);
                None
            }
            Condition::Sweep(c) => {
                c.trigger(channel);
                None
            }
            Condition::ClosedLoop(c) => Some(c.trigger(channel)),
        }
    }

    pub fn pattern(&self) -> &StimulusPattern {
        match self {
            Condition::OpenLoop(c) => &c.pattern,
            Condition::Sweep(c) => &c.pattern,
            Condition::ClosedLoop(c) => &c.pattern,
        }
    }

    pub fn timing(&self) -> &PhaseTiming {
        match self {
            Condition::OpenLoop(c) => &c.timing,
            Condition::Sweep(c) => &c.timing,
            Condition::ClosedLoop(c) => &c.timing,
        }
    }

    pub fn trial_duration(&self) -> Delay {
        match self {
            Condition::OpenLoop(c) => c.trial_duration,
            Condition::Sweep(c) => c.trial_duration(),
            Condition::ClosedLoop(c) => c.trial_duration,
        }
    }

    /// Lower bound on wall-clock time spent in `trigger`.
    pub fn minimum_runtime(&self) -> Duration {
        let timing = self.timing();
        timing.pretrial.as_duration() + self.trial_duration().as_duration() + timing.posttrial.as_duration()
    }

    /// Pattern findings followed by the frame-rate check.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut all = self.pattern().diagnostics().to_vec();
        all.extend(self.timing().fps_diagnostic());
        all
    }
}

impl From<OpenLoopCondition> for Condition {
    fn from(c: OpenLoopCondition) -> Self {
        Condition::OpenLoop(c)
    }
}

impl From<SweepCondition> for Condition {
    fn from(c: SweepCondition) -> Self {
        Condition::Sweep(c)
    }
}

impl From<ClosedLoopCondition> for Condition {
    fn from(c: ClosedLoopCondition) -> Self {
        Condition::ClosedLoop(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::pattern::Motion;

    #[test]
    fn fps_range_is_zero_exclusive_to_sixty() {
        let at = |fps| PhaseTiming { fps, ..PhaseTiming::default() };
        assert!(at(60.0).fps_diagnostic().is_none());
        assert!(at(0.5).fps_diagnostic().is_none());
        assert_eq!(at(0.0).fps_diagnostic(), Some(Diagnostic::FpsOutOfRange(0.0)));
        assert_eq!(at(61.0).fps_diagnostic(), Some(Diagnostic::FpsOutOfRange(61.0)));
        assert!(at(-5.0).fps_diagnostic().is_some());
    }

    #[test]
    fn kind_strings() {
        let pattern = StimulusPattern::bars(60.0, 300.0, Motion::Rotation { deg_per_sec: 30.0 });
        let open: Condition = OpenLoopCondition::new(pattern.clone(), Delay::from_millis(10.0)).into();
        let sweep: Condition = SweepCondition::new(pattern.clone()).unwrap().into();
        let closed: Condition = ClosedLoopCondition::new(pattern, Delay::from_millis(10.0), 1.0).into();
        assert_eq!(open.kind().as_str(), "open-loop");
        assert_eq!(sweep.kind().as_str(), "open-loop");
        assert_eq!(closed.kind().as_str(), "closed-loop");
    }

    #[test]
    fn minimum_runtime_sums_phases() {
        let pattern = StimulusPattern::bars(30.0, 30.0, Motion::stationary());
        let c: Condition = OpenLoopCondition::new(pattern, Delay::from_millis(3000.0)).into();
        assert_eq!(c.minimum_runtime(), Duration::from_millis(4000));
    }

    #[test]
    fn diagnostics_collects_pattern_and_fps() {
        let pattern = StimulusPattern::bars(50.0, 60.0, Motion::stationary());
        let c: Condition = OpenLoopCondition::new(pattern, Delay::from_millis(1.0))
            .with_timing(PhaseTiming { fps: 120.0, ..PhaseTiming::default() })
            .into();
        let d = c.diagnostics();
        assert_eq!(d.len(), 2);
        assert_eq!(d[1], Diagnostic::FpsOutOfRange(120.0));
    }
}
