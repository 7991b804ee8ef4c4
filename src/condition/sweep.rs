//! sweep.rs
//! Sweep condition: one bar (or gap) crosses the viewport exactly once.
//!
//! The animated phase lasts as long as the geometry needs; it is derived when the condition is
//! built, so a pattern that cannot sweep never reaches a trial.

use crate::condition::PhaseTiming;
use crate::stimulus::{
    channel::{Channel, CorrelationKey, Message, MetaTag},
    delay::Delay,
    pattern::{StimulusPattern, DEFAULT_VIEWPORT_DEG},
};
use crate::utils::error::Result;

#[derive(Debug, Clone)]
pub struct SweepCondition {
    pub pattern: StimulusPattern,
    pub sweep_count: u32,
    pub timing: PhaseTiming,
    trial_duration: Delay,
}

impl SweepCondition {
    /// Fails with `NotASweep`, `UndefinedSweepDuration` or a layout/motion mismatch.
    pub fn new(pattern: StimulusPattern) -> Result<Self> {
        Self::with_viewport(pattern, DEFAULT_VIEWPORT_DEG)
    }

    pub fn with_viewport(pattern: StimulusPattern, viewport_deg: f64) -> Result<Self> {
        let trial_duration = pattern.sweep_duration(viewport_deg)?;
        Ok(Self { pattern, sweep_count: 1, timing: PhaseTiming::default(), trial_duration })
    }

    pub fn with_timing(mut self, timing: PhaseTiming) -> Self {
        self.timing = timing.checked();
        self
    }

    pub fn with_sweep_count(mut self, sweep_count: u32) -> Self {
        self.sweep_count = sweep_count;
        self
    }

    pub fn trial_duration(&self) -> Delay {
        self.trial_duration
    }

    pub fn trigger(&self, channel: &dyn Channel) {
        let shared_key = CorrelationKey::now();
        channel.emit(Message::meta(shared_key, MetaTag::OpenloopStart, 1));
        self.timing.trigger_fps(channel);
        channel.emit(Message::Sweepcount { key: CorrelationKey::now(), count: self.sweep_count });
        self.pattern.trigger_spatial(channel);
        self.pattern.trigger_stop(channel);
        self.pattern.trigger_sweep_start_position(channel);
        self.timing.pretrial.trigger_delay();

        self.pattern.trigger_rotation(channel);
        self.trial_duration.trigger_delay();

        self.pattern.trigger_stop(channel);
        self.timing.posttrial.trigger_delay();
        channel.emit(Message::meta(shared_key, MetaTag::OpenloopEnd, 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::{channel::ChannelSender, pattern::Motion, starfield::Starfield};
    use crate::utils::error::ExperimentError;

    #[test]
    fn duration_derived_at_construction() {
        let pattern = StimulusPattern::bars(60.0, 300.0, Motion::Rotation { deg_per_sec: -60.0 });
        let sweep = SweepCondition::new(pattern).unwrap();
        assert_eq!(sweep.trial_duration().milliseconds(), 5000.0);
    }

    #[test]
    fn non_sweep_patterns_are_rejected() {
        let repeating = StimulusPattern::bars(30.0, 30.0, Motion::Rotation { deg_per_sec: 10.0 });
        assert!(matches!(SweepCondition::new(repeating), Err(ExperimentError::NotASweep { .. })));

        let still = StimulusPattern::bars(60.0, 300.0, Motion::stationary());
        assert!(matches!(SweepCondition::new(still), Err(ExperimentError::UndefinedSweepDuration(_))));

        let stars = StimulusPattern::starfield(Starfield::default(), Motion::Rotation { deg_per_sec: 10.0 });
        assert!(matches!(SweepCondition::new(stars), Err(ExperimentError::SweepOnStarfield)));
    }

    #[test]
    fn start_position_between_stop_and_rotation() {
        let (channel, rx) = ChannelSender::new();
        // (180 + 2·10) / 2000 · 1000 = 100 ms
        let pattern = StimulusPattern::bars(10.0, 350.0, Motion::Rotation { deg_per_sec: 2000.0 });
        let timing = PhaseTiming::new(60.0, Delay::from_millis(0.0), Delay::from_millis(0.0));
        let sweep = SweepCondition::new(pattern).unwrap().with_sweep_count(3).with_timing(timing);
        assert_eq!(sweep.trial_duration().milliseconds(), 100.0);
        sweep.trigger(&channel);

        let msgs: Vec<Message> = rx.try_iter().map(|e| e.message).collect();
        let names: Vec<&str> = msgs.iter().map(|m| m.event_name()).collect();
        assert_eq!(
            names,
            ["meta", "fps", "sweepcount", "spatial-setup", "speed", "rotate-to", "speed", "speed", "meta"]
        );
        assert!(matches!(msgs[2], Message::Sweepcount { count: 3, .. }));
        assert!(matches!(msgs[5], Message::RotateTo { angle_rad, .. } if (angle_rad - 90f64.to_radians()).abs() < 1e-12));
    }
}
