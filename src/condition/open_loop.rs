//! open_loop.rs
//! Open-loop condition: show the pattern, hold, animate for a fixed time, hold again.

use log::debug;

use crate::condition::PhaseTiming;
use crate::stimulus::{
    channel::{Channel, CorrelationKey, Message, MetaTag},
    delay::Delay,
    pattern::StimulusPattern,
};

#[derive(Debug, Clone)]
pub struct OpenLoopCondition {
    pub pattern: StimulusPattern,
    pub trial_duration: Delay,
    pub timing: PhaseTiming,
}

impl OpenLoopCondition {
    pub fn new(pattern: StimulusPattern, trial_duration: Delay) -> Self {
        Self { pattern, trial_duration, timing: PhaseTiming::default() }
    }

    pub fn with_timing(mut self, timing: PhaseTiming) -> Self {
        self.timing = timing.checked();
        self
    }

    pub fn trigger(&self, channel: &dyn Channel) {
        let shared_key = CorrelationKey::now();
        channel.emit(Message::meta(shared_key, MetaTag::OpenloopStart, 1));
        self.timing.trigger_fps(channel);
        self.pattern.trigger_spatial(channel);
        self.pattern.trigger_stop(channel);
        self.timing.pretrial.trigger_delay();

        debug!("[OpenLoop] animating for {} ms", self.trial_duration.milliseconds());
        self.pattern.trigger_rotation(channel);
        self.trial_duration.trigger_delay();

        self.pattern.trigger_stop(channel);
        self.timing.posttrial.trigger_delay();
        channel.emit(Message::meta(shared_key, MetaTag::OpenloopEnd, 1));
    }
}
