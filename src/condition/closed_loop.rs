//! closed_loop.rs
//! Closed-loop condition: the subject's own turning drives the pattern.
//!
//! Phase order:
//!   closedloop-start → fps → spatial → stop → closed-loop start angle → pretrial
//!   → [feedback thread active] trial duration → close window → join
//!   → stop → posttrial → closedloop-end
//!
//! The feedback thread lives in a `thread::scope` and is always joined before the closing stop,
//! so no speed command can follow it.

use std::thread;
use log::{debug, error, info};
use thread_priority::{set_current_thread_priority, ThreadPriority};

use crate::condition::{
    feedback::{active_window, FeedbackLoop, SensorConfig},
    PhaseTiming,
};
use crate::stimulus::{
    channel::{Channel, CorrelationKey, Message, MetaTag},
    delay::Delay,
    pattern::StimulusPattern,
};
use crate::utils::metrics::FeedbackReport;

pub const DEFAULT_GAIN: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ClosedLoopCondition {
    pub pattern: StimulusPattern,
    pub trial_duration: Delay,
    pub gain: f64,
    pub timing: PhaseTiming,
    pub sensor: SensorConfig,
}

impl ClosedLoopCondition {
    pub fn new(pattern: StimulusPattern, trial_duration: Delay, gain: f64) -> Self {
        Self {
            pattern,
            trial_duration,
            gain,
            timing: PhaseTiming::default(),
            sensor: SensorConfig::default(),
        }
    }

    pub fn with_timing(mut self, timing: PhaseTiming) -> Self {
        self.timing = timing.checked();
        self
    }

    pub fn with_sensor(mut self, sensor: SensorConfig) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn trigger(&self, channel: &dyn Channel) -> FeedbackReport {
        let shared_key = CorrelationKey::now();
        channel.emit(Message::meta(shared_key, MetaTag::ClosedloopStart, 1));
        self.timing.trigger_fps(channel);
        self.pattern.trigger_spatial(channel);
        self.pattern.trigger_stop(channel);
        self.pattern.trigger_closed_loop_start_position(channel);
        self.timing.pretrial.trigger_delay();

        let report = self.run_active_window(channel);

        self.pattern.trigger_stop(channel);
        self.timing.posttrial.trigger_delay();
        channel.emit(Message::meta(shared_key, MetaTag::ClosedloopEnd, 1));
        report
    }

    /// Feedback thread alive for exactly the trial duration; returns once it has been joined.
    fn run_active_window(&self, channel: &dyn Channel) -> FeedbackReport {
        let feedback = FeedbackLoop::new(self.sensor, self.gain);
        let (window, stop) = active_window();

        thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name("feedback".into())
                .spawn_scoped(scope, move || {
                    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
                        debug!("[ClosedLoop] could not raise feedback priority: {:?}", e);
                    }
                    feedback.run(channel, &stop)
                });

            info!("[ClosedLoop] active for {} ms, gain {}", self.trial_duration.milliseconds(), self.gain);
            self.trial_duration.trigger_delay();
            window.close();

            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    error!("[ClosedLoop] feedback thread panicked");
                    FeedbackReport::default()
                }),
                Err(e) => {
                    error!("[ClosedLoop] failed to spawn feedback thread: {}", e);
                    FeedbackReport::default()
                }
            }
        })
    }
}
