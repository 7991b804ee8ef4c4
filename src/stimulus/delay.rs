//! delay.rs
//! Scoped blocking hold used for pre-trial, trial and post-trial phases.
//! - SpinSleeper sleeps to an absolute deadline, so the hold does not drift with wake-up jitter
//! - not cancellable; only process termination interrupts a running hold

use spin_sleep::{SpinSleeper, SpinStrategy};
use std::time::{Duration, Instant};
use log::warn;

const SPIN_NATIVE_ACCURACY_NS: u32 = 100_000;
pub const MAX_HOLD_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0; // one day

/// A duration in milliseconds, realised by [`Delay::trigger_delay`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delay {
    milliseconds: f64,
}

impl Delay {
    /// Spans above [`MAX_HOLD_MS`] are clamped to it.
    pub fn from_millis(milliseconds: f64) -> Self {
        if !milliseconds.is_finite() || milliseconds < 0.0 {
            warn!("[Delay] invalid duration {milliseconds} ms, holding for 0 ms instead");
        } else if milliseconds > MAX_HOLD_MS {
            warn!("[Delay] duration {milliseconds} ms above the {MAX_HOLD_MS} ms limit, clamped");
            return Self { milliseconds: MAX_HOLD_MS };
        }
        Self { milliseconds }
    }

    pub fn milliseconds(&self) -> f64 {
        self.milliseconds
    }

    /// Std duration; invalid (negative, NaN, infinite) values map to zero.
    pub fn as_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.milliseconds.min(MAX_HOLD_MS) / 1000.0).unwrap_or_default()
    }

    /// Blocks the calling thread for the configured span.
    pub fn trigger_delay(&self) {
        let sleeper = SpinSleeper::new(SPIN_NATIVE_ACCURACY_NS)
            .with_spin_strategy(SpinStrategy::YieldThread);
        let Some(deadline) = Instant::now().checked_add(self.as_duration()) else {
            warn!("[Delay] {} ms hold does not fit the clock, skipped", self.milliseconds);
            return;
        };

        let now = Instant::now();
        if now < deadline {
            sleeper.sleep(deadline - now);
        }
    }
}

impl Default for Delay {
    /// Half a second, the usual pre/post-trial hold.
    fn default() -> Self {
        Self { milliseconds: 500.0 }
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Self::from_millis(d.as_secs_f64() * 1000.0)
    }
}
