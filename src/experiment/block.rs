//! block.rs
//! A block of trials repeated in shuffled order.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use log::info;

use crate::experiment::trial::{Trial, TrialReport};
use crate::stimulus::channel::{Channel, CorrelationKey, Message, MetaTag};
use crate::transport::display::SessionState;

#[derive(Debug, Clone)]
pub struct Block {
    trials: Vec<Trial>,
    repetitions: u32,
    seed: Option<u64>,
}

/// Outcome of a block run. `completed` is false when a stop request cut it short.
#[derive(Debug, Clone, Default)]
pub struct BlockReport {
    pub trials: Vec<TrialReport>,
    pub completed: bool,
}

impl Block {
    pub fn new(trials: Vec<Trial>, repetitions: u32) -> Self {
        Self { trials, repetitions, seed: None }
    }

    /// Fixed shuffle order, for reproducible protocols and tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Each repetition announces itself, shuffles the trials and numbers them from 1 with a counter
    /// that keeps running across repetitions. A stop request is honoured between trials only.
    pub fn run(&self, channel: &dyn Channel, state: &SessionState) -> BlockReport {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut report = BlockReport::default();
        let mut counter: u64 = 0;

        for repetition in 0..self.repetitions {
            channel.emit(Message::meta(CorrelationKey::now(), MetaTag::BlockRepetition, i64::from(repetition)));
            let mut order = self.trials.clone();
            order.shuffle(&mut rng);

            for mut trial in order {
                if state.stop_requested() {
                    info!("[Block] stop requested, ending after {} trials", counter);
                    return report;
                }
                counter += 1;
                trial.set_id(counter.to_string());
                report.trials.push(trial.trigger(channel));
            }
        }
        report.completed = true;
        report
    }
}
