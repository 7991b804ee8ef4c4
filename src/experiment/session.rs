//! session.rs
//! One experiment session: wait for the client, record metadata, hold, run the block.

use std::{collections::BTreeMap, time::Duration};
use log::{info, warn};

use crate::experiment::block::{Block, BlockReport};
use crate::stimulus::{
    channel::{Channel, CorrelationKey},
    delay::Delay,
};
use crate::transport::display::SessionState;
use crate::utils::data_logger::{DataSink, LogRow};

pub const START_POLL_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct Session {
    block: Block,
    metadata: BTreeMap<String, String>,
    opening_hold: Delay,
    start_timeout: Option<Duration>,
}

impl Session {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            metadata: BTreeMap::new(),
            opening_hold: Delay::from_millis(0.0),
            start_timeout: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Blank period between the start signal and the first trial.
    pub fn with_opening_hold(mut self, hold: Delay) -> Self {
        self.opening_hold = hold;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    /// `None` when the client never asked to start.
    pub fn run(&self, channel: &dyn Channel, state: &SessionState, sink: &dyn DataSink) -> Option<BlockReport> {
        info!("[Session] waiting for the display client to start");
        if !state.wait_for_start(Duration::from_millis(START_POLL_MS), self.start_timeout) {
            warn!("[Session] no start signal, nothing run");
            return None;
        }

        let shared_key = CorrelationKey::now();
        for (key, value) in &self.metadata {
            sink.record(LogRow::server(shared_key.value(), key.as_str(), value));
        }

        sink.record(LogRow::server(shared_key.value(), "pre-experiment-duration", self.opening_hold.milliseconds()));
        self.opening_hold.trigger_delay();

        let report = self.block.run(channel, state);
        sink.record(LogRow::server(shared_key.value(), "experiment-end", u8::from(report.completed)));
        info!(
            "[Session] {} trials run{}",
            report.trials.len(),
            if report.completed { "" } else { " (stopped early)" }
        );
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::builder::TrialBuilder;
    use crate::stimulus::channel::ChannelSender;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Rows(Mutex<Vec<LogRow>>);

    impl DataSink for Rows {
        fn record(&self, row: LogRow) {
            self.0.lock().push(row);
        }
    }

    fn one_trial_block() -> Block {
        let trial = TrialBuilder::new("t").bar(30.0).open_loop_duration(1.0).holds(0.0, 0.0).build().unwrap();
        Block::new(vec![trial], 1)
    }

    #[test]
    fn nothing_runs_without_start() {
        let (channel, rx) = ChannelSender::new();
        let rows = Rows::default();
        let session = Session::new(one_trial_block()).with_start_timeout(Duration::from_millis(10));
        assert!(session.run(&channel, &SessionState::default(), &rows).is_none());
        assert!(rows.0.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn metadata_logged_after_start() {
        let (channel, _rx) = ChannelSender::new();
        let rows = Rows::default();
        let state = SessionState::default();
        state.request_start();
        let metadata = BTreeMap::from([("fly".to_string(), "236".to_string()), ("sex".to_string(), "f".to_string())]);
        Session::new(one_trial_block()).with_metadata(metadata).run(&channel, &state, &rows).unwrap();
        let tags: Vec<String> = rows.0.lock().iter().map(|r| r.tag.clone()).collect();
        assert_eq!(tags, ["fly", "sex", "pre-experiment-duration", "experiment-end"]);
    }

    #[test]
    fn started_session_runs_block() {
        let (channel, _rx) = ChannelSender::new();
        let rows = Rows::default();
        let state = SessionState::default();
        state.request_start();
        let report = Session::new(one_trial_block())
            .with_opening_hold(Delay::from_millis(5.0))
            .run(&channel, &state, &rows)
            .unwrap();
        assert!(report.completed);
        assert_eq!(report.trials.len(), 1);
        assert_eq!(rows.0.lock().last().unwrap().tag, "experiment-end");
    }
}
