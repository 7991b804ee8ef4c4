//! End-to-end: a built trial runs through the dispatcher into the CSV data log.

use std::{fs, sync::Arc};

use flyflix::{
    experiment::TrialBuilder,
    stimulus::channel::ChannelSender,
    transport::dispatcher::Dispatcher,
    utils::data_logger::{DataLogger, LOG_HEADER},
};

#[test]
fn trial_markers_reach_the_data_log() {
    let dir = std::env::temp_dir().join(format!("flyflix-it-trial-log-{}", std::process::id()));
    let path = DataLogger::session_path(&dir).unwrap();
    let logger = Arc::new(DataLogger::new());
    logger.start(path.clone()).unwrap();

    let trial = TrialBuilder::new("3")
        .bars(30.0, 30.0)
        .rotation(10.0)
        .open_loop_duration(20.0)
        .holds(1.0, 1.0)
        .comment("integration")
        .build()
        .unwrap();

    let (channel, rx) = ChannelSender::new();
    let dispatcher = Dispatcher::spawn(rx, None, logger.clone()).unwrap();
    let report = trial.trigger(&channel);
    drop(channel);
    let stats = dispatcher.join();
    logger.stop();

    assert!(report.elapsed >= trial.minimum_runtime());
    assert_eq!(logger.dropped_rows(), 0);

    let mut rdr = csv::Reader::from_path(&path).unwrap();
    assert_eq!(rdr.headers().unwrap().iter().collect::<Vec<_>>(), LOG_HEADER);
    let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len() as u64, stats.messages);

    let tag_value = |r: &csv::StringRecord| (r[3].to_string(), r[4].to_string());
    assert_eq!(tag_value(&rows[0]), ("trial-start".to_string(), "3".to_string()));
    assert_eq!(tag_value(&rows[1]), ("comment".to_string(), "integration".to_string()));
    assert_eq!(tag_value(rows.last().unwrap()), ("trial-end".to_string(), "3".to_string()));
    assert!(rows.iter().all(|r| r[1].is_empty()));
    assert!(rows.iter().any(|r| &r[3] == "openloop-start"));

    fs::remove_dir_all(dir).ok();
}
