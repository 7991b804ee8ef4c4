//! # FlyFlix server entry point
//!
//! Waits for one display client, then runs the selected experiment over it. Every message sent
//! to the client is also written to `data/flyflix_<epoch>.csv`; closed-loop summaries are
//! appended to the configured summary CSV.
//!
//! ## Modes
//! - **Protocol:** the configured (or built-in) block of trials, shuffled and repeated.
//! - **Closed-loop dev:** one long closed-loop condition against a local FicTrac.
//! - **Local move:** a short open-loop grating followed by one bar sweep.
//!
//! Configuration: JSON file named by `FLYFLIX_CONFIG` (default `flyflix.json`).

use std::{
    error::Error,
    io::{stdin, stdout, Write},
    sync::Arc,
    time::Duration,
};

use flyflix::{
    condition::{ClosedLoopCondition, Condition, OpenLoopCondition, SweepCondition},
    experiment::{Trial, TrialReport},
    stimulus::{
        channel::{Channel, ChannelSender},
        delay::Delay,
        pattern::{Motion, StimulusPattern},
    },
    transport::{
        dispatcher::Dispatcher,
        display::{DisplayServer, DisplaySink, SessionState},
    },
    utils::{
        config::ServerConfig,
        data_logger::{DataLogger, DataSink},
        export::export_feedback_summary,
    },
};
use log::{error, info, warn};

const START_POLL: Duration = Duration::from_millis(100);
const DEV_CLOSED_LOOP_MS: f64 = 60_000.0;
const DEV_CLOSED_LOOP_GAIN: f64 = -1.0;

type RunResult = Result<(), Box<dyn Error>>;

fn main() {
    env_logger::init();
    info!("=== FLYFLIX SERVER START ===");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    loop {
        let outcome = match prompt_menu().as_str() {
            "1" | "" => run_with_display(&config, |channel, state, sink| run_protocol(&config, channel, state, sink)),
            "2" => run_with_display(&config, |channel, state, _| run_closed_loop_dev(&config, channel, state)),
            "3" => run_with_display(&config, |channel, state, _| run_local_move(channel, state)),
            "4" => {
                println!("Exiting.");
                info!("=== FLYFLIX SERVER FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
                continue;
            }
        };
        match outcome {
            Ok(()) => println!("\n Run completed. Returning to menu...\n"),
            Err(e) => error!("run failed: {}", e),
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT EXPERIMENT                       │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Protocol session                        │");
    println!("│  2) Closed-loop dev (local FicTrac)         │");
    println!("│  3) Local move (open loop + sweep)          │");
    println!("│  4) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

/// Sets up data log, display connection and dispatcher around `body`, then tears them down in
/// order: channel closed → dispatcher joined → client closed → log drained.
fn run_with_display<F>(config: &ServerConfig, body: F) -> RunResult
where
    F: FnOnce(&dyn Channel, &SessionState, &dyn DataSink) -> Vec<TrialReport>,
{
    let logger = Arc::new(DataLogger::new());
    logger.start(DataLogger::session_path(&config.data_dir)?)?;

    let server = DisplayServer::bind(config.display_addr()?)?;
    println!("Waiting for the display client on {} ...", server.local_addr()?);
    let state = SessionState::new();
    let client = Arc::new(server.accept(state.clone(), logger.clone())?);

    let (channel, rx) = ChannelSender::new();
    let display: Arc<dyn DisplaySink> = client.clone();
    let dispatcher = Dispatcher::spawn(rx, Some(display), logger.clone())?;

    let reports = body(&channel, &state, logger.as_ref());

    drop(channel);
    let stats = dispatcher.join();
    if let Some(latency) = stats.latency() {
        info!(
            "[Main] {} messages, dispatch latency ms min={:.3} mean={:.3} max={:.3}",
            stats.messages, latency.min, latency.mean, latency.max
        );
    }
    client.close();
    logger.stop();
    if logger.dropped_rows() > 0 {
        warn!("[Main] {} data log rows dropped", logger.dropped_rows());
    }

    if reports.iter().any(|r| r.feedback().next().is_some()) {
        export_feedback_summary(&config.summary_csv, &reports)?;
    }
    Ok(())
}

fn run_protocol(config: &ServerConfig, channel: &dyn Channel, state: &SessionState, sink: &dyn DataSink) -> Vec<TrialReport> {
    let session = match config.build_session() {
        Ok(session) => session,
        Err(e) => {
            error!("[Main] protocol rejected: {}", e);
            return Vec::new();
        }
    };
    info!(
        "[Main] protocol: {} trials x {} repetitions",
        session.block().trials().len(),
        session.block().repetitions()
    );
    session.run(channel, state, sink).map(|r| r.trials).unwrap_or_default()
}

fn run_closed_loop_dev(config: &ServerConfig, channel: &dyn Channel, state: &SessionState) -> Vec<TrialReport> {
    if !state.wait_for_start(START_POLL, None) {
        return Vec::new();
    }
    let sensor = match config.sensor() {
        Ok(sensor) => sensor,
        Err(e) => {
            error!("[Main] {}", e);
            return Vec::new();
        }
    };
    let condition = ClosedLoopCondition::new(
        StimulusPattern::bars(15.0, 105.0, Motion::stationary()),
        Delay::from_millis(DEV_CLOSED_LOOP_MS),
        DEV_CLOSED_LOOP_GAIN,
    )
    .with_sensor(sensor);
    run_single_trial("closed-loop-dev", vec![condition.into()], channel)
}

fn run_local_move(channel: &dyn Channel, state: &SessionState) -> Vec<TrialReport> {
    if !state.wait_for_start(START_POLL, None) {
        return Vec::new();
    }
    let grating = OpenLoopCondition::new(StimulusPattern::bars(10.0, 10.0, Motion::stationary()), Delay::from_millis(5000.0));
    let sweep = match SweepCondition::new(StimulusPattern::bars(3.0, 357.0, Motion::Rotation { deg_per_sec: -30.0 })) {
        Ok(sweep) => sweep,
        Err(e) => {
            error!("[Main] {}", e);
            return Vec::new();
        }
    };
    run_single_trial("local-move", vec![grating.into(), sweep.into()], channel)
}

fn run_single_trial(id: &str, conditions: Vec<Condition>, channel: &dyn Channel) -> Vec<TrialReport> {
    match Trial::new(id, None, conditions) {
        Ok(trial) => vec![trial.trigger(channel)],
        Err(e) => {
            error!("[Main] {}", e);
            Vec::new()
        }
    }
}
