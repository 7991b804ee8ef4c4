//! Server configuration, loaded from a JSON file.
//!
//! Every field has a default, so an empty object (or a missing file) gives a runnable server with
//! the built-in bar-sweep protocol.

use std::{
    collections::BTreeMap,
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use log::info;

use crate::condition::feedback::{SensorConfig, DEFAULT_READ_TIMEOUT_MS, DEFAULT_SENSOR_ENDPOINT};
use crate::experiment::{Block, Session, TrialSpec};
use crate::stimulus::delay::Delay;
use crate::utils::error::ConfigError;

pub const CONFIG_ENV: &str = "FLYFLIX_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "flyflix.json";
const DEFAULT_DISPLAY_ADDR: &str = "0.0.0.0:17000";
const DEFAULT_OPENING_HOLD_MS: f64 = 10_000.0; // blank screen before the first trial
const DEFAULT_REPETITIONS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub display_addr: String,
    pub sensor_addr: String,
    pub sensor_read_timeout_ms: u64,
    pub sensor_handshake_timeout_ms: u64,
    pub data_dir: PathBuf,
    pub summary_csv: PathBuf,
    pub opening_hold_ms: f64,
    pub repetitions: u32,
    pub shuffle_seed: Option<u64>,
    /// Experiment notes (strain, temperature, …) written to the data log at start.
    pub metadata: BTreeMap<String, String>,
    /// Trials of one block. Empty means the built-in protocol.
    pub protocol: Vec<TrialSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            display_addr: DEFAULT_DISPLAY_ADDR.to_string(),
            sensor_addr: DEFAULT_SENSOR_ENDPOINT.to_string(),
            sensor_read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            sensor_handshake_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            data_dir: PathBuf::from("data"),
            summary_csv: PathBuf::from("data/feedback_summary.csv"),
            opening_hold_ms: DEFAULT_OPENING_HOLD_MS,
            repetitions: DEFAULT_REPETITIONS,
            shuffle_seed: None,
            metadata: BTreeMap::new(),
            protocol: Vec::new(),
        }
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|_| ConfigError::Address(addr.to_string()))
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        info!("[Config] loaded {:?}", path);
        Ok(config)
    }

    /// `FLYFLIX_CONFIG` or `flyflix.json`; defaults when that file does not exist.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        if path.exists() {
            Self::load(&path)
        } else {
            info!("[Config] {:?} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn display_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr(&self.display_addr)
    }

    pub fn sensor(&self) -> Result<SensorConfig, ConfigError> {
        Ok(SensorConfig {
            endpoint: parse_addr(&self.sensor_addr)?,
            read_timeout: Duration::from_millis(self.sensor_read_timeout_ms),
            handshake_timeout: Duration::from_millis(self.sensor_handshake_timeout_ms),
        })
    }

    /// Configured trials, or the built-in protocol when none are listed.
    pub fn trial_specs(&self) -> Vec<TrialSpec> {
        if self.protocol.is_empty() {
            default_protocol()
        } else {
            self.protocol.clone()
        }
    }

    pub fn build_session(&self) -> Result<Session, ConfigError> {
        let sensor = self.sensor()?;
        let trials = self
            .trial_specs()
            .iter()
            .map(|spec| spec.build(sensor))
            .collect::<Result<Vec<_>, _>>()?;
        let mut block = Block::new(trials, self.repetitions);
        if let Some(seed) = self.shuffle_seed {
            block = block.with_seed(seed);
        }
        Ok(Session::new(block)
            .with_metadata(self.metadata.clone())
            .with_opening_hold(Delay::from_millis(self.opening_hold_ms)))
    }
}

/// Object-speed protocol: a 60° bar swept once at one of twelve speeds, followed by 30 s of
/// closed loop on an opposing 180° pattern at one of eight gains.
pub fn default_protocol() -> Vec<TrialSpec> {
    const SPEEDS_HZ: [f64; 12] = [0.25, 1.0, 4.0, 7.5, 15.0, 30.0, -0.25, -1.0, -4.0, -7.5, -15.0, -30.0];
    const GAINS: [f64; 8] = [-1.0, -0.5, 0.5, 1.0, 1.5, 2.0, 4.0, 8.0];
    const STARTS_PER_GAIN: usize = 4;
    const CLOSED_LOOP_BAR_DEG: f64 = 180.0;

    let mut specs = Vec::with_capacity(GAINS.len() * STARTS_PER_GAIN);
    for gain in GAINS {
        for _ in 0..STARTS_PER_GAIN {
            let speed = SPEEDS_HZ[specs.len() % SPEEDS_HZ.len()];
            specs.push(TrialSpec {
                id: specs.len().to_string(),
                bar_deg: Some(60.0),
                space_deg: Some(300.0),
                openloop_duration_ms: None,
                sweep: Some(1),
                rotate_deg_per_sec: CLOSED_LOOP_BAR_DEG * 2.0 * speed,
                closedloop_bar_deg: Some(CLOSED_LOOP_BAR_DEG),
                closedloop_duration_ms: 30_000.0,
                gain,
                comment: Some(format!("object speed {speed} bar {CLOSED_LOOP_BAR_DEG} gain {gain}")),
                ..TrialSpec::default()
            });
        }
    }
    specs
}
