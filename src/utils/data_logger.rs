//! data_logger.rs
//! Experiment data log: every outbound message and every client-reported value, one CSV row each.
//!
//! - producers push onto a bounded lock-free queue and never block; a full queue drops the row
//!   and counts it
//! - one consumer thread drains the queue in batches and flushes every few batches
//! - `stop()` drains whatever is left before joining

use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crossbeam_queue::ArrayQueue;
use csv::{Writer, WriterBuilder};
use parking_lot::Mutex;
use serde::Serialize;
use log::{debug, error, info};

use crate::stimulus::channel::Envelope;
use crate::utils::error::TransportError;

const LOG_CAPACITY: usize = 8192; // bounded queue
const CONSUMER_POLL_MS: u64 = 5; // consumer sleep when idle
const FLUSH_BATCHES: usize = 8; // batches between flushes
const BATCH_SIZE: usize = 256;
pub const LOG_HEADER: [&str; 5] = ["server_ts_ns", "client_ts", "key", "tag", "value"];

/// One line of the data log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub server_ts_ns: u64,
    /// Empty for server-originated rows.
    pub client_ts: String,
    pub key: String,
    pub tag: String,
    pub value: String,
}

fn epoch_ns() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

impl LogRow {
    pub fn server(key: impl ToString, tag: impl Into<String>, value: impl ToString) -> Self {
        Self {
            server_ts_ns: epoch_ns(),
            client_ts: String::new(),
            key: key.to_string(),
            tag: tag.into(),
            value: value.to_string(),
        }
    }

    /// Client-reported value: client timestamp, originating server key, key, value.
    pub fn client(client_ts: impl ToString, request_key: impl ToString, key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            server_ts_ns: epoch_ns(),
            client_ts: client_ts.to_string(),
            key: request_key.to_string(),
            tag: key.into(),
            value: value.to_string(),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Self {
        let (tag, value) = envelope.message.log_fields();
        Self::server(envelope.message.key().value(), tag, value)
    }
}

/// Where log rows go. The logger is the production sink; tests collect rows in memory.
pub trait DataSink: Send + Sync {
    fn record(&self, row: LogRow);
}

pub struct DataLogger {
    queue: Arc<ArrayQueue<LogRow>>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for DataLogger {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl DataLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
            dropped: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// `<dir>/flyflix_<epoch seconds>.csv`; creates `dir` when missing.
    pub fn session_path(dir: &Path) -> Result<PathBuf, TransportError> {
        if dir.exists() && !dir.is_dir() {
            return Err(TransportError::LogFile {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists as a file"),
            });
        }
        fs::create_dir_all(dir).map_err(|source| TransportError::LogFile { path: dir.to_path_buf(), source })?;
        let epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Ok(dir.join(format!("flyflix_{epoch}.csv")))
    }

    /// Opens `output_csv`, writes the header and starts the consumer thread.
    pub fn start(&self, output_csv: PathBuf) -> Result<(), TransportError> {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return Err(TransportError::LoggerRunning);
        }

        let file = File::create(&output_csv)
            .map_err(|source| TransportError::LogFile { path: output_csv.clone(), source })?;
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(BufWriter::new(file));
        wtr.write_record(LOG_HEADER).ok();

        let queue = self.queue.clone();
        let running = self.running.clone();
        let dropped = self.dropped.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("data-logger".into())
            .spawn(move || {
                let mut flush_counter = 0usize;
                while running.load(Ordering::SeqCst) {
                    if drain_batch(&queue, &mut wtr) > 0 {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }
                while drain_batch(&queue, &mut wtr) > 0 {}
                wtr.flush().ok();
                debug!("[DataLogger] consumer exiting. dropped_rows={}", dropped.load(Ordering::Relaxed));
            })
            .map_err(TransportError::Io)?;

        info!("[DataLogger] writing to {:?}", output_csv);
        *guard = Some(handle);
        Ok(())
    }

    /// Drains the queue and joins the consumer. No-op when not running.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("[DataLogger] consumer thread panicked");
            }
        }
    }

    pub fn log_message(&self, envelope: &Envelope) {
        self.record(LogRow::from_envelope(envelope));
    }

    pub fn dropped_rows(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl DataSink for DataLogger {
    fn record(&self, row: LogRow) {
        if self.queue.push(row).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_batch<W: std::io::Write>(queue: &ArrayQueue<LogRow>, wtr: &mut Writer<W>) -> usize {
    let mut written = 0;
    while written < BATCH_SIZE {
        let Some(row) = queue.pop() else { break };
        wtr.serialize(&row).ok();
        written += 1;
    }
    written
}
