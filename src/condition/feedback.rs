//! feedback.rs
//! Sensor feedback task: motion-tracker datagrams → angular velocity → speed commands.
//!
//! - binds the sensor endpoint itself; the socket never leaves the task
//! - 100 ms read timeout so a closed active window is noticed promptly
//! - malformed or foreign records are skipped silently and only counted
//! - heading deltas are unwrapped into (-π, π] so crossing 0/2π does not spike the velocity
//!
//! Record format: newline-terminated ASCII, tokens separated by ", ", first token `FT`,
//! at least 24 tokens. Token 1 is the frame counter, 17 the integrated heading (rad),
//! 22 the frame timestamp (ms).

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    f64::consts::{PI, TAU},
    io,
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};
use log::{debug, info, warn};

use crate::stimulus::channel::{Channel, CorrelationKey, Message, MetaTag};
use crate::utils::metrics::FeedbackReport;

pub const SENTINEL: &str = "FT";
pub const TOKEN_SEPARATOR: &str = ", ";
pub const MIN_TOKENS: usize = 24;
const SEQUENCE_TOKEN: usize = 1;
const HEADING_TOKEN: usize = 17;
const TIMESTAMP_TOKEN: usize = 22;

pub const DEFAULT_SENSOR_ENDPOINT: &str = "127.0.0.1:1717";
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;
const RECV_BUFFER_BYTES: usize = 1024;
const MAX_PENDING_BYTES: usize = 4 * RECV_BUFFER_BYTES; // unterminated data beyond this is dropped

/// One tracker frame, kept only long enough to compute a velocity sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorFrame {
    pub sequence: u64,
    pub heading_rad: f64,
    pub timestamp_ms: f64,
}

impl SensorFrame {
    /// Parses one record (without its newline). `None` for anything that is not a tracker frame.
    pub fn parse(record: &str) -> Option<Self> {
        let tokens: Vec<&str> = record.trim_end_matches('\r').split(TOKEN_SEPARATOR).collect();
        if tokens.len() < MIN_TOKENS || tokens[0] != SENTINEL {
            return None;
        }
        Some(Self {
            sequence: tokens[SEQUENCE_TOKEN].trim().parse().ok()?,
            heading_rad: tokens[HEADING_TOKEN].trim().parse().ok()?,
            timestamp_ms: tokens[TIMESTAMP_TOKEN].trim().parse().ok()?,
        })
    }
}

/// Reassembles newline-delimited records from arbitrary datagram boundaries.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
        if self.pending.len() > MAX_PENDING_BYTES && !self.pending.contains('\n') {
            debug!("[Feedback] {} bytes without a record terminator, discarded", self.pending.len());
            self.pending.clear();
        }
    }

    /// Next complete record; partial trailing data stays buffered.
    pub fn next_record(&mut self) -> Option<String> {
        let end = self.pending.find('\n')?;
        let record = self.pending[..end].to_string();
        self.pending.drain(..=end);
        Some(record)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Unwraps a heading difference into (-π, π].
pub fn normalize_delta(delta: f64) -> f64 {
    let wrapped = (delta + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI { PI } else { wrapped }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySample {
    pub sequence: u64,
    /// rad/s, before gain
    pub velocity: f64,
    pub interval_ms: f64,
    pub wrapped: bool,
}

/// Velocity from consecutive frames.
#[derive(Debug, Default)]
pub struct VelocityEstimator {
    previous: Option<SensorFrame>,
}

impl VelocityEstimator {
    /// Feeds one frame. Returns a sample when a previous frame exists and time advanced.
    pub fn update(&mut self, frame: SensorFrame) -> Option<VelocitySample> {
        let previous = self.previous.replace(frame)?;
        let interval_ms = frame.timestamp_ms - previous.timestamp_ms;
        if interval_ms <= 0.0 || !interval_ms.is_finite() {
            return None;
        }
        let raw = frame.heading_rad - previous.heading_rad;
        let delta = normalize_delta(raw);
        Some(VelocitySample {
            sequence: frame.sequence,
            velocity: delta / (interval_ms / 1000.0),
            interval_ms,
            wrapped: (delta - raw).abs() > f64::EPSILON,
        })
    }
}

/// Active-window signal. Dropping or closing the window ends the feedback loop.
pub struct ActiveWindow {
    _tx: Sender<()>,
}

impl ActiveWindow {
    pub fn close(self) {}
}

/// Read side of [`ActiveWindow`], handed to the feedback task at spawn.
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn is_active(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }
}

pub fn active_window() -> (ActiveWindow, StopSignal) {
    let (tx, rx) = bounded(1);
    (ActiveWindow { _tx: tx }, StopSignal { rx })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConfig {
    pub endpoint: SocketAddr,
    pub read_timeout: Duration,
    /// How long the first datagram may take to arrive before the sensor counts as unavailable.
    pub handshake_timeout: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        let timeout = Duration::from_millis(DEFAULT_READ_TIMEOUT_MS);
        Self {
            endpoint: SocketAddr::from(([127, 0, 0, 1], 1717)),
            read_timeout: timeout,
            handshake_timeout: timeout,
        }
    }
}

/// UDP socket bound to the sensor endpoint with a read timeout.
pub fn bind_sensor_socket(endpoint: SocketAddr, read_timeout: Duration) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(endpoint), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(endpoint))?;
    socket.set_read_timeout(Some(read_timeout))?;
    Ok(socket.into())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Feedback task body for one closed-loop window.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackLoop {
    pub sensor: SensorConfig,
    pub gain: f64,
}

impl FeedbackLoop {
    pub fn new(sensor: SensorConfig, gain: f64) -> Self {
        Self { sensor, gain }
    }

    /// Runs until the window closes, the socket fails, or the peer sends an empty datagram.
    /// A sensor that cannot be reached ends the task immediately with `connected == false`.
    pub fn run(&self, channel: &dyn Channel, stop: &StopSignal) -> FeedbackReport {
        let shared_key = CorrelationKey::now();
        let mut report = FeedbackReport::default();
        let mut frames = FrameBuffer::default();
        let mut buf = [0u8; RECV_BUFFER_BYTES];

        let socket = match self.connect(&mut frames, &mut buf) {
            Ok(socket) => socket,
            Err(e) => {
                channel.emit(Message::meta(shared_key, MetaTag::FictracConnectFail, 0));
                warn!("[Feedback] sensor not available on {}: {}", self.sensor.endpoint, e);
                return report;
            }
        };
        report.connected = true;
        channel.emit(Message::meta(shared_key, MetaTag::FictracConnectOk, 1));
        info!("[Feedback] connected to sensor on {}", self.sensor.endpoint);

        let mut estimator = VelocityEstimator::default();
        'window: while stop.is_active() {
            while let Some(record) = frames.next_record() {
                if !stop.is_active() {
                    break 'window;
                }
                let Some(frame) = SensorFrame::parse(&record) else {
                    report.skipped_records += 1;
                    continue;
                };
                report.frames += 1;
                if let Some(sample) = estimator.update(frame) {
                    channel.emit(Message::Speed {
                        key: CorrelationKey::from_frame(sample.sequence),
                        rad_per_sec: sample.velocity * self.gain,
                    });
                    report.speed_commands += 1;
                    report.last_emit = Some(Instant::now());
                    if sample.wrapped {
                        report.wrapped_deltas += 1;
                    }
                    report.record_velocity(sample.velocity, sample.interval_ms);
                }
            }

            match socket.recv(&mut buf) {
                Ok(0) => {
                    debug!("[Feedback] empty datagram, peer disconnected");
                    break;
                }
                Ok(n) => frames.push(&buf[..n]),
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    warn!("[Feedback] sensor read failed: {}", e);
                    break;
                }
            }
        }

        drop(socket);
        channel.emit(Message::meta(shared_key, MetaTag::FictracDisconnectOk, 1));
        debug!(
            "[Feedback] stopped. frames={} skipped={} speed_commands={}",
            report.frames, report.skipped_records, report.speed_commands
        );
        report
    }

    /// Binds the endpoint and waits for the first datagram, which seeds the frame buffer.
    fn connect(&self, frames: &mut FrameBuffer, buf: &mut [u8]) -> io::Result<UdpSocket> {
        let socket = bind_sensor_socket(self.sensor.endpoint, self.sensor.handshake_timeout)?;
        let n = socket.recv(buf)?;
        frames.push(&buf[..n]);
        socket.set_read_timeout(Some(self.sensor.read_timeout))?;
        Ok(socket)
    }
}
