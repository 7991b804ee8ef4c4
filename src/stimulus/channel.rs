//! channel.rs
//! Outbound messages to the display client and the `Channel` seam conditions emit through.
//!
//! Every message carries a correlation key. Keys come from the wall clock in nanoseconds and are
//! forced strictly increasing, so two emissions within the same clock tick never share a key.
//! Sensor-driven speed commands are the exception: they are keyed with the sensor frame number.

use crossbeam::channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use log::debug;

const CHANNEL_CAPACITY: usize = 4096;

static LAST_KEY: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CorrelationKey(u64);

impl CorrelationKey {
    /// Fresh key from the high-resolution wall clock, unique for the process lifetime.
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let mut prev = LAST_KEY.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match LAST_KEY.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => return Self(next),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn from_frame(sequence: u64) -> Self {
        Self(sequence)
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetaTag {
    OpenloopStart,
    OpenloopEnd,
    ClosedloopStart,
    ClosedloopEnd,
    FictracConnectOk,
    FictracConnectFail,
    FictracDisconnectOk,
    TrialStart,
    TrialEnd,
    ConditionType,
    ConditionStart,
    ConditionEnd,
    Comment,
    BlockRepetition,
}

impl MetaTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaTag::OpenloopStart => "openloop-start",
            MetaTag::OpenloopEnd => "openloop-end",
            MetaTag::ClosedloopStart => "closedloop-start",
            MetaTag::ClosedloopEnd => "closedloop-end",
            MetaTag::FictracConnectOk => "fictrac-connect-ok",
            MetaTag::FictracConnectFail => "fictrac-connect-fail",
            MetaTag::FictracDisconnectOk => "fictrac-disconnect-ok",
            MetaTag::TrialStart => "trial-start",
            MetaTag::TrialEnd => "trial-end",
            MetaTag::ConditionType => "condition-type",
            MetaTag::ConditionStart => "condition-start",
            MetaTag::ConditionEnd => "condition-end",
            MetaTag::Comment => "comment",
            MetaTag::BlockRepetition => "block-repetition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Text(String),
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        MetaValue::Int(v.into())
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

impl std::fmt::Display for MetaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Text(v) => f.write_str(v),
        }
    }
}

/// Wire message. Serialized as one JSON object with an `event` field naming the message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Message {
    Fps {
        key: CorrelationKey,
        fps: f64,
    },
    SpatialSetup {
        key: CorrelationKey,
        bar_rad: f64,
        space_rad: f64,
        start_mask_rad: f64,
        end_mask_rad: f64,
        fg_color: u32,
        bg_color: u32,
        bar_height: f64,
    },
    #[serde(rename = "spatial-setup")]
    StarfieldSetup {
        key: CorrelationKey,
        sphere_count: u32,
        sphere_radius_rad: f64,
        shell_radius: f64,
        color: u32,
        points: Vec<[f64; 3]>,
    },
    Speed {
        key: CorrelationKey,
        rad_per_sec: f64,
    },
    RotateTo {
        key: CorrelationKey,
        angle_rad: f64,
    },
    Oscillation {
        key: CorrelationKey,
        freq_hz: f64,
        width_rad: f64,
    },
    Sweepcount {
        key: CorrelationKey,
        count: u32,
    },
    Meta {
        key: CorrelationKey,
        tag: MetaTag,
        value: MetaValue,
    },
}

impl Message {
    pub fn meta(key: CorrelationKey, tag: MetaTag, value: impl Into<MetaValue>) -> Self {
        Message::Meta { key, tag, value: value.into() }
    }

    pub fn key(&self) -> CorrelationKey {
        match self {
            Message::Fps { key, .. }
            | Message::SpatialSetup { key, .. }
            | Message::StarfieldSetup { key, .. }
            | Message::Speed { key, .. }
            | Message::RotateTo { key, .. }
            | Message::Oscillation { key, .. }
            | Message::Sweepcount { key, .. }
            | Message::Meta { key, .. } => *key,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Message::Fps { .. } => "fps",
            Message::SpatialSetup { .. } | Message::StarfieldSetup { .. } => "spatial-setup",
            Message::Speed { .. } => "speed",
            Message::RotateTo { .. } => "rotate-to",
            Message::Oscillation { .. } => "oscillation",
            Message::Sweepcount { .. } => "sweepcount",
            Message::Meta { .. } => "meta",
        }
    }

    /// `(tag, value)` pair written to the data log for this message.
    pub fn log_fields(&self) -> (String, String) {
        match self {
            Message::Fps { fps, .. } => ("fps".into(), fps.to_string()),
            Message::SpatialSetup { bar_rad, space_rad, start_mask_rad, end_mask_rad, .. } => (
                "spatial-setup".into(),
                format!("{bar_rad};{space_rad};{start_mask_rad};{end_mask_rad}"),
            ),
            Message::StarfieldSetup { sphere_count, sphere_radius_rad, shell_radius, .. } => (
                "spatial-setup".into(),
                format!("{sphere_count};{sphere_radius_rad};{shell_radius}"),
            ),
            Message::Speed { rad_per_sec, .. } => ("speed".into(), rad_per_sec.to_string()),
            Message::RotateTo { angle_rad, .. } => ("rotate-to".into(), angle_rad.to_string()),
            Message::Oscillation { freq_hz, width_rad, .. } => {
                ("oscillation".into(), format!("{freq_hz};{width_rad}"))
            }
            Message::Sweepcount { count, .. } => ("sweepcount".into(), count.to_string()),
            Message::Meta { tag, value, .. } => (tag.as_str().into(), value.to_string()),
        }
    }

    /// True for a zero-velocity `speed` command.
    pub fn is_stop(&self) -> bool {
        matches!(self, Message::Speed { rad_per_sec, .. } if *rad_per_sec == 0.0)
    }
}

/// A message stamped with the instant it left the emitting thread.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Message,
    pub emitted_at: Instant,
}

/// Outbound side of the display connection.
pub trait Channel: Send + Sync {
    fn emit(&self, message: Message);
}

/// Crossbeam-backed channel. The receiving half is drained by the dispatcher
/// (display writer + data logger) or directly by tests.
#[derive(Clone)]
pub struct ChannelSender {
    tx: Sender<Envelope>,
}

impl ChannelSender {
    pub fn new() -> (Self, Receiver<Envelope>) {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, Receiver<Envelope>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }
}

impl Channel for ChannelSender {
    fn emit(&self, message: Message) {
        let envelope = Envelope { message, emitted_at: Instant::now() };
        // Blocking send: phase commands must not be dropped under backpressure.
        if let Err(e) = self.tx.send(envelope) {
            debug!("[Channel] receiver gone, dropping {}", e.0.message.event_name());
        }
    }
}
