//! display.rs
//! Connection to the display client.
//!
//! - TCP listener built with socket2 (reuse-address), exactly one client per session
//! - outbound: one JSON object per line, written under a mutex so lines never interleave
//! - inbound: a reader thread parses client events and updates the shared `SessionState`

use std::{
    io::{self, BufRead, BufReader, BufWriter, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use socket2::{Domain, SockAddr, Socket, Type};
use log::{debug, info, warn};

use crate::stimulus::channel::Message;
use crate::utils::{
    data_logger::{DataSink, LogRow},
    error::TransportError,
};

const LISTEN_BACKLOG: i32 = 1;

/// Flags shared between the client reader and the experiment thread.
#[derive(Debug, Default)]
pub struct SessionState {
    started: AtomicBool,
    stop_requested: AtomicBool,
    connected: AtomicBool,
    pongs: AtomicU64,
}

impl SessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn pongs(&self) -> u64 {
        self.pongs.load(Ordering::Relaxed)
    }

    /// Polls until the client asks to start. `false` if a stop request or the timeout came first.
    pub fn wait_for_start(&self, poll: Duration, timeout: Option<Duration>) -> bool {
        let began = Instant::now();
        while !self.is_started() {
            if self.stop_requested() || timeout.is_some_and(|t| began.elapsed() >= t) {
                return false;
            }
            thread::sleep(poll);
        }
        true
    }
}

/// Events the display client sends, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    StartExperiment,
    StopExperiment,
    /// Round-trip reply answering a server key.
    Pong { client_ts: Value, request_key: Value },
    /// Client-side data log entry.
    Dl { client_ts: Value, request_key: Value, key: String, value: Value },
    /// Server-side log entry requested by the client.
    Slog { key: String, value: Value },
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ClientEvent {
    pub fn parse(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    /// Applies the event to the session and the data log.
    pub fn apply(&self, state: &SessionState, sink: &dyn DataSink) {
        match self {
            ClientEvent::StartExperiment => {
                info!("[Display] start requested by client");
                state.request_start();
            }
            ClientEvent::StopExperiment => {
                info!("[Display] stop requested by client");
                state.request_stop();
            }
            ClientEvent::Pong { client_ts, request_key } => {
                state.pongs.fetch_add(1, Ordering::Relaxed);
                sink.record(LogRow::client(plain(client_ts), plain(request_key), "pong", ""));
            }
            ClientEvent::Dl { client_ts, request_key, key, value } => {
                sink.record(LogRow::client(plain(client_ts), plain(request_key), key.as_str(), plain(value)));
            }
            ClientEvent::Slog { key, value } => {
                sink.record(LogRow::server(0, key.as_str(), plain(value)));
            }
        }
    }
}

/// Outbound side of the client connection. The dispatcher writes through this.
pub trait DisplaySink: Send + Sync {
    fn send(&self, message: &Message) -> io::Result<()>;
}

pub struct DisplayServer {
    listener: TcpListener,
}

impl DisplayServer {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener: TcpListener = socket.into();
        info!("[Display] listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks until the display client connects, then starts its reader thread.
    pub fn accept(&self, state: Arc<SessionState>, sink: Arc<dyn DataSink>) -> Result<DisplayClient, TransportError> {
        let (stream, peer) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        info!("[Display] client connected from {}", peer);
        state.set_connected(true);

        let reader_stream = stream.try_clone()?;
        let reader_state = state.clone();
        let reader = thread::Builder::new()
            .name("display-reader".into())
            .spawn(move || read_events(reader_stream, &reader_state, sink.as_ref()))?;

        Ok(DisplayClient {
            writer: Mutex::new(BufWriter::new(stream)),
            reader: Mutex::new(Some(reader)),
        })
    }
}

fn read_events(stream: TcpStream, state: &SessionState, sink: &dyn DataSink) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                debug!("[Display] read ended: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match ClientEvent::parse(&line) {
            Some(event) => event.apply(state, sink),
            None => debug!("[Display] ignoring client line: {}", line),
        }
    }
    state.set_connected(false);
    info!("[Display] client disconnected");
}

pub struct DisplayClient {
    writer: Mutex<BufWriter<TcpStream>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DisplayClient {
    /// Shuts the socket down and joins the reader.
    pub fn close(&self) {
        if let Err(e) = self.writer.lock().get_ref().shutdown(std::net::Shutdown::Both) {
            debug!("[Display] shutdown: {}", e);
        }
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                warn!("[Display] reader thread panicked");
            }
        }
    }
}

impl DisplaySink for DisplayClient {
    fn send(&self, message: &Message) -> io::Result<()> {
        let mut w = self.writer.lock();
        serde_json::to_writer(&mut *w, message)?;
        w.write_all(b"\n")?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stimulus::channel::{CorrelationKey, MetaTag};

    #[derive(Default)]
    struct Rows(Mutex<Vec<LogRow>>);

    impl DataSink for Rows {
        fn record(&self, row: LogRow) {
            self.0.lock().push(row);
        }
    }

    #[test]
    fn client_events_parse() {
        assert_eq!(ClientEvent::parse(r#"{"event":"start-experiment"}"#), Some(ClientEvent::StartExperiment));
        assert_eq!(ClientEvent::parse(r#"{"event":"stop-experiment"}"#), Some(ClientEvent::StopExperiment));
        let dl = ClientEvent::parse(r#"{"event":"dl","client_ts":12,"request_key":"34","key":"display-offset","value":5}"#);
        assert!(matches!(dl, Some(ClientEvent::Dl { ref key, .. }) if key == "display-offset"));
        assert!(ClientEvent::parse(r#"{"event":"unknown"}"#).is_none());
        assert!(ClientEvent::parse("not json").is_none());
    }

    #[test]
    fn events_update_state_and_log() {
        let state = SessionState::default();
        let rows = Rows::default();
        ClientEvent::StartExperiment.apply(&state, &rows);
        assert!(state.is_started());
        ClientEvent::parse(r#"{"event":"dl","client_ts":12,"request_key":"34","key":"k","value":"v"}"#)
            .unwrap()
            .apply(&state, &rows);
        ClientEvent::parse(r#"{"event":"pong","client_ts":1,"request_key":2}"#).unwrap().apply(&state, &rows);
        assert_eq!(state.pongs(), 1);
        let rows = rows.0.lock();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].client_ts.as_str(), rows[0].key.as_str(), rows[0].tag.as_str(), rows[0].value.as_str()), ("12", "34", "k", "v"));
    }

    #[test]
    fn wait_for_start_honours_stop_and_timeout() {
        let state = SessionState::default();
        assert!(!state.wait_for_start(Duration::from_millis(5), Some(Duration::from_millis(20))));
        state.request_stop();
        assert!(!state.wait_for_start(Duration::from_millis(5), None));
        let started = SessionState::default();
        started.request_start();
        assert!(started.wait_for_start(Duration::from_millis(5), None));
    }

    #[test]
    fn json_lines_over_tcp() {
        let server = DisplayServer::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        let state = SessionState::new();
        let rows: Arc<Rows> = Arc::new(Rows::default());

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"{\"event\":\"start-experiment\"}\n").unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            line
        });

        let display = server.accept(state.clone(), rows.clone()).unwrap();
        display.send(&Message::meta(CorrelationKey::from_frame(5), MetaTag::TrialStart, "1")).unwrap();
        let line = client.join().unwrap();
        let json: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(json["event"], "meta");
        assert_eq!(json["tag"], "trial-start");

        display.close();
        assert!(state.is_started());
        assert!(!state.is_connected());
    }
}
