//! dispatcher.rs
//! Fans every emitted message out to the display client and the data log.
//!
//! Runs on its own thread and drains the channel until every sender is dropped. A failed display
//! write is logged once; the message is still logged, so the data file stays complete.

use std::{
    collections::VecDeque,
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::Receiver;
use log::{debug, error, warn};

use crate::stimulus::channel::Envelope;
use crate::transport::display::DisplaySink;
use crate::utils::{
    data_logger::{DataSink, LogRow},
    metrics::{calculate_stats, push_capped, Stats},
};

#[derive(Debug, Default, Clone)]
pub struct DispatchStats {
    pub messages: u64,
    pub display_errors: u64,
    /// Emit-to-dispatch latency (ms), most recent last.
    pub latency_ms: VecDeque<f64>,
}

impl DispatchStats {
    pub fn latency(&self) -> Option<Stats> {
        calculate_stats(&self.latency_ms)
    }
}

pub struct Dispatcher {
    handle: JoinHandle<DispatchStats>,
}

impl Dispatcher {
    pub fn spawn(
        rx: Receiver<Envelope>,
        display: Option<Arc<dyn DisplaySink>>,
        sink: Arc<dyn DataSink>,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatch(rx, display.as_deref(), sink.as_ref()))?;
        Ok(Self { handle })
    }

    /// Waits for the channel to close and returns what went through it.
    pub fn join(self) -> DispatchStats {
        self.handle.join().unwrap_or_else(|_| {
            error!("[Dispatcher] thread panicked");
            DispatchStats::default()
        })
    }
}

pub fn dispatch(rx: Receiver<Envelope>, display: Option<&dyn DisplaySink>, sink: &dyn DataSink) -> DispatchStats {
    let mut stats = DispatchStats::default();
    let mut display_live = display.is_some();

    for envelope in rx.iter() {
        push_capped(&mut stats.latency_ms, envelope.emitted_at.elapsed().as_secs_f64() * 1000.0);
        stats.messages += 1;

        if let (Some(display), true) = (display, display_live) {
            if let Err(e) = display.send(&envelope.message) {
                stats.display_errors += 1;
                display_live = false;
                warn!("[Dispatcher] display write failed, continuing with data log only: {}", e);
            }
        }
        sink.record(LogRow::from_envelope(&envelope));
    }

    debug!("[Dispatcher] channel closed after {} messages", stats.messages);
    stats
}
