//! Tracing setup and the log-mirroring layer that feeds the RT Monitor.
//!
//! `goalee/rtmonitor.py` installs a `RemoteLogHandler` on the root
//! logger so every log record anywhere in the process is mirrored to
//! the log topic, not just ones a goal emits directly. The
//! `tracing_subscriber::Layer` below is the same idea at the
//! `tracing` layer: it never touches the broker itself, it only
//! forwards formatted records through a channel that `RTMonitor`
//! drains in the background (SPEC_FULL.md §D).

use crate::config::EngineConfig;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::{EnvFilter, Layer};

/// One mirrored log record, matching the `LogMsg` wire schema (spec §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogMsg {
    pub msg: String,
    pub level: String,
}

/// Installs global `tracing` + `log` subscribers honoring
/// `GOALDSL_ZERO_LOGS` / `GOALDSL_LOG_LEVEL`. Returns the receiving
/// end of the mirror channel that `RTMonitor::install` wires up.
pub fn init(config: &EngineConfig) -> tokio::sync::mpsc::UnboundedReceiver<LogMsg> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    if config.zero_logs {
        // Still construct the channel so callers have a uniform API,
        // but never install a subscriber — logging is fully disabled.
        return rx;
    }

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let mirror_layer = RtMirrorLayer { tx };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(mirror_layer);

    // A second init attempt (e.g. in tests that construct multiple
    // scenarios) must not panic the process.
    let _ = tracing::subscriber::set_global_default(subscriber);

    rx
}

use tracing_subscriber::layer::SubscriberExt;

struct RtMirrorLayer {
    tx: UnboundedSender<LogMsg>,
}

struct MessageVisitor {
    message: Mutex<Option<String>>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message.lock().unwrap() = Some(format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for RtMirrorLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let visitor = MessageVisitor { message: Mutex::new(None) };
        event.record(&visitor);
        let msg = visitor.message.into_inner().unwrap().unwrap_or_default();
        let level = event.metadata().level().to_string();
        let _ = self.tx.send(LogMsg { msg, level });
    }
}
