//! RT Monitor (C7): publishes typed `EventMsg` (scenario lifecycle +
//! per-goal state changes) and `LogMsg` to two broker topics,
//! best-effort (spec §4.7, §6, §7; SPEC_FULL.md §D).

use crate::logging::LogMsg;
use goalkeeper_broker::BrokerTransport;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

/// Wire schema matches spec §6: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct EventMsg {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

pub fn default_topics(scenario_name: &str) -> (String, String) {
    (format!("monitor.{scenario_name}.event"), format!("monitor.{scenario_name}.log"))
}

/// Publishes events and mirrors log records to their two broker
/// topics. Emission never blocks the evaluation kernel and never
/// propagates a failure into it (spec §4.7: "failures are logged but
/// never propagate to the evaluation core").
pub struct RtMonitor {
    transport: Arc<dyn BrokerTransport>,
    event_topic: String,
    log_topic: String,
}

impl RtMonitor {
    /// Wires `transport` to `event_topic`/`log_topic` and starts
    /// draining `log_rx` (the channel `crate::logging::init` feeds) in
    /// the background.
    pub fn install(
        transport: Arc<dyn BrokerTransport>,
        event_topic: impl Into<String>,
        log_topic: impl Into<String>,
        log_rx: UnboundedReceiver<LogMsg>,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self { transport, event_topic: event_topic.into(), log_topic: log_topic.into() });
        let draining = monitor.clone();
        tokio::spawn(async move { draining.drain_logs(log_rx).await });
        monitor
    }

    async fn drain_logs(&self, mut rx: UnboundedReceiver<LogMsg>) {
        while let Some(msg) = rx.recv().await {
            let payload = json!({"msg": msg.msg, "level": msg.level});
            if let Err(e) = self.transport.publish(&self.log_topic, &payload).await {
                warn!(error = %e, "failed to publish log message to rt monitor");
            }
        }
    }

    /// Best-effort, non-blocking from the caller's perspective (spec
    /// §5: "RT monitor publishers — thread-safe wrappers; sends are
    /// non-blocking from the caller's perspective").
    pub fn emit(&self, event: EventMsg) {
        let transport = self.transport.clone();
        let topic = self.event_topic.clone();
        tokio::spawn(async move {
            let payload = json!({"type": event.event_type, "data": event.data});
            if let Err(e) = transport.publish(&topic, &payload).await {
                warn!(error = %e, "failed to publish event to rt monitor");
            }
        });
    }

    /// "The thread pool is shut down with cancellation; the
    /// communication node is stopped after a ≈500 ms grace to flush
    /// outbound events" (spec §4.6).
    pub async fn shutdown(&self) {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.transport.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use goalkeeper_broker::{BrokerError, MessageHandler, SubscriptionHandle};
    use parking_lot::Mutex;

    struct RecordingTransport {
        published: Arc<Mutex<Vec<(String, Value)>>>,
    }

    #[async_trait]
    impl BrokerTransport for RecordingTransport {
        async fn subscribe(&self, _topic: &str, _handler: MessageHandler) -> Result<SubscriptionHandle, BrokerError> {
            Ok(SubscriptionHandle::noop())
        }

        async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BrokerError> {
            self.published.lock().push((topic.to_string(), payload.clone()));
            Ok(())
        }

        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn emit_publishes_to_event_topic() {
        let published = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(RecordingTransport { published: published.clone() });
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let monitor = RtMonitor::install(transport, "monitor.s1.event", "monitor.s1.log", rx);

        monitor.emit(EventMsg { event_type: "scenario_started".to_string(), data: json!({"name": "s1"}) });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let recorded = published.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "monitor.s1.event");
        assert_eq!(recorded[0].1["type"], "scenario_started");
    }

    #[test]
    fn default_topics_match_convention() {
        assert_eq!(default_topics("s1"), ("monitor.s1.event".to_string(), "monitor.s1.log".to_string()));
    }
}
