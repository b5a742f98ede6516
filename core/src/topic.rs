//! Bare topic-message goals (`goalee/topic_goals.py`), kept as a
//! supplement to the Entity pipeline (SPEC_FULL.md §C.3): "a message
//! arrived on this topic" / "a message arrived matching this
//! predicate", independent of any declared attribute schema. Unlike
//! `Entity`, a `RawTopicWatcher` has no closed attribute set — it just
//! remembers the last decoded payload.

use goalkeeper_broker::{BrokerDescriptor, BrokerTransport, SubscriptionHandle};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct RawTopicWatcher {
    topic: String,
    source: BrokerDescriptor,
    last: RwLock<Option<Value>>,
    received: AtomicBool,
    started: AtomicBool,
    subscription: RwLock<Option<SubscriptionHandle>>,
}

impl RawTopicWatcher {
    pub fn new(topic: impl Into<String>, source: BrokerDescriptor) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            source,
            last: RwLock::new(None),
            received: AtomicBool::new(false),
            started: AtomicBool::new(false),
            subscription: RwLock::new(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn source(&self) -> &BrokerDescriptor {
        &self.source
    }

    pub async fn start(self: &Arc<Self>, transport: Arc<dyn BrokerTransport>) -> Result<(), goalkeeper_broker::BrokerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let this = self.clone();
        let handler: goalkeeper_broker::MessageHandler = Arc::new(move |value: Value| {
            *this.last.write() = Some(value);
            this.received.store(true, Ordering::SeqCst);
        });
        let handle = transport.subscribe(&self.topic, handler).await?;
        *self.subscription.write() = Some(handle);
        Ok(())
    }

    pub fn last(&self) -> Option<Value> {
        self.last.read().clone()
    }

    pub fn received(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }

    /// Feeds a decoded payload as if it arrived via the broker
    /// subscription callback. Used by `GoalKind` unit tests that
    /// exercise `TopicMessageData`/`TopicMessageParamData` without
    /// standing up a transport.
    #[cfg(test)]
    pub(crate) fn inject(&self, value: Value) {
        *self.last.write() = Some(value);
        self.received.store(true, Ordering::SeqCst);
    }
}
