use crate::error::BrokerError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod amqp;
pub mod mqtt;
pub mod redis;

/// Callback invoked once per decoded message. Registered by the caller
/// when subscribing; run on the transport's own delivery task, so it
/// must not block (spec §4.2's "delivery thread" contract).
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// A live subscription. Dropping or calling `stop` ends delivery;
/// there is no reconnection behind it (spec §4.1: reconnection count
/// is always 0).
pub struct SubscriptionHandle {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(task: tokio::task::JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A handle with no backing task, used by transports that poll
    /// inline rather than spawning (tests, inert stubs).
    pub fn noop() -> Self {
        Self { task: None }
    }

    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The one operation the engine needs from a broker client: given a
/// topic and a callback, start delivering decoded JSON objects, and
/// allow publishing back out. One transport instance represents one
/// broker connection, shared by every Entity subscribed through it
/// (spec §5: "a single scenario shares one broker connection").
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open a subscription on `topic`, delivering each decoded
    /// JSON object to `handler`. Idempotent: subscribing twice to the
    /// same topic yields two independent deliveries, mirroring
    /// Entity::start()'s own idempotence at a higher layer.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, BrokerError>;

    /// Publish a JSON value to `topic`. Used by the RT monitor and any
    /// goal payload that talks back to the broker.
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BrokerError>;

    /// Release the underlying connection. Best-effort; never panics.
    async fn stop(&self);
}
