//! Redis pub/sub transport.
//!
//! Grounded on `rust_core/src/redis/bus.rs`'s `RedisBus`: one
//! `redis::Client` for publishing, subscriptions opened as their own
//! connections. Unlike the teacher's `pubsub_reconnect.rs`, this
//! transport does not retry a dropped connection — spec §4.1 mandates
//! reconnection count = 0, so a connection drop simply ends the
//! subscription task and the downstream goal times out.

use crate::descriptor::BrokerDescriptor;
use crate::error::BrokerError;
use crate::transport::{BrokerTransport, MessageHandler, SubscriptionHandle};
use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    pub async fn connect(descriptor: &BrokerDescriptor) -> Result<Self, BrokerError> {
        let BrokerDescriptor::Redis { host, port, db, password } = descriptor else {
            return Err(BrokerError::Configuration("expected a Redis descriptor".into()));
        };

        let auth = match password {
            Some(p) => format!(":{p}@"),
            None => String::new(),
        };
        let url = format!("redis://{auth}{host}:{port}/{db}");

        let client = redis::Client::open(url).map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrokerTransport for RedisTransport {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, BrokerError> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let topic_owned = topic.to_string();
        let task = tokio::spawn(async move {
            use futures_util::StreamExt;
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload = msg.get_payload_bytes().to_vec();
                if let Some(value) = crate::decode::decode_payload(&topic_owned, &payload) {
                    handler(value);
                }
            }
        });

        Ok(SubscriptionHandle::new(task))
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BrokerError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        let text = serde_json::to_string(payload).map_err(|e| BrokerError::Publish(e.to_string()))?;
        conn.publish::<_, _, ()>(topic, text)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self) {
        // Connections are per-operation; nothing persistent to tear down.
        warn!("redis transport stop() called; subscriptions are cancelled via their handles");
    }
}
