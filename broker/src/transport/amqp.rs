//! AMQP transport built on `lapin` + `deadpool-lapin`.
//!
//! Grounded on the `lapin`/`deadpool-lapin` pairing in the sibling
//! pack repo `Toasterson-akh-medu/Cargo.toml` (its `oxifed` feature).
//! Each topic is modeled as a fanout exchange of the same name, with
//! one anonymous exclusive queue per subscription — a standard
//! AMQP pub/sub shape, since the engine has no durability requirement
//! (spec Non-goals: no persistent storage, no exactly-once delivery).

use crate::descriptor::BrokerDescriptor;
use crate::error::BrokerError;
use crate::transport::{BrokerTransport, MessageHandler, SubscriptionHandle};
use async_trait::async_trait;
use deadpool_lapin::{Config as PoolConfig, Pool, Runtime};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ExchangeKind};
use serde_json::Value;
use tracing::warn;

pub struct AmqpTransport {
    pool: Pool,
}

impl AmqpTransport {
    pub async fn connect(descriptor: &BrokerDescriptor) -> Result<Self, BrokerError> {
        let BrokerDescriptor::Amqp { host, port, vhost, username, password } = descriptor else {
            return Err(BrokerError::Configuration("expected an AMQP descriptor".into()));
        };

        let pass = password.clone().unwrap_or_default();
        let uri = format!("amqp://{username}:{pass}@{host}:{port}{vhost}");

        let mut cfg = PoolConfig::default();
        cfg.url = Some(uri);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        // Fail fast if the broker is unreachable at construction time
        // (spec §7: configuration errors are synchronous).
        pool.get().await.map_err(|e| BrokerError::Connect(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, BrokerError> {
        let conn = self.pool.get().await.map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        let channel = conn.create_channel().await.map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        channel
            .exchange_declare(
                topic,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let queue = channel
            .queue_declare("", QueueDeclareOptions { exclusive: true, ..Default::default() }, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        channel
            .queue_bind(queue.name().as_str(), topic, "", QueueBindOptions::default(), FieldTable::default())
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let mut consumer = channel
            .basic_consume(
                queue.name().as_str(),
                "goalkeeper-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        let topic_owned = topic.to_string();
        let task = tokio::spawn(async move {
            use futures_util::StreamExt;
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, "amqp consumer ended; no reconnection attempted");
                        break;
                    }
                };
                if let Some(value) = crate::decode::decode_payload(&topic_owned, &delivery.data) {
                    handler(value);
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
        });

        Ok(SubscriptionHandle::new(task))
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BrokerError> {
        let conn = self.pool.get().await.map_err(|e| BrokerError::Publish(e.to_string()))?;
        let channel = conn.create_channel().await.map_err(|e| BrokerError::Publish(e.to_string()))?;

        channel
            .exchange_declare(
                topic,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        let body = serde_json::to_vec(payload).map_err(|e| BrokerError::Publish(e.to_string()))?;
        channel
            .basic_publish(topic, "", BasicPublishOptions::default(), &body, BasicProperties::default())
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self) {
        // Pool connections are recycled on drop; nothing else to do.
    }
}
