//! MQTT transport built on `rumqttc`.
//!
//! No direct teacher precedent — `petec4244-Arbees` only speaks Redis.
//! Grounded on `rumqttc`'s own event-loop idiom (the crate's canonical
//! split between an `AsyncClient` handle and a separately-polled
//! `EventLoop`) as attested by `other_examples/manifests/thin-edge-thin-edge.io`,
//! written in the surrounding codebase's tracing/async-trait style.

use crate::descriptor::BrokerDescriptor;
use crate::error::BrokerError;
use crate::transport::{BrokerTransport, MessageHandler, SubscriptionHandle};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct MqttTransport {
    client: AsyncClient,
    handlers: Arc<Mutex<HashMap<String, MessageHandler>>>,
    event_loop_task: tokio::task::JoinHandle<()>,
}

impl MqttTransport {
    pub async fn connect(descriptor: &BrokerDescriptor) -> Result<Self, BrokerError> {
        let BrokerDescriptor::Mqtt { host, port, username, password } = descriptor else {
            return Err(BrokerError::Configuration("expected an MQTT descriptor".into()));
        };

        let client_id = format!("goalkeeper-{}", Uuid::new_v4());
        let mut opts = MqttOptions::new(client_id, host, *port);
        opts.set_keep_alive(std::time::Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (username, password) {
            opts.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let handlers: Arc<Mutex<HashMap<String, MessageHandler>>> = Arc::new(Mutex::new(HashMap::new()));
        let handlers_for_loop = handlers.clone();

        let event_loop_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let guard = handlers_for_loop.lock().await;
                        if let Some(handler) = guard.get(&publish.topic) {
                            if let Some(value) = crate::decode::decode_payload(&publish.topic, &publish.payload) {
                                handler(value);
                            }
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "mqtt event loop ended; no reconnection attempted");
                        break;
                    }
                }
            }
        });

        Ok(Self { client, handlers, event_loop_task })
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, BrokerError> {
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        self.handlers.lock().await.insert(topic.to_string(), handler);
        debug!(topic, "mqtt subscription registered");
        Ok(SubscriptionHandle::noop())
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BrokerError> {
        let text = serde_json::to_vec(payload).map_err(|e| BrokerError::Publish(e.to_string()))?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, text)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn stop(&self) {
        self.event_loop_task.abort();
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "error disconnecting mqtt client");
        }
    }
}
