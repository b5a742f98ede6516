//! Broker Port (C1): a typed connection descriptor plus a subscription
//! factory abstracting MQTT, Redis, and AMQP. The wire protocols and
//! reconnection strategy of the underlying client libraries are
//! explicitly out of scope beyond what is needed to satisfy the
//! subscribe/publish contract (spec §1) — none of the three
//! transports here retries a dropped connection.

pub mod decode;
pub mod descriptor;
pub mod error;
pub mod transport;

use std::sync::Arc;

pub use descriptor::BrokerDescriptor;
pub use error::BrokerError;
pub use transport::{BrokerTransport, MessageHandler, SubscriptionHandle};

/// Dial the broker described by `descriptor` and return a transport
/// handle. This is the engine's single entry point into C1; callers
/// never construct a transport type directly.
pub async fn connect(descriptor: &BrokerDescriptor) -> Result<Arc<dyn BrokerTransport>, BrokerError> {
    match descriptor {
        BrokerDescriptor::Redis { .. } => {
            let t = transport::redis::RedisTransport::connect(descriptor).await?;
            Ok(Arc::new(t))
        }
        BrokerDescriptor::Mqtt { .. } => {
            let t = transport::mqtt::MqttTransport::connect(descriptor).await?;
            Ok(Arc::new(t))
        }
        BrokerDescriptor::Amqp { .. } => {
            let t = transport::amqp::AmqpTransport::connect(descriptor).await?;
            Ok(Arc::new(t))
        }
    }
}
