use thiserror::Error;

/// Errors surfaced by the broker port.
///
/// Construction-time failures (bad credentials, an unreachable host at
/// dial time) are returned synchronously. Everything after a
/// subscription is established is best-effort: a dropped connection
/// simply ends the message stream rather than producing an error, so
/// that goals observe the outage as a timeout (spec §4.1, §7).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid broker configuration: {0}")]
    Configuration(String),

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}
