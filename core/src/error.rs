use thiserror::Error;

/// Error taxonomy for the evaluation kernel (spec §7).
///
/// Configuration errors are raised synchronously and prevent a
/// scenario from starting. Everything else — predicate errors, broker
/// outages, weight mismatches — is handled inline (logged, not
/// propagated) so that "nothing escapes the scenario executor's
/// top-level supervisor as an unhandled exception" (spec §7).
#[derive(Debug, Error)]
pub enum GoalkeeperError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("broker error: {0}")]
    Broker(#[from] goalkeeper_broker::BrokerError),

    #[error("entity '{entity}' has no declared attribute '{attribute}'")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("condition expression error: {0}")]
    Expression(String),
}

pub type Result<T> = std::result::Result<T, GoalkeeperError>;
