//! Broker error types.

use thiserror::Error;

/// Broker error type.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// NATS connection error.
    #[error("NATS connect error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// Invalid subscription pattern.
    #[error("invalid subject pattern: {0}")]
    InvalidPattern(String),

    /// Broker connection closed or unavailable.
    #[error("broker unavailable")]
    Closed,
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
