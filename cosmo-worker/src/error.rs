//! Error types for broker-facing operations.

use thiserror::Error;

/// Error surfaced by [`crate::broker::BrokerClient`], [`crate::publisher::Publisher`],
/// and [`crate::pool::BoundedPool`].
///
/// SDK errors are propagated unchanged from the broker client; only the
/// publisher translates a `NoStreamResponse`-shaped failure into
/// `StreamNotFound`.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::ConnectError),

    #[error("JetStream error: {0}")]
    JetStream(String),

    #[error("consumer error: {0}")]
    Consumer(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("consumer not found: {0}")]
    ConsumerNotFound(String),

    #[error("broker timeout: {0}")]
    Timeout(String),

    #[error("pool is shutting down, submission rejected")]
    PoolClosed,

    #[error("processing error: {0}")]
    Processing(#[from] cosmo_core::ProcessingError),
}

impl BrokerError {
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    pub fn publish_error(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn consumer_error(msg: impl Into<String>) -> Self {
        Self::Consumer(msg.into())
    }

    /// `true` when the underlying error means "stream does not exist" —
    /// the shape the broker SDK returns as `NoStreamResponse`.
    pub fn is_no_stream_response(&self) -> bool {
        match self {
            BrokerError::JetStream(msg) | BrokerError::Publish(msg) => {
                msg.contains("no stream response") || msg.contains("no responders")
            }
            _ => false,
        }
    }
}
