//! Outbox error types.

use common::RecordId;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker did not acknowledge a record. Retried on the next scan.
    #[error("Delivery of outbox record {record_id} failed: {source}")]
    Delivery {
        record_id: RecordId,
        #[source]
        source: BrokerError,
    },

    /// An inbox handler failed; the message id stays unrecorded.
    #[error("Handler error: {0}")]
    Handler(String),
}

/// Errors reported by an event broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the message.
    #[error("Broker rejected message on topic '{topic}': {reason}")]
    Rejected { topic: String, reason: String },
}

/// Failure reported by an event handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Convenience type alias for outbox results.
pub type Result<T> = std::result::Result<T, OutboxError>;
