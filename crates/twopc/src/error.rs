//! Two-phase-commit error types.

use common::TransactionId;
use thiserror::Error;

use crate::transaction::TransactionStatus;

/// Errors returned by the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TwoPcError {
    /// A transaction needs at least one participant.
    #[error("Transaction requires at least one participant")]
    NoParticipants,

    /// The transaction id is unknown to this coordinator.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The transaction already committed and can no longer be aborted.
    #[error("Transaction {0} is already committed")]
    AlreadyCommitted(TransactionId),

    /// The transaction reached a terminal status and can no longer change.
    #[error("Transaction {id} already finished as {status:?}")]
    Finished {
        id: TransactionId,
        status: TransactionStatus,
    },
}

/// Errors reported by a resource manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParticipantError {
    /// Commit was requested for a transaction this resource never prepared.
    #[error("Transaction {0} was not prepared by this resource")]
    NotPrepared(TransactionId),

    /// The resource could not be reached or refused the call.
    #[error("Resource unavailable: {0}")]
    Unavailable(String),
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, TwoPcError>;
