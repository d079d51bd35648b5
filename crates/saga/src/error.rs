//! Saga error types.

use common::SagaId;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
///
/// A failing step is not one of them: step failures become part of the
/// saga's state and trigger compensation.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No definition is registered under this saga type.
    #[error("Unknown saga type: {0}")]
    UnknownSagaType(String),

    /// A definition with this saga type is already registered.
    #[error("Saga type already registered: {0}")]
    DuplicateSagaType(String),

    /// A definition must have at least one step.
    #[error("Saga definition '{0}' has no steps")]
    EmptyDefinition(String),

    /// Step names must be unique within a definition.
    #[error("Saga definition '{saga_type}' declares step '{step}' more than once")]
    DuplicateStep { saga_type: String, step: String },

    /// A saga with this id already exists.
    #[error("Saga already exists: {0}")]
    AlreadyExists(SagaId),

    /// No saga with this id exists.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by a step action or compensation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StepError(pub String);

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
