//! Resilience error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a call guarded by a [`CircuitBreaker`].
///
/// [`CircuitBreaker`]: crate::CircuitBreaker
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker is open; the operation was not invoked.
    #[error("Circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation did not finish within the caller-supplied timeout.
    #[error("Call through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// The operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    /// Returns true if the call was rejected by an open breaker.
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Returns the operation's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitBreakerError::Inner(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors returned by [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final attempt's error.
    #[error("All {attempts} attempts failed, last error: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with an error that is not worth retrying.
    #[error("Attempt {attempt} failed with a non-retryable error: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Returns the error of the last attempt.
    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// An operation exceeded its time budget.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Operation timed out after {0:?}")]
pub struct TimeoutError(pub Duration);
