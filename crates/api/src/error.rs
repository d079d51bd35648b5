//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use outbox::OutboxError;
use saga::SagaError;
use thiserror::Error;
use twopc::TwoPcError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// A guarded dependency is failing fast.
    #[error("{0}")]
    CircuitOpen(String),

    /// A guarded dependency failed or timed out.
    #[error("{0}")]
    Dependency(String),

    /// Saga error.
    #[error(transparent)]
    Saga(#[from] SagaError),

    /// Two-phase-commit error.
    #[error(transparent)]
    TwoPc(#[from] TwoPcError),

    /// Outbox error.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Dependency(_) => StatusCode::BAD_GATEWAY,
            ApiError::Saga(err) => match err {
                SagaError::UnknownSagaType(_) | SagaError::NotFound(_) => StatusCode::NOT_FOUND,
                SagaError::AlreadyExists(_) | SagaError::DuplicateSagaType(_) => {
                    StatusCode::CONFLICT
                }
                SagaError::EmptyDefinition(_) | SagaError::DuplicateStep { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::TwoPc(err) => match err {
                TwoPcError::NoParticipants => StatusCode::BAD_REQUEST,
                TwoPcError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
                TwoPcError::AlreadyCommitted(_) | TwoPcError::Finished { .. } => {
                    StatusCode::CONFLICT
                }
            },
            ApiError::Outbox(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %message, %status, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
