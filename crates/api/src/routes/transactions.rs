//! Two-phase commit and transactional outbox endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::RecordId;
use outbox::FlushReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use twopc::{Transaction, TransactionStatus};

use crate::context::{AppContext, DEFAULT_RESOURCE_MANAGERS};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct TwoPhaseCommitRequest {
    /// Resource manager ids; all default managers when omitted.
    pub participants: Option<Vec<String>>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Serialize)]
pub struct TwoPhaseCommitResponse {
    pub committed: bool,
    pub transaction: Transaction,
}

#[derive(Deserialize)]
pub struct OutboxRequest {
    pub aggregate_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    /// Publish pending records before responding instead of waiting for the
    /// background publisher.
    #[serde(default)]
    pub flush: bool,
}

#[derive(Serialize)]
pub struct OutboxResponse {
    pub record_id: RecordId,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flushed: Option<FlushSummary>,
}

#[derive(Serialize)]
pub struct FlushSummary {
    pub published: usize,
    pub failed: usize,
    pub deferred: usize,
}

impl From<FlushReport> for FlushSummary {
    fn from(report: FlushReport) -> Self {
        Self {
            published: report.published,
            failed: report.failed,
            deferred: report.deferred,
        }
    }
}

/// POST /transaction/2pc: runs a full two-phase commit.
///
/// An aborted transaction is a normal outcome and is reported with
/// `committed: false`.
#[tracing::instrument(skip(ctx, req))]
pub async fn two_phase_commit(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<TwoPhaseCommitRequest>,
) -> Result<Json<TwoPhaseCommitResponse>, ApiError> {
    let participants = req.participants.unwrap_or_else(|| {
        DEFAULT_RESOURCE_MANAGERS
            .iter()
            .map(|id| id.to_string())
            .collect()
    });

    let transaction = ctx.coordinator.execute(&participants, &req.payload).await?;
    Ok(Json(TwoPhaseCommitResponse {
        committed: transaction.status == TransactionStatus::Committed,
        transaction,
    }))
}

/// POST /transaction/outbox: records an event for asynchronous publication.
#[tracing::instrument(skip(ctx, req), fields(event_type = %req.event_type))]
pub async fn record_outbox_event(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<OutboxRequest>,
) -> Result<(StatusCode, Json<OutboxResponse>), ApiError> {
    if req.aggregate_id.trim().is_empty() {
        return Err(ApiError::BadRequest("aggregate_id is required".to_string()));
    }
    if req.event_type.trim().is_empty() {
        return Err(ApiError::BadRequest("event_type is required".to_string()));
    }

    let record_id = ctx
        .outbox
        .record(&req.aggregate_id, &req.event_type, req.payload)
        .await?;

    let flushed: Option<FlushSummary> = if req.flush {
        Some(ctx.publisher.flush_once().await?.into())
    } else {
        None
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(OutboxResponse {
            record_id,
            pending: ctx.outbox.pending_count().await?,
            flushed,
        }),
    ))
}
