//! Saga endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::SagaId;
use saga::{SagaContext, SagaInstance, order_processing};
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct StartSagaRequest {
    pub saga_type: Option<String>,
    pub saga_id: Option<SagaId>,
    #[serde(default)]
    pub context: SagaContext,
}

/// POST /process-with-saga: runs the built-in order processing saga.
///
/// The request body is the initial saga context.
#[tracing::instrument(skip(ctx, context))]
pub async fn process_with_saga(
    State(ctx): State<Arc<AppContext>>,
    Json(context): Json<SagaContext>,
) -> Result<(StatusCode, Json<SagaInstance>), ApiError> {
    let saga = ctx
        .orchestrator
        .start(SagaId::new(), order_processing::SAGA_TYPE, context)
        .await?;
    Ok((StatusCode::CREATED, Json(saga)))
}

/// POST /transaction/saga: runs any registered saga type.
#[tracing::instrument(skip(ctx, req), fields(saga_type = ?req.saga_type))]
pub async fn start(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<SagaInstance>), ApiError> {
    let saga_type = req
        .saga_type
        .as_deref()
        .unwrap_or(order_processing::SAGA_TYPE);
    let saga = ctx
        .orchestrator
        .start(req.saga_id.unwrap_or_default(), saga_type, req.context)
        .await?;
    Ok((StatusCode::CREATED, Json(saga)))
}

/// GET /saga/{id}: the current snapshot of a saga.
#[tracing::instrument(skip(ctx))]
pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<SagaInstance>, ApiError> {
    let saga_id: SagaId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id: {e}")))?;
    Ok(Json(ctx.orchestrator.status(saga_id).await?))
}

/// GET /sagas: in-flight sagas plus finished ones still held by the store.
pub async fn list(State(ctx): State<Arc<AppContext>>) -> Result<Json<Vec<SagaInstance>>, ApiError> {
    Ok(Json(ctx.orchestrator.list().await?))
}
