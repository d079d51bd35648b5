//! Health and Prometheus metrics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use resilience::CircuitState;
use serde::Serialize;

use crate::context::AppContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sagas_in_flight: usize,
    pub pending_outbox_records: Option<usize>,
    pub open_circuit_breakers: Vec<String>,
}

/// GET /health: reports liveness plus a summary of the coordination state.
///
/// The status is `"degraded"` when the store cannot be read or a breaker is
/// open.
pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    let pending = match ctx.outbox.pending_count().await {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read the outbox");
            None
        }
    };

    let open: Vec<_> = ctx
        .breakers
        .stats()
        .into_iter()
        .filter(|s| s.state == CircuitState::Open)
        .map(|s| s.name)
        .collect();

    let status = if pending.is_some() && open.is_empty() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        sagas_in_flight: ctx.orchestrator.in_flight().await,
        pending_outbox_records: pending,
        open_circuit_breakers: open,
    })
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
