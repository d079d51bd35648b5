//! Circuit breaker and retry endpoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::Json;
use axum::extract::State;
use resilience::{CircuitBreakerError, CircuitBreakerStats};
use serde::{Deserialize, Serialize};

use crate::context::AppContext;
use crate::error::ApiError;

/// Breaker used when a request does not name its dependency.
pub const DEFAULT_SERVICE: &str = "external-service";

#[derive(Deserialize)]
pub struct CircuitBreakerRequest {
    pub value: i64,
    pub service: Option<String>,
}

#[derive(Deserialize)]
pub struct RetryRequest {
    pub value: i64,
    /// Number of leading attempts the simulated dependency fails.
    #[serde(default)]
    pub fail_times: u32,
}

#[derive(Serialize)]
pub struct ProcessResponse {
    pub result: i64,
    pub pattern: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStats>,
}

/// Simulated downstream call: doubles the value, rejects negatives.
async fn downstream(value: i64) -> Result<i64, String> {
    if value < 0 {
        return Err("Negative value not allowed".to_string());
    }
    value
        .checked_mul(2)
        .ok_or_else(|| format!("Value {value} is out of range"))
}

/// POST /process-with-circuit-breaker: calls the dependency through its breaker.
#[tracing::instrument(skip(ctx, req), fields(value = req.value))]
pub async fn process_with_circuit_breaker(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<CircuitBreakerRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let service = req.service.as_deref().unwrap_or(DEFAULT_SERVICE);
    let breaker = ctx.breakers.get(service);

    let result = breaker
        .execute(|| downstream(req.value))
        .await
        .map_err(|e| match e {
            CircuitBreakerError::Open { .. } => ApiError::CircuitOpen(e.to_string()),
            other => ApiError::Dependency(other.to_string()),
        })?;

    Ok(Json(ProcessResponse {
        result,
        pattern: "circuit-breaker",
        attempts: None,
        circuit_breaker: Some(breaker.stats()),
    }))
}

/// POST /process-with-retry: calls a flaky dependency under the retry policy.
#[tracing::instrument(skip(ctx, req), fields(value = req.value, fail_times = req.fail_times))]
pub async fn process_with_retry(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RetryRequest>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let (value, fail_times) = (req.value, req.fail_times);
    let attempts = AtomicU32::new(0);

    let result = ctx
        .retry
        .retry(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt <= fail_times {
                    Err(format!("Simulated failure on attempt {attempt}"))
                } else {
                    downstream(value).await
                }
            }
        })
        .await
        .map_err(|e| ApiError::Dependency(e.to_string()))?;

    Ok(Json(ProcessResponse {
        result,
        pattern: "retry",
        attempts: Some(attempts.load(Ordering::SeqCst)),
        circuit_breaker: None,
    }))
}

/// GET /circuit-breakers: stats for every registered breaker.
pub async fn list_circuit_breakers(
    State(ctx): State<Arc<AppContext>>,
) -> Json<Vec<CircuitBreakerStats>> {
    Json(ctx.breakers.stats())
}
