//! HTTP API server for the coordination core.
//!
//! Exposes saga execution, two-phase commit, the transactional outbox and
//! guarded dependency calls, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod context;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use context::AppContext;
pub use error::ApiError;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(ctx: Arc<AppContext>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/process-with-circuit-breaker",
            post(routes::resilience::process_with_circuit_breaker),
        )
        .route(
            "/process-with-retry",
            post(routes::resilience::process_with_retry),
        )
        .route(
            "/circuit-breakers",
            get(routes::resilience::list_circuit_breakers),
        )
        .route("/process-with-saga", post(routes::sagas::process_with_saga))
        .route("/saga/{id}", get(routes::sagas::get))
        .route("/sagas", get(routes::sagas::list))
        .route("/transaction/saga", post(routes::sagas::start))
        .route(
            "/transaction/2pc",
            post(routes::transactions::two_phase_commit),
        )
        .route(
            "/transaction/outbox",
            post(routes::transactions::record_outbox_event),
        )
        .with_state(ctx)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
