//! Prometheus HTTP endpoint for RPC metrics scraping.
//!
//! Provides:
//! - `/metrics` - Prometheus metrics endpoint
//! - `/health` - Basic health check
//! - `/ready` - Readiness check

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use super::rpcmetrics::RpcMetrics;

/// Prometheus route state.
#[derive(Clone)]
pub struct PrometheusState {
    metrics: Arc<RpcMetrics>,
}

impl PrometheusState {
    pub fn new(metrics: Arc<RpcMetrics>) -> Self {
        Self { metrics }
    }
}

/// Create the Prometheus HTTP router.
pub fn create_router(state: PrometheusState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Handle GET /metrics - Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<PrometheusState>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; charset=utf-8")],
                format!("Failed to encode metrics: {e}").into_bytes(),
            )
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}
