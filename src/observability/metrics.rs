//! # Metrics
//!
//! Prometheus exporter for the cache counters:
//! - `api_cache_requests_total{outcome, rule}`: served hits and stored misses
//! - `api_cache_invalidated_keys_total{rule}`: keys removed by invalidation

use axum::{extract::State, routing::get, Router};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::error::{ServiceError, ServiceResult};

/// Install the global Prometheus recorder and describe the cache metrics
pub fn install_recorder() -> ServiceResult<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServiceError::internal(format!("Failed to install metrics recorder: {}", e)))?;

    describe_counter!(
        "api_cache_requests_total",
        Unit::Count,
        "Cache-governed requests by outcome and rule"
    );
    describe_counter!(
        "api_cache_invalidated_keys_total",
        Unit::Count,
        "Cache keys removed by mutation-triggered invalidation"
    );

    Ok(handle)
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// `GET /metrics` in the Prometheus text format
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}
