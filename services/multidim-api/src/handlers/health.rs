//! Health, readiness and metrics handlers.

use axum::{
    extract::Extension,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use dataset_reader::{BreakerState, CacheStats};

use super::common::ErrorBody;
use crate::metrics::record_cache_stats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// "ok", "degraded" or "disabled".
    pub cache: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub breaker: BreakerState,
    pub stats: CacheStats,
}

/// GET /health - Basic health check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /ready - Readiness check
///
/// Requests bypass a degraded cache, so the service stays ready and the
/// cache state is only reported.
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> Json<ReadyResponse> {
    let cache = state.service.cache();
    let stats = cache.stats();

    let status = if !cache.is_enabled() {
        "disabled"
    } else if stats.degraded {
        "degraded"
    } else {
        "ok"
    };

    Json(ReadyResponse {
        ready: true,
        cache: status.to_string(),
        backend: stats.backend.clone(),
        breaker: cache.breaker_state(),
        stats,
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let Some(handle) = state.prometheus.as_ref() else {
        let body = ErrorBody {
            detail: "metrics recorder not installed".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };

    let cache = state.service.cache();
    record_cache_stats(&cache.stats(), cache.breaker_state());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
