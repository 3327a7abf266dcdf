//! Multidimensional dataset API library.
//!
//! HTTP surface over [`dataset_reader::DatasetService`]: variable listing,
//! dataset metadata and value histograms, plus health and Prometheus
//! endpoints.

pub mod handlers;
pub mod metrics;
pub mod state;

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Build the router with every route and middleware layer attached.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Dataset queries
        .route("/variables", get(handlers::dataset::variables_handler))
        .route("/info", get(handlers::dataset::info_handler))
        .route("/histogram", get(handlers::dataset::histogram_handler))
        // Health and metrics
        .route("/health", get(handlers::health::health_handler))
        .route("/ready", get(handlers::health::ready_handler))
        .route("/metrics", get(handlers::health::metrics_handler))
        // Middleware
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
