//! HTTP routes definition

use axum::{routing::get, Router};

use super::handlers;

/// Heap control routes.
///
/// Every route answers GET and POST so a browser or `curl -X POST` both
/// work.
pub fn control_routes() -> Router {
    Router::new()
        .route("/add", get(handlers::add).post(handlers::add))
        .route("/rel", get(handlers::release).post(handlers::release))
        .route("/release", get(handlers::release).post(handlers::release))
        .route("/gc", get(handlers::force_collect).post(handlers::force_collect))
        .route("/stats", get(handlers::stats))
        .route("/reset", get(handlers::reset).post(handlers::reset))
}

/// Health check and metrics routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/_health", get(handlers::health_check))
        .route("/health", get(handlers::health_check))
        .route("/_metrics", get(metrics_endpoint))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint() -> String {
    crate::metrics::export_metrics()
}
