//! HTTP middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::debug;

/// Request logging middleware
pub async fn log_request(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = std::time::Instant::now();

    let response = next.run(req).await;

    debug!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "Request completed"
    );

    response
}
