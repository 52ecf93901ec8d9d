//! HTTP route handlers

use axum::{
    extract::{rejection::QueryRejection, Extension, Json, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::probe::MemorySnapshot;
use crate::server::AppState;

/// `?bytes=n` query
#[derive(Debug, Deserialize)]
pub struct BytesQuery {
    pub bytes: Option<String>,
}

impl BytesQuery {
    /// Amount from an extracted query, mapping extractor rejections to
    /// [`Error::InvalidArgument`]
    pub fn from_extracted(
        query: std::result::Result<Query<BytesQuery>, QueryRejection>,
    ) -> Result<usize> {
        match query {
            Ok(Query(query)) => query.amount(),
            Err(rejection) => Err(Error::InvalidArgument(rejection.body_text())),
        }
    }

    /// Validate the amount without touching any state
    pub fn amount(&self) -> Result<usize> {
        let raw = self
            .bytes
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidArgument("invalid 'bytes' query parameter".to_string()))?;

        raw.trim().parse::<usize>().map_err(|e| {
            Error::InvalidArgument(format!("invalid 'bytes' value '{}': {}", raw, e))
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddResponse {
    pub added: usize,
    pub retained: usize,
    pub snapshot: MemorySnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: usize,
    pub not_released: usize,
    pub retained: usize,
    pub snapshot: MemorySnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub retained: usize,
    pub snapshot: MemorySnapshot,
}

/// Add a slab of `bytes` bytes
#[instrument(skip(state))]
pub async fn add(
    Extension(state): Extension<Arc<AppState>>,
    query: std::result::Result<Query<BytesQuery>, QueryRejection>,
) -> Response {
    let bytes = match BytesQuery::from_extracted(query) {
        Ok(bytes) => bytes,
        Err(e) => return rejected("add", e),
    };

    let store = state.store.clone();
    if let Err(e) = blocking(move || store.add(bytes)).await {
        return failed("add", e);
    }
    info!(bytes, "Added slab");

    respond("add", &state, |retained, snapshot| AddResponse {
        added: bytes,
        retained,
        snapshot,
    })
}

/// Release `bytes` bytes, oldest slabs first
#[instrument(skip(state))]
pub async fn release(
    Extension(state): Extension<Arc<AppState>>,
    query: std::result::Result<Query<BytesQuery>, QueryRejection>,
) -> Response {
    let bytes = match BytesQuery::from_extracted(query) {
        Ok(bytes) => bytes,
        Err(e) => return rejected("release", e),
    };

    let store = state.store.clone();
    let outcome = match blocking(move || store.release(bytes)).await {
        Ok(outcome) => outcome,
        Err(e) => return failed("release", e),
    };
    info!(
        released = outcome.released,
        not_released = outcome.shortfall,
        "Released slabs"
    );

    respond("release", &state, |retained, snapshot| ReleaseResponse {
        released: outcome.released,
        not_released: outcome.shortfall,
        retained,
        snapshot,
    })
}

/// Force a collection pass
#[instrument(skip(state))]
pub async fn force_collect(Extension(state): Extension<Arc<AppState>>) -> Response {
    if let Err(e) = collect(&state) {
        return failed("gc", e);
    }
    respond("gc", &state, |retained, snapshot| SnapshotResponse { retained, snapshot })
}

/// Current statistics, no mutation
#[instrument(skip(state))]
pub async fn stats(Extension(state): Extension<Arc<AppState>>) -> Response {
    respond("stats", &state, |retained, snapshot| SnapshotResponse { retained, snapshot })
}

/// Drop every slab and force a collection pass
#[instrument(skip(state))]
pub async fn reset(Extension(state): Extension<Arc<AppState>>) -> Response {
    state.store.reset();
    info!("Slab store reset");

    if let Err(e) = collect(&state) {
        return failed("reset", e);
    }
    respond("reset", &state, |retained, snapshot| SnapshotResponse { retained, snapshot })
}

/// Health check
pub async fn health_check(Extension(state): Extension<Arc<AppState>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "version": crate::VERSION,
        "uptime_seconds": state.started.elapsed().as_secs(),
        "ceiling": state.ceiling,
        "retained": state.store.total_bytes(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// Run store work that allocates, fills or frees slabs off the async workers
async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {}", e)))
}

fn collect(state: &AppState) -> Result<()> {
    state.runtime.collect()?;
    metrics::record_collection();
    Ok(())
}

/// Snapshot after the operation and render `build`'s body as JSON
fn respond<T: Serialize>(
    op: &str,
    state: &AppState,
    build: impl FnOnce(usize, MemorySnapshot) -> T,
) -> Response {
    let retained = state.store.total_bytes();
    match state.runtime.snapshot() {
        Ok(snapshot) => {
            metrics::record_snapshot(&snapshot, retained);
            metrics::record_operation(op, true);
            Json(build(retained, snapshot)).into_response()
        }
        Err(e) => failed(op, e),
    }
}

fn rejected(op: &str, e: Error) -> Response {
    warn!(op, error = %e, "Request rejected");
    metrics::record_operation(op, false);
    error_response(status_for(&e), e)
}

fn failed(op: &str, e: Error) -> Response {
    error!(op, error = %e, "Operation failed");
    metrics::record_operation(op, false);
    error_response(status_for(&e), e)
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, e: Error) -> Response {
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": e.to_string(),
        })),
    )
        .into_response()
}
