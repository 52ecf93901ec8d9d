//! Interactive HTTP surface
//!
//! Exposes the slab store primitives as independent requests so an
//! operator can push heap state around by hand:
//!
//! - `/add?bytes=n`    retain a new slab
//! - `/rel?bytes=n`    release bytes, oldest slabs first
//! - `/gc`             force a collection pass
//! - `/stats`          snapshot only
//! - `/reset`          drop every slab, then force a collection pass

pub mod handlers;
pub mod middleware;
pub mod routes;

use axum::{extract::Extension, Router};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::ceiling::Ceiling;
use crate::probe::HeapRuntime;
use crate::slab::SharedSlabStore;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: String,
    /// HTTP port
    pub http_port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0".to_string(),
            http_port: 1112,
            enable_cors: false,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: SharedSlabStore,
    pub runtime: Arc<dyn HeapRuntime>,
    pub config: ServerConfig,
    /// Ceiling the process is bound to, for reporting
    pub ceiling: Option<Ceiling>,
    pub started: Instant,
}

impl AppState {
    pub fn new(runtime: Arc<dyn HeapRuntime>, config: ServerConfig) -> Self {
        Self {
            store: SharedSlabStore::new(),
            runtime,
            config,
            ceiling: None,
            started: Instant::now(),
        }
    }

    pub fn with_ceiling(mut self, ceiling: Ceiling) -> Self {
        self.ceiling = Some(ceiling);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("ceiling", &self.ceiling)
            .finish()
    }
}

/// Assemble the router with all routes and layers
pub fn build_router(state: AppState) -> Router {
    let enable_cors = state.config.enable_cors;

    let app = Router::new()
        .merge(routes::control_routes())
        .merge(routes::health_routes())
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the interactive server and serve until `shutdown` resolves.
///
/// In-flight requests finish before this returns.
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    crate::metrics::init_metrics();

    let addr = format!("{}:{}", state.config.http_addr, state.config.http_port);
    let app = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP endpoint started on http://{}", addr);
    info!("Metrics: http://{}/_metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            anyhow::anyhow!("Server failed: {}", e)
        })?;

    info!("HTTP endpoint stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
