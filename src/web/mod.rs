//! Web server module.
//!
//! Owns the HTTP framing only; all answers come from the status service
//! and the result store.

mod handlers;

pub use handlers::*;

use crate::config::Config;
use crate::db::Store;
use crate::status::StatusService;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub status: Arc<StatusService>,
}

/// API server for pulsewatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: Arc<Config>, store: Arc<Store>, status: Arc<StatusService>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                status,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_index))
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/status", get(handlers::handle_status_all))
            .route("/api/status/{id}", get(handlers::handle_status_one))
            .route("/api/history/{id}", get(handlers::handle_history))
            .route("/api/health", get(handlers::handle_health))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until the shutdown future resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
