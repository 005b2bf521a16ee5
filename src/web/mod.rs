//! Web server module.
//!
//! Serves the check-location side of remote probe delegation and a
//! read-only view of the persisted state.

mod handlers;

pub use handlers::*;

use crate::config::WorkerConfig;
use crate::db::KvStore;
use crate::discovery::Discovery;
use crate::probe::Prober;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Name of this check location.
    pub location: String,
    pub worker: Arc<WorkerConfig>,
    pub store: Arc<dyn KvStore>,
    pub prober: Arc<dyn Prober>,
    pub discovery: Option<Arc<dyn Discovery>>,
}

/// Web server for a check location.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Build the router with all routes.
    pub fn router(state: AppState) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_root).post(handlers::handle_check))
            .route("/check", post(handlers::handle_check))
            .route("/api/state", get(handlers::handle_get_state))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(state)
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = Self::router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
