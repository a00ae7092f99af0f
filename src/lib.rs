//! model-hub
//!
//! Front-end dispatcher for a fleet of model-inference worker processes.
//! Clients POST `/predict` naming a model; the hub reserves a ready, idle
//! worker serving that model, forwards the request over loopback HTTP, and
//! returns the worker's response. The hub launches every worker at startup,
//! tracks readiness via the `/model-ready` callback, and relaunches workers
//! after their process exits.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod workers;

pub use config::HubConfig;
pub use error::HubError;
pub use state::AppState;
pub use workers::WorkerManager;

/// Request deadline on the client-facing surface. Covers queue wait plus
/// forwarding; requests that outlive it get a timeout response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Assemble the ingress router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(routes::predict))
        .route("/ping", get(routes::ping))
        .route("/ready", get(routes::ready))
        .route("/stats", get(routes::stats))
        .route("/model-ready", post(routes::model_ready))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the worker fleet and serve the HTTP API until shutdown.
///
/// Fails fast when the configuration is unusable, the listen port cannot be
/// bound, or an initial worker spawn is refused by the OS.
pub async fn run_server(config: HubConfig, port: u16) -> anyhow::Result<()> {
    let manager = WorkerManager::new(&config);
    info!(
        models = config.models.len(),
        workers = config.total_workers(),
        "starting model hub"
    );
    manager.initialize()?;

    let state = Arc::new(AppState::new(manager));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("model-hub listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}
