//! HTTP Adapter - Control API, Health and Metrics
//!
//! One axum 0.7 router serves the feed control routes under
//! `/api/price`, the `/live` and `/ready` probes, and `/metrics`.

pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::adapters::metrics::{FeedMetrics, health};
use crate::ports::price_store::PriceStore;
use crate::usecases::feed_controller::FeedController;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<FeedController>,
    pub store: Arc<dyn PriceStore>,
    pub metrics: Option<Arc<FeedMetrics>>,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/price/status", get(routes::status))
        .route("/api/price/start", post(routes::start))
        .route("/api/price/stop", post(routes::stop))
        .route("/api/price/restart", post(routes::restart))
        .route("/api/price/config", put(routes::configure))
        .route("/api/price/exclude", post(routes::exclude))
        .route("/api/price/include", post(routes::include))
        .route("/api/price/excluded", get(routes::excluded))
        .route("/api/price/prices", get(routes::prices))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .with_state(state)
}

/// Serve `app` on `bind_address` until shutdown is broadcast.
#[instrument(skip(app, shutdown_rx))]
pub async fn serve(
    app: Router,
    bind_address: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
