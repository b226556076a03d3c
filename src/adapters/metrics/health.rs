//! Health Checks - Liveness and Readiness Probes
//!
//! `/live` answers as long as the process serves HTTP. `/ready` is 200
//! only while the feed is running on a live store connection.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::adapters::http::AppState;
use crate::domain::feed::FeedPhase;

/// Liveness probe: always returns 200 if the process is running.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness probe.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let feed = &state.controller;
    if feed.phase() == FeedPhase::Running && feed.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

/// Prometheus scrape endpoint; 404 when metrics are disabled.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(metrics) => (StatusCode::OK, super::prometheus::render(metrics)),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}
