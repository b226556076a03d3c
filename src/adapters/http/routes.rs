//! Control routes for the price feed.
//!
//! Every response is `{ "success": bool, "message": str, "data": ... }`.
//! Invalid transitions (start while running, stop while stopped) answer
//! 409 with `success: false`; they are not server errors.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::AppState;
use crate::domain::feed::{ConfigPatch, FeedError};

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T: Serialize>(message: impl Into<String>, data: Option<T>) -> Reply<T> {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            message: message.into(),
            data,
        }),
    )
}

fn fail<T: Serialize>(status: StatusCode, message: impl Into<String>) -> Reply<T> {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: message.into(),
            data: None,
        }),
    )
}

fn lifecycle_reply(result: Result<(), FeedError>, done: &str) -> Reply<()> {
    match result {
        Ok(()) => ok(done, None),
        Err(e) if e.is_benign() => fail(StatusCode::CONFLICT, e.to_string()),
        Err(e) => {
            error!(error = %e, "Lifecycle request failed");
            fail(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    ok("Price feed status", Some(state.controller.status()))
}

pub async fn start(State(state): State<AppState>) -> impl IntoResponse {
    lifecycle_reply(state.controller.start().await, "Price feed started")
}

pub async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    lifecycle_reply(state.controller.stop().await, "Price feed stopped")
}

pub async fn restart(State(state): State<AppState>) -> impl IntoResponse {
    lifecycle_reply(state.controller.restart().await, "Price feed restarted")
}

pub async fn configure(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    if patch.is_empty() {
        return fail::<serde_json::Value>(
            StatusCode::BAD_REQUEST,
            "No configuration fields provided",
        );
    }

    let outcome = state.controller.configure(patch).await;
    let rejected: Vec<String> = outcome.rejected.iter().map(ToString::to_string).collect();
    let data = json!({
        "applied": outcome.applied,
        "rejected": rejected,
        "restarted": outcome.restarted,
    });

    if outcome.is_ok() {
        ok("Configuration updated", Some(data))
    } else {
        warn!(?rejected, "Configuration partially rejected");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse {
                success: false,
                message: rejected.join("; "),
                data: Some(data),
            }),
        )
    }
}

/// Body of the exclude / include routes.
#[derive(Debug, Default, Deserialize)]
pub struct SymbolRequest {
    #[serde(default)]
    pub symbol: Option<String>,
}

fn required_symbol(request: &SymbolRequest) -> Option<&str> {
    request
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub async fn exclude(
    State(state): State<AppState>,
    Json(request): Json<SymbolRequest>,
) -> impl IntoResponse {
    let Some(symbol) = required_symbol(&request) else {
        return fail::<serde_json::Value>(StatusCode::BAD_REQUEST, "Symbol is required");
    };
    let added = state.controller.exclude_symbol(symbol);
    let message = if added {
        format!("{symbol} excluded from price updates")
    } else {
        format!("{symbol} was already excluded")
    };
    ok(message, Some(json!({ "symbol": symbol, "changed": added })))
}

pub async fn include(
    State(state): State<AppState>,
    Json(request): Json<SymbolRequest>,
) -> impl IntoResponse {
    let Some(symbol) = required_symbol(&request) else {
        return fail::<serde_json::Value>(StatusCode::BAD_REQUEST, "Symbol is required");
    };
    let was_excluded = state.controller.include_symbol(symbol);
    let message = if was_excluded {
        format!("{symbol} included in price updates")
    } else {
        format!("{symbol} was not excluded")
    };
    ok(message, Some(json!({ "symbol": symbol, "wasExcluded": was_excluded })))
}

pub async fn excluded(State(state): State<AppState>) -> impl IntoResponse {
    let symbols = state.controller.list_excluded();
    ok(
        "Excluded symbols",
        Some(json!({ "count": symbols.len(), "symbols": symbols })),
    )
}

pub async fn prices(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.read_prices().await {
        Ok(records) => ok("Current prices", Some(records)),
        Err(e) => {
            error!(error = %e, "Failed to read price table");
            fail(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}
