//! HTTP request handlers.

use super::AppState;
use crate::status::TargetStatus;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on one history page.
const MAX_HISTORY_LIMIT: usize = 1000;
const DEFAULT_HISTORY_LIMIT: usize = 100;

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.targets.clone())
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub url: String,
    /// `null` means the target has never been probed — a different state
    /// from a target whose last probe failed.
    pub status: Option<TargetStatus>,
}

pub async fn handle_status_all(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.status_all(&state.config.targets) {
        Ok(mut all) => {
            let entries: Vec<StatusEntry> = state
                .config
                .targets
                .iter()
                .map(|t| StatusEntry {
                    id: t.id.clone(),
                    url: t.url.clone(),
                    status: all.remove(&t.id).flatten(),
                })
                .collect();
            Json(entries).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_status_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(target) = state.config.targets.iter().find(|t| t.id == id) else {
        return (StatusCode::NOT_FOUND, "unknown target").into_response();
    };

    match state.status.status(&target.id) {
        Ok(status) => Json(StatusEntry {
            id: target.id.clone(),
            url: target.url.clone(),
            status,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub async fn handle_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    if !state.config.targets.iter().any(|t| t.id == id) {
        return (StatusCode::NOT_FOUND, "unknown target").into_response();
    }

    let since = query
        .since
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    match state.store.history(&id, since, limit) {
        Ok(results) => Json(results).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Liveness and index
// ============================================================================

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "time": Utc::now(),
        "targets": state.config.targets.len(),
    }))
}

pub async fn handle_index() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/api/targets",
            "/api/status",
            "/api/status/{id}",
            "/api/history/{id}",
            "/api/health",
        ],
    }))
}
