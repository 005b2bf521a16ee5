//! HTTP request handlers.

use super::AppState;
use crate::db::{MonitorState, MonitorTarget, STATE_KEY};
use crate::probe::{RemoteCheckRequest, RemoteCheckResponse};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};

// ============================================================================
// Remote checks
// ============================================================================

pub async fn handle_root() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, "Remote worker is working...")
}

/// Resolve a target id, preferring discovery over static config.
async fn resolve_target(state: &AppState, id: &str) -> Option<MonitorTarget> {
    if let Some(discovery) = &state.discovery {
        match discovery.find(id).await {
            Ok(Some(target)) => return Some(target),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping discovery lookup for {}: {}", id, e),
        }
    }

    state.worker.monitors.iter().find(|m| m.id == id).cloned()
}

pub async fn handle_check(
    State(state): State<AppState>,
    Json(req): Json<RemoteCheckRequest>,
) -> impl IntoResponse {
    tracing::info!("Handling remote check of {} at {}", req.target, state.location);

    let target = match resolve_target(&state, &req.target).await {
        Some(t) => t,
        None => return (StatusCode::NOT_FOUND, "Target Not Found").into_response(),
    };

    let status = state.prober.probe(&target).await;

    Json(RemoteCheckResponse {
        location: state.location.clone(),
        status,
    })
    .into_response()
}

// ============================================================================
// API: State
// ============================================================================

pub async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get(STATE_KEY) {
        Ok(Some(raw)) => ([(header::CONTENT_TYPE, "application/json")], raw).into_response(),
        Ok(None) => Json(MonitorState::new()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
