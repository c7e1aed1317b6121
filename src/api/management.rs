//! Management HTTP server (§6.3): the daemon's control plane, bound to a
//! separate loopback listener from the ingress (C8).

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

/// `GET /api/v1/daemon/status` — also the readiness probe `spawn_background`
/// polls after re-exec'ing into background mode (§4.9).
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "version": state.version,
            "uptime": state.uptime_secs(),
            "proxy_port": state.proxy_port,
            "web_port": state.web_port,
            "active_sessions": state.sessions.len(),
        })),
    )
}

/// `GET /api/v1/daemon/sessions`
pub async fn sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "count": state.sessions.len() })))
}

/// `GET /api/v1/daemon/health` — per-provider health snapshots (§4.7). Flags
/// are advisory only; nothing here changes routing behavior.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "providers": state.recorder.all_health_snapshots(),
            "dropped_records": state.recorder.dropped_count(),
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateTempProfileRequest {
    pub providers: Vec<String>,
}

/// `POST /api/v1/profiles/temp` — registers an ad-hoc profile for pinning
/// via the path-prefixed ingress form; capacity-bounded with LRU eviction.
pub async fn create_temp_profile(State(state): State<Arc<AppState>>, Json(body): Json<CreateTempProfileRequest>) -> impl IntoResponse {
    if body.providers.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "type": "config_error", "message": "providers must not be empty" }))).into_response();
    }
    let id = state.temp_profiles.insert(body.providers);
    (StatusCode::OK, Json(json!({ "id": id }))).into_response()
}
