//! HTTP surface: the ingress listener (C8) and the management control plane
//! (§6.3), plus the middleware and probes both share.

pub mod health;
pub mod ingress;
pub mod management;
pub mod metrics;
pub mod request_id;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router as AxumRouter;

use crate::state::AppState;

/// The client-facing listener: one fallback handler parses every path, so no
/// route table is needed beyond the liveness probe.
pub fn ingress_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(health::healthz))
        .fallback(ingress::ingress_handler)
        .with_state(state)
}

/// The control-plane listener (§6.3).
pub fn management_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(metrics::metrics))
        .route("/api/v1/daemon/status", get(management::status))
        .route("/api/v1/daemon/sessions", get(management::sessions))
        .route("/api/v1/daemon/health", get(management::health))
        .route("/api/v1/profiles/temp", post(management::create_temp_profile))
        .with_state(state)
}
