//! Prometheus-compatible `/metrics` endpoint.
//!
//! Derived from the same per-provider sliding window the management API's
//! `/api/v1/daemon/health` exposes (§4.7) — values describe the last K
//! attempts, not lifetime counters, so `TYPE gauge` is used throughout
//! rather than `counter`.
//!
//! Metric families:
//! - `zen_router_provider_attempts`       — attempts in the current window, by provider and outcome
//! - `zen_router_provider_success_rate`   — success rate over the window
//! - `zen_router_provider_latency_ms`     — P50/P95 latency, by provider and percentile
//! - `zen_router_provider_consecutive_failures`
//! - `zen_router_dropped_records_total`   — usage records dropped due to a full queue
//! - `zen_router_active_sessions`         — entries currently held in the session store

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::state::AppState;

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshots = state.recorder.all_health_snapshots();
    let mut out = String::with_capacity(1024);

    out.push_str("# HELP zen_router_provider_attempts Attempts recorded in the current health window, labelled by provider and outcome.\n");
    out.push_str("# TYPE zen_router_provider_attempts gauge\n");
    for s in &snapshots {
        let successes = (s.success_rate * s.total_attempts as f64).round() as u64;
        let failures = s.total_attempts as u64 - successes.min(s.total_attempts as u64);
        out.push_str(&format!("zen_router_provider_attempts{{provider=\"{}\",outcome=\"success\"}} {successes}\n", s.provider));
        out.push_str(&format!("zen_router_provider_attempts{{provider=\"{}\",outcome=\"failure\"}} {failures}\n", s.provider));
    }
    out.push('\n');

    out.push_str("# HELP zen_router_provider_success_rate Success rate over the current health window.\n");
    out.push_str("# TYPE zen_router_provider_success_rate gauge\n");
    for s in &snapshots {
        out.push_str(&format!("zen_router_provider_success_rate{{provider=\"{}\"}} {}\n", s.provider, s.success_rate));
    }
    out.push('\n');

    out.push_str("# HELP zen_router_provider_latency_ms Latency percentile (ms) over the current health window.\n");
    out.push_str("# TYPE zen_router_provider_latency_ms gauge\n");
    for s in &snapshots {
        out.push_str(&format!("zen_router_provider_latency_ms{{provider=\"{}\",percentile=\"p50\"}} {}\n", s.provider, s.p50_latency_ms));
        out.push_str(&format!("zen_router_provider_latency_ms{{provider=\"{}\",percentile=\"p95\"}} {}\n", s.provider, s.p95_latency_ms));
    }
    out.push('\n');

    out.push_str("# HELP zen_router_provider_consecutive_failures Current consecutive-failure streak per provider.\n");
    out.push_str("# TYPE zen_router_provider_consecutive_failures gauge\n");
    for s in &snapshots {
        out.push_str(&format!("zen_router_provider_consecutive_failures{{provider=\"{}\"}} {}\n", s.provider, s.consecutive_failures));
    }
    out.push('\n');

    out.push_str("# HELP zen_router_dropped_records_total Usage records dropped because the recorder queue was full.\n");
    out.push_str("# TYPE zen_router_dropped_records_total gauge\n");
    out.push_str(&format!("zen_router_dropped_records_total {}\n\n", state.recorder.dropped_count()));

    out.push_str("# HELP zen_router_active_sessions Sessions currently held in the session store.\n");
    out.push_str("# TYPE zen_router_active_sessions gauge\n");
    out.push_str(&format!("zen_router_active_sessions {}\n", state.sessions.len()));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
}
