//! Unified error type for the proxy runtime.
//!
//! Every fallible request-path operation returns `Result<T, AppError>`. The
//! variants mirror the error-kind table: each one carries exactly the
//! context needed to log it, map it to an HTTP status, and, in
//! [`ErrorKind`], feed it into a [`crate::recorder::RequestRecord`].
//!
//! Internal glue (config loading, adapter construction) still uses
//! `anyhow::Result` and is only converted to an `AppError` at the point
//! where a request handler needs to answer the client.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;

/// Coarse classification surfaced in [`crate::recorder::RequestRecord::error_kind`].
///
/// Distinct from `AppError` itself: several `AppError` variants collapse to
/// the same `ErrorKind` (e.g. every `{502,503,504}` response is
/// `ErrorKind::UpstreamServerError` regardless of which status it was).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    UpstreamServerError,
    UpstreamRateLimited,
    UpstreamClientError,
    Translation,
    ClientCancel,
    Deadline,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::UpstreamServerError => "upstream_5xx",
            Self::UpstreamRateLimited => "upstream_429",
            Self::UpstreamClientError => "upstream_4xx",
            Self::Translation => "translation",
            Self::ClientCancel => "client_cancel",
            Self::Deadline => "deadline",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// The proxy's unified error type, one variant per row of the error-handling
/// table.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// DNS/TCP/TLS failure, or an idle timeout before any upstream bytes
    /// arrived. Triggers failover (§4.4); surfaced as 502 only once every
    /// provider in the chain has been exhausted.
    #[error("transport error contacting {provider}: {source}")]
    Transport {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    /// Upstream returned 502/503/504. Triggers failover.
    #[error("upstream {provider} returned {status}")]
    UpstreamServerError { provider: String, status: u16 },

    /// Upstream returned 429. Triggers failover unless `retry_after` is
    /// absent or too large to be worth it (router decides; this variant is
    /// the terminal one returned to the client when failover is exhausted
    /// or was skipped).
    #[error("upstream {provider} rate limited (retry_after={retry_after:?})")]
    UpstreamRateLimited {
        provider: String,
        retry_after: Option<u64>,
        body: serde_json::Value,
    },

    /// Any 4xx other than 429. No retry — returned to the client verbatim.
    #[error("upstream {provider} returned client error {status}")]
    UpstreamClientError {
        provider: String,
        status: u16,
        body: serde_json::Value,
    },

    /// Malformed upstream body: JSON parse failure or a required field
    /// missing during wire translation. No retry.
    #[error("translation error: {0}")]
    Translation(String),

    /// Downstream client disconnected. Carries no HTTP representation —
    /// the connection is already gone by the time this is observed.
    #[error("client disconnected")]
    ClientCancel,

    /// Overall or idle-byte deadline expired (§5).
    #[error("request deadline exceeded")]
    Deadline,

    /// No profile, no providers, or some other pre-flight configuration
    /// problem that makes the request impossible to route.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::UpstreamServerError { .. } => ErrorKind::UpstreamServerError,
            Self::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            Self::UpstreamClientError { .. } => ErrorKind::UpstreamClientError,
            Self::Translation(_) => ErrorKind::Translation,
            Self::ClientCancel => ErrorKind::ClientCancel,
            Self::Deadline => ErrorKind::Deadline,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this failure should advance the router to the next provider
    /// in the chain (§4.4 point 3).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::UpstreamServerError { .. } => true,
            Self::UpstreamRateLimited { retry_after, .. } => {
                !matches!(retry_after, Some(secs) if *secs > 1)
            }
            _ => false,
        }
    }
}

impl AppError {
    /// The HTTP status this error maps to, without consuming `self` —
    /// used by the request path to fill in `RequestRecord.status` before
    /// handing the error off to axum for the actual response body.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UpstreamClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Translation(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ClientCancel => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Deadline => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamServerError { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::UpstreamClientError { status, body, .. } => {
                tracing::warn!(kind = %ErrorKind::UpstreamClientError, %status, "no-retry client error");
                let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
                (code, Json(body)).into_response()
            }
            Self::UpstreamRateLimited { body, retry_after, .. } => {
                tracing::warn!(kind = %ErrorKind::UpstreamRateLimited, ?retry_after, "rate limited");
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
            }
            Self::Translation(msg) => {
                tracing::error!(kind = %ErrorKind::Translation, error = %msg, "translation failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "type": "translation_error", "message": msg })),
                )
                    .into_response()
            }
            Self::Config(msg) => {
                tracing::error!(kind = %ErrorKind::Config, error = %msg, "configuration error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "type": "config_error", "message": msg })),
                )
                    .into_response()
            }
            Self::ClientCancel => {
                // Nothing to send — the peer is already gone. Axum still
                // needs a Response value, but no bytes will ever reach it.
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
            Self::Deadline => {
                tracing::warn!(kind = %ErrorKind::Deadline, "request deadline exceeded");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    Json(json!({ "type": "deadline_exceeded" })),
                )
                    .into_response()
            }
            Self::Transport { provider, source } => {
                tracing::warn!(kind = %ErrorKind::Transport, %provider, error = %source, "transport failure, all providers exhausted");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "type": "transport_error", "provider": provider })),
                )
                    .into_response()
            }
            Self::UpstreamServerError { provider, status } => {
                tracing::warn!(kind = %ErrorKind::UpstreamServerError, %provider, %status, "upstream 5xx, all providers exhausted");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "type": "upstream_error", "provider": provider, "status": status })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_5xx_are_retryable() {
        let e = AppError::Transport { provider: "p".into(), source: anyhow::anyhow!("boom") };
        assert!(e.is_retryable());

        let e = AppError::UpstreamServerError { provider: "p".into(), status: 503 };
        assert!(e.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let e = AppError::UpstreamClientError { provider: "p".into(), status: 400, body: json!({}) };
        assert!(!e.is_retryable());
    }

    #[test]
    fn rate_limit_without_long_retry_after_is_retryable() {
        let e = AppError::UpstreamRateLimited { provider: "p".into(), retry_after: None, body: json!({}) };
        assert!(e.is_retryable());

        let e = AppError::UpstreamRateLimited { provider: "p".into(), retry_after: Some(1), body: json!({}) };
        assert!(e.is_retryable());
    }

    #[test]
    fn rate_limit_with_long_retry_after_is_not_retryable() {
        let e = AppError::UpstreamRateLimited { provider: "p".into(), retry_after: Some(30), body: json!({}) };
        assert!(!e.is_retryable());
    }

    #[test]
    fn status_code_matches_into_response_for_rate_limited() {
        let e = AppError::UpstreamRateLimited { provider: "p".into(), retry_after: None, body: json!({}) };
        assert_eq!(e.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn kind_maps_each_variant() {
        assert_eq!(AppError::ClientCancel.kind(), ErrorKind::ClientCancel);
        assert_eq!(AppError::Deadline.kind(), ErrorKind::Deadline);
        assert_eq!(AppError::Config("x".into()).kind(), ErrorKind::Config);
    }
}
