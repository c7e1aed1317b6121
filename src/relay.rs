//! Streaming Relay (C5): pipes the winning provider's SSE body to the
//! client through the wire translator, while a side task folds parsed
//! events into session and usage bookkeeping.
//!
//! The forwarder never waits on the observer — token accounting is handed
//! off through the bounded usage-record queue in [`crate::recorder`], whose
//! `record` call is itself non-blocking, so a slow consumer only makes
//! bookkeeping stale, never the client's byte stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::pricing::PricingTable;
use crate::provider::Dialect;
use crate::recorder::RequestRecord;
use crate::recorder::Recorder;
use crate::router::StreamHandoff;
use crate::session::SessionStore;
use crate::translate::Translator;

/// §4.5/§5 hard wall-clock ceilings.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(600);

enum EndReason {
    Natural,
    IdleTimeout,
    TotalTimeout,
    ClientDisconnect,
    UpstreamError,
}

impl EndReason {
    fn error_kind(&self) -> Option<&'static str> {
        match self {
            Self::Natural => None,
            Self::IdleTimeout | Self::TotalTimeout => Some("deadline"),
            Self::ClientDisconnect => Some("client_cancel"),
            Self::UpstreamError => Some("transport"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_relay(
    handoff: StreamHandoff,
    client_dialect: Dialect,
    session_id: String,
    profile: String,
    scenario: String,
    session_store: Arc<SessionStore>,
    recorder: Arc<Recorder>,
    pricing: Arc<PricingTable>,
) -> axum::body::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);

    tokio::spawn(async move {
        let provider_name = handoff.provider.name.clone();
        let resolved_model = handoff.resolved_model.clone();
        let attempted_providers = handoff.attempted_providers.clone();
        let started = handoff.started;

        let mut translator = Translator::new(handoff.provider.dialect(), client_dialect, Utc::now().timestamp());
        let mut upstream = handoff.response.bytes_stream();
        let mut last_byte_at = Instant::now();
        let deadline = started + TOTAL_TIMEOUT;
        let mut end_reason = EndReason::Natural;

        'relay: loop {
            if Instant::now() >= deadline {
                end_reason = EndReason::TotalTimeout;
                break;
            }
            let idle_budget = IDLE_TIMEOUT.saturating_sub(last_byte_at.elapsed());
            tokio::select! {
                chunk = upstream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            last_byte_at = Instant::now();
                            match translator.push(&bytes) {
                                Ok(frames) => {
                                    for frame in frames {
                                        if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                                            end_reason = EndReason::ClientDisconnect;
                                            break 'relay;
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(provider = %provider_name, error = %e, "translation error mid-stream");
                                }
                            }
                            if translator.is_terminated() {
                                break 'relay;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(provider = %provider_name, error = %e, "upstream stream error");
                            end_reason = EndReason::UpstreamError;
                            break 'relay;
                        }
                        None => break 'relay, // upstream EOF
                    }
                }
                _ = tokio::time::sleep(idle_budget) => {
                    end_reason = EndReason::IdleTimeout;
                    break 'relay;
                }
            }
        }

        if !translator.is_terminated() && !matches!(end_reason, EndReason::ClientDisconnect) {
            for frame in translator.finish_unterminated() {
                if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                    end_reason = EndReason::ClientDisconnect;
                    break;
                }
            }
        }

        let usage = translator.usage_so_far();
        session_store.record_usage(
            &session_id,
            usage.input_tokens as u64,
            usage.output_tokens as u64,
            &provider_name,
            &resolved_model,
        );

        let record = RequestRecord {
            timestamp: Utc::now(),
            session_id,
            profile,
            scenario,
            attempted_providers,
            winning_provider: Some(provider_name.clone()),
            status: 200,
            latency_ms: started.elapsed().as_millis() as u64,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost: pricing.cost(&resolved_model, usage.input_tokens, usage.output_tokens),
            client_dialect: client_dialect.to_string(),
            error_kind: end_reason.error_kind().map(String::from),
        };
        recorder.record(record);
    });

    let stream = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    axum::body::Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_reason_maps_to_expected_error_kind() {
        assert_eq!(EndReason::Natural.error_kind(), None);
        assert_eq!(EndReason::IdleTimeout.error_kind(), Some("deadline"));
        assert_eq!(EndReason::TotalTimeout.error_kind(), Some("deadline"));
        assert_eq!(EndReason::ClientDisconnect.error_kind(), Some("client_cancel"));
        assert_eq!(EndReason::UpstreamError.error_kind(), Some("transport"));
    }
}
