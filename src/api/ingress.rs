//! Ingress HTTP server (C8): the loopback listener clients actually talk to.
//!
//! One fallback handler parses every inbound path, resolves it to a profile
//! and session, classifies and routes the request, and either returns a
//! translated JSON response directly or hands a live streaming handoff off
//! to [`crate::relay::spawn_relay`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::to_bytes,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::config::Profile;
use crate::error::AppError;
use crate::pricing::PricingTable;
use crate::provider::Dialect;
use crate::recorder::RequestRecord;
use crate::relay;
use crate::scenario;
use crate::state::AppState;
use crate::translate;

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiPath {
    Messages,
    ChatCompletions,
    Models,
}

impl ApiPath {
    fn native_dialect(self) -> Option<Dialect> {
        match self {
            Self::Messages => Some(Dialect::Anthropic),
            Self::ChatCompletions => Some(Dialect::OpenAi),
            Self::Models => None,
        }
    }

    /// Match a (possibly path-prefixed) tail of segments against one of the
    /// three canonical API paths.
    fn from_segments(segments: &[&str]) -> Option<Self> {
        match segments {
            ["v1", "messages"] => Some(Self::Messages),
            ["v1", "chat", "completions"] => Some(Self::ChatCompletions),
            ["v1", "models"] => Some(Self::Models),
            _ => None,
        }
    }
}

struct RouteMatch {
    profile: Profile,
    session_id: String,
    api_path: ApiPath,
}

/// Resolve `/<profile>/<session>/<api_path...>`, falling back to the default
/// profile and a freshly generated session when the prefix is absent or
/// doesn't name a real profile (§4.8, §6.2).
fn resolve_route(path: &str, cfg: &crate::config::Config, temp_profiles: &crate::temp_profile::TempProfileStore) -> Option<RouteMatch> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    if let Some(api_path) = ApiPath::from_segments(&segments) {
        return Some(RouteMatch {
            profile: cfg.default_profile().clone(),
            session_id: uuid::Uuid::new_v4().to_string(),
            api_path,
        });
    }

    if segments.len() > 2 {
        let (profile_name, session_id) = (segments[0], segments[1]);
        if let Some(api_path) = ApiPath::from_segments(&segments[2..]) {
            let profile = cfg.profile(profile_name).cloned().or_else(|| temp_profiles.get(profile_name))?;
            return Some(RouteMatch { profile, session_id: session_id.to_string(), api_path });
        }
    }

    None
}

fn detect_dialect(headers: &HeaderMap, api_path: ApiPath) -> Dialect {
    if let Some(declared) = headers
        .get("x-zen-client")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Dialect::Anthropic),
            "openai" => Some(Dialect::OpenAi),
            _ => None,
        })
    {
        return declared;
    }
    api_path.native_dialect().unwrap_or_default()
}

pub async fn ingress_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let cfg = state.config.current().await;

    let Some(route) = resolve_route(&path, &cfg, &state.temp_profiles) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "type": "not_found", "path": path }))).into_response();
    };

    match route.api_path {
        ApiPath::Models => handle_models(&state, &cfg, &route.profile).await,
        ApiPath::Messages | ApiPath::ChatCompletions => {
            let dialect = detect_dialect(req.headers(), route.api_path);
            handle_completion(state, cfg, route, dialect, req).await
        }
    }
}

async fn handle_completion(state: Arc<AppState>, cfg: Arc<crate::config::Config>, route: RouteMatch, dialect: Dialect, req: Request) -> Response {
    let body_bytes = match to_bytes(req.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return AppError::Translation(format!("reading request body: {e}")).into_response(),
    };
    let body: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => return AppError::Translation(format!("invalid JSON request body: {e}")).into_response(),
    };
    let canonical = match translate::decode_request(dialect, &body) {
        Ok(c) => c,
        Err(e) => return AppError::Translation(e.to_string()).into_response(),
    };

    let scenario = scenario::classify(&canonical, route.profile.long_context_threshold);
    state.sessions.touch(&route.session_id, &route.profile.name);

    let pricing = Arc::new(PricingTable::new(&cfg.pricing_overrides));
    let rr_key = format!("{}:{}", route.profile.name, scenario.route_key());
    let chain = state.router.select_chain(&route.profile, scenario.route_key(), &rr_key, &state.recorder, &pricing, &cfg.providers);

    if canonical.stream {
        match state.router.dispatch_stream_start(&chain, &cfg.providers, &canonical, &state.recorder).await {
            Ok(handoff) => {
                let body = relay::spawn_relay(
                    handoff,
                    dialect,
                    route.session_id,
                    route.profile.name,
                    scenario.to_string(),
                    Arc::clone(&state.sessions),
                    Arc::clone(&state.recorder),
                    pricing,
                );
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "text/event-stream")
                    .header("cache-control", "no-cache")
                    .body(body)
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            }
            Err((err, attempted)) => {
                record_failure(&state, &route.session_id, &route.profile.name, &scenario.to_string(), dialect, attempted, &err);
                err.into_response()
            }
        }
    } else {
        match state
            .router
            .dispatch_nonstream(&chain, &cfg.providers, dialect, &canonical, &state.recorder, relay::IDLE_TIMEOUT)
            .await
        {
            Ok(outcome) => {
                let usage = &outcome.canonical_response.usage;
                let cost = pricing.cost(&outcome.canonical_response.model, usage.input_tokens, usage.output_tokens);
                state.sessions.record_usage(
                    &route.session_id,
                    usage.input_tokens as u64,
                    usage.output_tokens as u64,
                    &outcome.winning_provider,
                    &outcome.canonical_response.model,
                );
                state.recorder.record(RequestRecord {
                    timestamp: Utc::now(),
                    session_id: route.session_id,
                    profile: route.profile.name,
                    scenario: scenario.to_string(),
                    attempted_providers: outcome.attempted_providers,
                    winning_provider: Some(outcome.winning_provider),
                    status: 200,
                    latency_ms: outcome.latency_ms,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cost,
                    client_dialect: dialect.to_string(),
                    error_kind: None,
                });
                (StatusCode::OK, Json(outcome.client_body)).into_response()
            }
            Err((err, attempted)) => {
                record_failure(&state, &route.session_id, &route.profile.name, &scenario.to_string(), dialect, attempted, &err);
                err.into_response()
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn record_failure(state: &AppState, session_id: &str, profile: &str, scenario: &str, dialect: Dialect, attempted: Vec<String>, err: &AppError) {
    state.recorder.record(RequestRecord {
        timestamp: Utc::now(),
        session_id: session_id.to_string(),
        profile: profile.to_string(),
        scenario: scenario.to_string(),
        attempted_providers: attempted,
        winning_provider: None,
        status: err.status_code().as_u16(),
        latency_ms: 0,
        input_tokens: 0,
        output_tokens: 0,
        cost: 0.0,
        client_dialect: dialect.to_string(),
        error_kind: Some(err.kind().to_string()),
    });
}

/// One cached `/v1/models` response per provider, refreshed every 60s.
struct ModelsCacheEntry {
    fetched_at: Instant,
    body: Value,
}

static MODELS_CACHE: std::sync::OnceLock<Mutex<HashMap<String, ModelsCacheEntry>>> = std::sync::OnceLock::new();

async fn handle_models(state: &AppState, cfg: &crate::config::Config, profile: &Profile) -> Response {
    let cache = MODELS_CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    for hop in profile.chain_for("default") {
        let Some(provider) = cfg.provider(&hop.provider) else { continue };

        if let Ok(guard) = cache.lock() {
            if let Some(entry) = guard.get(&provider.name) {
                if entry.fetched_at.elapsed() < Duration::from_secs(60) {
                    return (StatusCode::OK, Json(entry.body.clone())).into_response();
                }
            }
        }

        let url = provider.url_for("v1/models");
        let (auth_name, auth_value) = provider.auth_header();
        let client = reqwest::Client::new();
        let mut builder = client.get(&url).header(auth_name, auth_value);
        if provider.dialect() == Dialect::Anthropic {
            builder = builder.header("anthropic-version", translate::anthropic::ANTHROPIC_VERSION);
        }
        match builder.send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<Value>().await {
                    if let Ok(mut guard) = cache.lock() {
                        guard.insert(provider.name.clone(), ModelsCacheEntry { fetched_at: Instant::now(), body: body.clone() });
                    }
                    return (StatusCode::OK, Json(body)).into_response();
                }
            }
            _ => continue,
        }
    }

    AppError::Config("no configured provider returned a model list".into()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GatewaySettings};
    use crate::provider::Provider;
    use crate::temp_profile::TempProfileStore;
    use std::collections::HashMap as Map;

    fn sample_config() -> Config {
        let mut providers = Map::new();
        providers.insert(
            "p1".to_string(),
            Provider {
                name: "p1".into(),
                dialect: Dialect::Anthropic,
                base_url: "https://x".into(),
                credential: "k".into(),
                default_model: "m".into(),
                reasoning_model: None,
                haiku_model: None,
                opus_model: None,
                sonnet_model: None,
            },
        );
        let mut profiles = Map::new();
        profiles.insert(
            "default".to_string(),
            Profile { name: "default".into(), providers: vec!["p1".into()], routing: Map::new(), long_context_threshold: 32_000, strategy: Default::default() },
        );
        profiles.insert(
            "work".to_string(),
            Profile { name: "work".into(), providers: vec!["p1".into()], routing: Map::new(), long_context_threshold: 32_000, strategy: Default::default() },
        );
        Config {
            gateway: GatewaySettings { default_profile: "default".into(), ..Default::default() },
            providers,
            profiles,
            pricing_overrides: Map::new(),
        }
    }

    #[test]
    fn bare_api_path_falls_back_to_default_profile_and_random_session() {
        let cfg = sample_config();
        let temp = TempProfileStore::new(10);
        let route = resolve_route("/v1/messages", &cfg, &temp).unwrap();
        assert_eq!(route.profile.name, "default");
        assert_eq!(route.api_path, ApiPath::Messages);
    }

    #[test]
    fn path_prefixed_form_pins_profile_and_session() {
        let cfg = sample_config();
        let temp = TempProfileStore::new(10);
        let route = resolve_route("/work/abc123/v1/chat/completions", &cfg, &temp).unwrap();
        assert_eq!(route.profile.name, "work");
        assert_eq!(route.session_id, "abc123");
        assert_eq!(route.api_path, ApiPath::ChatCompletions);
    }

    #[test]
    fn unrecognized_path_does_not_match() {
        let cfg = sample_config();
        let temp = TempProfileStore::new(10);
        assert!(resolve_route("/nonsense", &cfg, &temp).is_none());
    }

    #[test]
    fn temp_profile_id_resolves_path_prefixed_form() {
        let cfg = sample_config();
        let temp = TempProfileStore::new(10);
        let id = temp.insert(vec!["p1".into()]);
        let route = resolve_route(&format!("/{id}/sess1/v1/messages"), &cfg, &temp).unwrap();
        assert_eq!(route.profile.name, id);
    }

    #[test]
    fn x_zen_client_header_overrides_path_inferred_dialect() {
        let mut headers = HeaderMap::new();
        headers.insert("x-zen-client", "openai".parse().unwrap());
        assert_eq!(detect_dialect(&headers, ApiPath::Messages), Dialect::OpenAi);
    }

    #[test]
    fn missing_header_infers_dialect_from_api_path() {
        let headers = HeaderMap::new();
        assert_eq!(detect_dialect(&headers, ApiPath::Messages), Dialect::Anthropic);
        assert_eq!(detect_dialect(&headers, ApiPath::ChatCompletions), Dialect::OpenAi);
    }
}
