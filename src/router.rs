//! Router / Failover Engine (C4): picks a provider chain for a scenario,
//! reorders its head per the profile's load-balancing strategy, and walks
//! the chain attempting each provider in turn.
//!
//! Streaming and non-streaming requests share chain selection and the
//! per-attempt classification logic; once any streamed byte has reached the
//! client, failover is no longer this module's job (see `relay.rs`) — this
//! module only hands back the winning, still-unread response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::config::{Profile, RouteHop, Strategy};
use crate::error::AppError;
use crate::pricing::PricingTable;
use crate::provider::{Dialect, ModelKind, Provider};
use crate::recorder::{Outcome, Recorder};
use crate::translate::{self, canonical::CanonicalRequest};

pub struct Router {
    http: reqwest::Client,
    round_robin: DashMap<String, AtomicUsize>,
}

/// What happened on one provider attempt, classified per §4.4 point 3.
enum AttemptOutcome {
    Success(reqwest::Response),
    Retryable(AppError),
    Terminal(AppError),
}

impl Router {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, round_robin: DashMap::new() })
    }

    /// Resolve the chain for `scenario`, then reorder its head per the
    /// profile's strategy. Failover order (the tail, and fallback on
    /// failure generally) is always the chain's written order.
    pub fn select_chain(&self, profile: &Profile, scenario_key: &str, rr_key: &str, recorder: &Recorder, pricing: &PricingTable, providers: &HashMap<String, Provider>) -> Vec<RouteHop> {
        let mut chain = profile.chain_for(scenario_key);
        if chain.len() <= 1 {
            return chain;
        }
        match profile.strategy {
            Strategy::Failover => chain,
            Strategy::RoundRobin => {
                let counter = self.round_robin.entry(rr_key.to_string()).or_insert_with(|| AtomicUsize::new(0));
                let pick = counter.fetch_add(1, Ordering::Relaxed) % chain.len();
                let hop = chain.remove(pick);
                chain.insert(0, hop);
                chain
            }
            Strategy::LeastLatency => {
                let best = (0..chain.len()).min_by_key(|&i| {
                    recorder.p50_latency_ms(&chain[i].provider).unwrap_or(u64::MAX)
                });
                if let Some(i) = best {
                    let hop = chain.remove(i);
                    chain.insert(0, hop);
                }
                chain
            }
            Strategy::LeastCost => {
                let best = (0..chain.len()).min_by(|&a, &b| {
                    let price_a = providers
                        .get(&chain[a].provider)
                        .map(|p| pricing.price_for(p.default_model.as_str()))
                        .flatten();
                    let price_b = providers
                        .get(&chain[b].provider)
                        .map(|p| pricing.price_for(p.default_model.as_str()))
                        .flatten();
                    let score = |p: Option<crate::config::ModelPrice>| {
                        p.map(|p| p.input_per_million + p.output_per_million).unwrap_or(f64::MAX)
                    };
                    score(price_a).partial_cmp(&score(price_b)).unwrap_or(std::cmp::Ordering::Equal)
                });
                if let Some(i) = best {
                    let hop = chain.remove(i);
                    chain.insert(0, hop);
                }
                chain
            }
        }
    }

    /// Model override resolution order (§4.4, expanded in SPEC_FULL §4.4):
    /// (1) the hop's own override, (2) the provider's alias for the
    /// requested semantic model kind, (3) the provider's default model.
    pub fn resolve_model(provider: &Provider, hop: &RouteHop, requested_model: &str) -> String {
        if let Some(m) = &hop.model {
            return m.clone();
        }
        provider.resolve_model(ModelKind::infer(requested_model)).to_string()
    }

    async fn attempt(&self, provider: &Provider, body: &Value, stream: bool, idle_timeout: Duration) -> AttemptOutcome {
        let path = match provider.dialect() {
            Dialect::Anthropic => "v1/messages",
            Dialect::OpenAi => "v1/chat/completions",
        };
        let url = provider.url_for(path);
        let (auth_name, auth_value) = provider.auth_header();

        let mut builder = self.http.post(&url).header(auth_name, auth_value).header("content-type", "application/json");
        if provider.dialect() == Dialect::Anthropic {
            builder = builder.header("anthropic-version", translate::anthropic::ANTHROPIC_VERSION);
        }
        if !stream {
            builder = builder.timeout(idle_timeout);
        }

        let response = match builder.json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                let app_err = AppError::Transport { provider: provider.name.clone(), source: anyhow::Error::new(e) };
                return AttemptOutcome::Retryable(app_err);
            }
        };

        let status = response.status().as_u16();
        match status {
            200..=299 => AttemptOutcome::Success(response),
            502 | 503 | 504 => {
                AttemptOutcome::Retryable(AppError::UpstreamServerError { provider: provider.name.clone(), status })
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let body = response.json::<Value>().await.unwrap_or(Value::Null);
                let err = AppError::UpstreamRateLimited { provider: provider.name.clone(), retry_after, body };
                if err.is_retryable() {
                    AttemptOutcome::Retryable(err)
                } else {
                    AttemptOutcome::Terminal(err)
                }
            }
            _ => {
                let body = response.json::<Value>().await.unwrap_or(Value::Null);
                AttemptOutcome::Terminal(AppError::UpstreamClientError { provider: provider.name.clone(), status, body })
            }
        }
    }

    /// Walk the chain for a non-streaming request, translating the request
    /// body into each candidate's dialect and the winning response back
    /// into the client's dialect.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch_nonstream(
        &self,
        chain: &[RouteHop],
        providers: &HashMap<String, Provider>,
        client_dialect: Dialect,
        req: &CanonicalRequest,
        recorder: &Recorder,
        idle_timeout: Duration,
    ) -> Result<NonStreamOutcome, (AppError, Vec<String>)> {
        let mut attempted = Vec::new();
        for (i, hop) in chain.iter().enumerate() {
            let Some(provider) = providers.get(&hop.provider) else { continue };
            attempted.push(provider.name.clone());

            let mut translated = req.clone();
            translated.model = Self::resolve_model(provider, hop, &req.model);
            let body = translate::encode_request(provider.dialect(), &translated);

            let started = Instant::now();
            let outcome = self.attempt(provider, &body, false, idle_timeout).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                AttemptOutcome::Success(response) => {
                    recorder.observe_attempt(&provider.name, Outcome::Success, latency_ms);
                    let body: Value = match response.json().await {
                        Ok(v) => v,
                        Err(e) => {
                            return Err((
                                AppError::Translation(format!("invalid JSON from {}: {e}", provider.name)),
                                attempted,
                            ))
                        }
                    };
                    let canonical = match translate::decode_response(provider.dialect(), &body) {
                        Ok(c) => c,
                        Err(e) => {
                            return Err((AppError::Translation(e.to_string()), attempted));
                        }
                    };
                    let client_body = translate::encode_response(client_dialect, &canonical);
                    return Ok(NonStreamOutcome {
                        winning_provider: provider.name.clone(),
                        attempted_providers: attempted,
                        latency_ms,
                        canonical_response: canonical,
                        client_body,
                    });
                }
                AttemptOutcome::Retryable(err) => {
                    recorder.observe_attempt(&provider.name, Outcome::Failure, latency_ms);
                    if i == chain.len() - 1 {
                        return Err((err, attempted));
                    }
                    continue;
                }
                AttemptOutcome::Terminal(err) => {
                    recorder.observe_attempt(&provider.name, Outcome::Failure, latency_ms);
                    return Err((err, attempted));
                }
            }
        }
        Err((AppError::Config("provider chain exhausted with no candidates".into()), attempted))
    }

    /// Walk the chain until one provider accepts the streaming request
    /// (HTTP headers received with a 2xx status); hands the live response
    /// back to the caller for `relay.rs` to pipe. No bytes are read from the
    /// body here, so failover remains possible across every hop.
    pub async fn dispatch_stream_start(
        &self,
        chain: &[RouteHop],
        providers: &HashMap<String, Provider>,
        req: &CanonicalRequest,
        recorder: &Recorder,
    ) -> Result<StreamHandoff, (AppError, Vec<String>)> {
        let mut attempted = Vec::new();
        for (i, hop) in chain.iter().enumerate() {
            let Some(provider) = providers.get(&hop.provider) else { continue };
            attempted.push(provider.name.clone());

            let mut translated = req.clone();
            translated.model = Self::resolve_model(provider, hop, &req.model);
            translated.stream = true;
            let body = translate::encode_request(provider.dialect(), &translated);

            let started = Instant::now();
            // No per-request timeout on the streaming path — idle/total
            // ceilings are enforced by the relay, not by reqwest (§5).
            let outcome = self.attempt(provider, &body, true, Duration::from_secs(0)).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                AttemptOutcome::Success(response) => {
                    recorder.observe_attempt(&provider.name, Outcome::Success, latency_ms);
                    return Ok(StreamHandoff {
                        provider: provider.clone(),
                        resolved_model: translated.model,
                        response,
                        attempted_providers: attempted,
                        started: Instant::now(),
                    });
                }
                AttemptOutcome::Retryable(err) => {
                    recorder.observe_attempt(&provider.name, Outcome::Failure, latency_ms);
                    if i == chain.len() - 1 {
                        return Err((err, attempted));
                    }
                    continue;
                }
                AttemptOutcome::Terminal(err) => {
                    recorder.observe_attempt(&provider.name, Outcome::Failure, latency_ms);
                    return Err((err, attempted));
                }
            }
        }
        Err((AppError::Config("provider chain exhausted with no candidates".into()), attempted))
    }
}

pub struct NonStreamOutcome {
    pub winning_provider: String,
    pub attempted_providers: Vec<String>,
    pub latency_ms: u64,
    pub canonical_response: crate::translate::canonical::CanonicalResponse,
    pub client_body: Value,
}

pub struct StreamHandoff {
    pub provider: Provider,
    pub resolved_model: String,
    pub response: reqwest::Response,
    pub attempted_providers: Vec<String>,
    pub started: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use std::collections::HashMap;

    fn profile(providers: Vec<&str>, strategy: Strategy) -> Profile {
        Profile {
            name: "default".into(),
            providers: providers.into_iter().map(String::from).collect(),
            routing: HashMap::new(),
            long_context_threshold: 32_000,
            strategy,
        }
    }

    #[test]
    fn failover_strategy_never_reorders() {
        let router = Router::new().unwrap();
        let recorder = Recorder::new(10, 10, None);
        let pricing = PricingTable::new(&HashMap::new());
        let p = profile(vec!["p1", "p2", "p3"], Strategy::Failover);
        let chain = router.select_chain(&p, "default", "k", &recorder, &pricing, &HashMap::new());
        assert_eq!(chain.iter().map(|h| h.provider.clone()).collect::<Vec<_>>(), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn round_robin_advances_on_each_call() {
        let router = Router::new().unwrap();
        let recorder = Recorder::new(10, 10, None);
        let pricing = PricingTable::new(&HashMap::new());
        let p = profile(vec!["p1", "p2", "p3"], Strategy::RoundRobin);
        let first = router.select_chain(&p, "default", "k", &recorder, &pricing, &HashMap::new());
        let second = router.select_chain(&p, "default", "k", &recorder, &pricing, &HashMap::new());
        assert_ne!(first[0].provider, second[0].provider);
    }

    #[test]
    fn least_latency_picks_the_lowest_p50() {
        let router = Router::new().unwrap();
        let recorder = Recorder::new(10, 10, None);
        recorder.observe_attempt("p1", Outcome::Success, 500);
        recorder.observe_attempt("p2", Outcome::Success, 10);
        let pricing = PricingTable::new(&HashMap::new());
        let p = profile(vec!["p1", "p2"], Strategy::LeastLatency);
        let chain = router.select_chain(&p, "default", "k", &recorder, &pricing, &HashMap::new());
        assert_eq!(chain[0].provider, "p2");
    }

    #[test]
    fn model_override_hop_beats_semantic_alias() {
        let provider = Provider {
            name: "p1".into(),
            dialect: Dialect::Anthropic,
            base_url: "https://x".into(),
            credential: "k".into(),
            default_model: "claude-default".into(),
            reasoning_model: None,
            haiku_model: None,
            opus_model: Some("claude-opus-alias".into()),
            sonnet_model: None,
        };
        let hop = RouteHop { provider: "p1".into(), model: Some("explicit-override".into()) };
        assert_eq!(Router::resolve_model(&provider, &hop, "claude-opus-4"), "explicit-override");

        let hop_no_override = RouteHop { provider: "p1".into(), model: None };
        assert_eq!(Router::resolve_model(&provider, &hop_no_override, "claude-opus-4"), "claude-opus-alias");
    }

    // -- end-to-end dispatch, against a wiremock stand-in upstream --

    use crate::translate::canonical::{CanonicalMessage, CanonicalRequest, ContentBlock, Role};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mock_provider(name: &str, dialect: Dialect, base_url: &str) -> Provider {
        Provider {
            name: name.into(),
            dialect,
            base_url: base_url.into(),
            credential: "test-credential".into(),
            default_model: "model-default".into(),
            reasoning_model: None,
            haiku_model: None,
            opus_model: None,
            sonnet_model: None,
        }
    }

    fn ping_request() -> CanonicalRequest {
        CanonicalRequest {
            model: "model-default".into(),
            system: None,
            messages: vec![CanonicalMessage { role: Role::User, content: vec![ContentBlock::Text { text: "ping".into() }] }],
            max_tokens: 16,
            temperature: None,
            stream: false,
            tools: vec![],
            tool_choice: None,
            thinking: None,
            metadata: None,
        }
    }

    fn anthropic_response_body() -> serde_json::Value {
        json!({
            "id": "msg_1", "type": "message", "role": "assistant", "model": "model-default",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 2},
        })
    }

    #[tokio::test]
    async fn text_passthrough_same_dialect_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response_body()))
            .mount(&server)
            .await;

        let provider = mock_provider("anthropic-direct", Dialect::Anthropic, &server.uri());
        let providers = HashMap::from([(provider.name.clone(), provider.clone())]);
        let chain = vec![RouteHop { provider: provider.name.clone(), model: None }];
        let recorder = Recorder::new(10, 10, None);

        let router = Router::new().unwrap();
        let outcome = router
            .dispatch_nonstream(&chain, &providers, Dialect::Anthropic, &ping_request(), &recorder, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.winning_provider, "anthropic-direct");
        assert_eq!(outcome.client_body["content"][0]["text"], "pong");
        assert_eq!(outcome.client_body["usage"]["output_tokens"], 2);
    }

    #[tokio::test]
    async fn dialect_translation_through_openai_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl_1", "model": "model-default",
                "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2},
            })))
            .mount(&server)
            .await;

        let provider = mock_provider("openai-direct", Dialect::OpenAi, &server.uri());
        let providers = HashMap::from([(provider.name.clone(), provider.clone())]);
        let chain = vec![RouteHop { provider: provider.name.clone(), model: None }];
        let recorder = Recorder::new(10, 10, None);

        // Client speaks Anthropic; the only configured provider speaks OpenAI,
        // so both the request and the response cross dialects.
        let router = Router::new().unwrap();
        let outcome = router
            .dispatch_nonstream(&chain, &providers, Dialect::Anthropic, &ping_request(), &recorder, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.client_body["content"][0]["text"], "pong");
        assert_eq!(outcome.client_body["stop_reason"], "end_turn");
    }

    #[tokio::test]
    async fn failover_advances_past_a_503_to_the_next_hop() {
        let down = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        let up = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response_body()))
            .mount(&up)
            .await;

        let p1 = mock_provider("flaky", Dialect::Anthropic, &down.uri());
        let p2 = mock_provider("stable", Dialect::Anthropic, &up.uri());
        let providers = HashMap::from([(p1.name.clone(), p1.clone()), (p2.name.clone(), p2.clone())]);
        let chain = vec![RouteHop { provider: p1.name.clone(), model: None }, RouteHop { provider: p2.name.clone(), model: None }];
        let recorder = Recorder::new(10, 10, None);

        let router = Router::new().unwrap();
        let outcome = router
            .dispatch_nonstream(&chain, &providers, Dialect::Anthropic, &ping_request(), &recorder, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.winning_provider, "stable");
        assert_eq!(outcome.attempted_providers, vec!["flaky", "stable"]);
    }

    #[tokio::test]
    async fn client_error_is_terminal_even_with_hops_remaining() {
        let bad = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {"message": "bad request"}})))
            .mount(&bad)
            .await;
        let never_called = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_response_body()))
            .mount(&never_called)
            .await;

        let p1 = mock_provider("rejects", Dialect::Anthropic, &bad.uri());
        let p2 = mock_provider("backup", Dialect::Anthropic, &never_called.uri());
        let providers = HashMap::from([(p1.name.clone(), p1.clone()), (p2.name.clone(), p2.clone())]);
        let chain = vec![RouteHop { provider: p1.name.clone(), model: None }, RouteHop { provider: p2.name.clone(), model: None }];
        let recorder = Recorder::new(10, 10, None);

        let router = Router::new().unwrap();
        let (err, attempted) = router
            .dispatch_nonstream(&chain, &providers, Dialect::Anthropic, &ping_request(), &recorder, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(attempted, vec!["rejects"]); // backup was never attempted
    }

    #[test]
    fn long_context_classification_routes_to_its_dedicated_chain() {
        let mut req = ping_request();
        req.messages[0].content = vec![ContentBlock::Text { text: "x".repeat(6_000) }];
        assert_eq!(crate::scenario::estimate_tokens(&req), 1_500);

        let mut profile = profile(vec!["default-provider"], Strategy::Failover);
        profile.long_context_threshold = 1_000;
        profile.routing.insert("longContext".into(), vec![RouteHop { provider: "long-context-provider".into(), model: None }]);

        let scenario = crate::scenario::classify(&req, profile.long_context_threshold);
        assert_eq!(scenario, crate::scenario::Scenario::LongContext);

        let router = Router::new().unwrap();
        let recorder = Recorder::new(10, 10, None);
        let pricing = PricingTable::new(&HashMap::new());
        let chain = router.select_chain(&profile, scenario.route_key(), "k", &recorder, &pricing, &HashMap::new());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].provider, "long-context-provider");
    }
}
