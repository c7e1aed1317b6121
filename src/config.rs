//! On-disk configuration: providers, profiles, and the gateway-wide knobs.
//!
//! Loaded once at startup from a single JSON document (`<config_file>`, see
//! the filesystem layout) and held behind an [`RwLock<Arc<Config>>`] snapshot
//! pointer so every in-flight request sees one consistent, immutable
//! [`Config`] for its entire lifetime — a background task polls the file's
//! mtime and swaps the pointer on change.
//!
//! This document is a small, read-only slice of the schema the external
//! config store actually writes (legacy migration, field masking, project
//! bindings, and so on live entirely in that store). Unknown top-level keys
//! and unknown fields on every struct are ignored rather than rejected.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::provider::Provider;

/// Non-failover strategies only affect the primary pick within a chain; the
/// tail (and all of failover) always proceeds in the chain's written order.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Failover,
    RoundRobin,
    LeastLatency,
    LeastCost,
}

/// One `(provider_name, optional_model_override)` entry in a scenario route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteHop {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_long_context_threshold() -> u32 {
    32_000
}

/// Named, ordered chain of providers plus optional scenario routes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub name: String,
    /// The default chain, used when no scenario-specific route applies.
    pub providers: Vec<String>,
    /// Scenario name (`think`, `image`, `longContext`, `background`,
    /// `webSearch`) → ordered chain, overriding `providers` for that
    /// scenario only. `default` is never a valid key here.
    #[serde(default)]
    pub routing: HashMap<String, Vec<RouteHop>>,
    #[serde(default = "default_long_context_threshold")]
    pub long_context_threshold: u32,
    #[serde(default)]
    pub strategy: Strategy,
}

impl Profile {
    /// Resolve the chain for a classified scenario, falling back to the
    /// default `providers` chain when no route is configured for it.
    pub fn chain_for(&self, scenario: &str) -> Vec<RouteHop> {
        self.routing.get(scenario).cloned().unwrap_or_else(|| {
            self.providers
                .iter()
                .map(|p| RouteHop { provider: p.clone(), model: None })
                .collect()
        })
    }
}

/// Per-million-token price overrides, keyed by model name.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

fn default_proxy_port() -> u16 {
    19841
}

fn default_web_port() -> u16 {
    19840
}

fn default_session_capacity() -> usize {
    1024
}

fn default_temp_profile_capacity() -> usize {
    128
}

fn default_usage_channel_capacity() -> usize {
    4096
}

fn default_health_window() -> usize {
    200
}

fn default_log_level() -> String {
    "zen_router=info,tower_http=warn".to_string()
}

/// Gateway-wide knobs that aren't tied to any one provider or profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
    #[serde(default = "default_temp_profile_capacity")]
    pub temp_profile_capacity: usize,
    #[serde(default = "default_usage_channel_capacity")]
    pub usage_channel_capacity: usize,
    #[serde(default = "default_health_window")]
    pub health_window: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub default_profile: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            proxy_port: default_proxy_port(),
            web_port: default_web_port(),
            session_capacity: default_session_capacity(),
            temp_profile_capacity: default_temp_profile_capacity(),
            usage_channel_capacity: default_usage_channel_capacity(),
            health_window: default_health_window(),
            log_level: default_log_level(),
            default_profile: "default".to_string(),
        }
    }
}

/// The full, validated config document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySettings,
    pub providers: HashMap<String, Provider>,
    pub profiles: HashMap<String, Profile>,
    #[serde(default)]
    pub pricing_overrides: HashMap<String, ModelPrice>,
}

impl Config {
    /// Parse and validate a config document from its JSON text.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file path on disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        Self::parse(&text)
    }

    /// Every reference the document makes to itself must resolve: profile
    /// chains and routes name real providers, and `default_profile` names a
    /// real profile.
    fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("config declares no providers");
        }
        if self.profiles.is_empty() {
            anyhow::bail!("config declares no profiles");
        }
        if !self.profiles.contains_key(&self.gateway.default_profile) {
            anyhow::bail!(
                "gateway.default_profile '{}' is not a configured profile",
                self.gateway.default_profile
            );
        }
        for (pname, profile) in &self.profiles {
            for provider in &profile.providers {
                if !self.providers.contains_key(provider) {
                    anyhow::bail!("profile '{pname}' references unknown provider '{provider}'");
                }
            }
            for (scenario, hops) in &profile.routing {
                if hops.is_empty() {
                    anyhow::bail!("profile '{pname}' route '{scenario}' has an empty chain");
                }
                for hop in hops {
                    if !self.providers.contains_key(&hop.provider) {
                        anyhow::bail!(
                            "profile '{pname}' route '{scenario}' references unknown provider '{}'",
                            hop.provider
                        );
                    }
                }
            }
        }
        for (name, provider) in &self.providers {
            if provider.base_url.trim().is_empty() {
                anyhow::bail!("provider '{name}' has an empty base_url");
            }
            if provider.credential.trim().is_empty() {
                anyhow::bail!("provider '{name}' has an empty credential");
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn provider(&self, name: &str) -> Option<&Provider> {
        self.providers.get(name)
    }

    pub fn default_profile(&self) -> &Profile {
        self.profiles
            .get(&self.gateway.default_profile)
            .expect("validate() guarantees default_profile resolves")
    }
}

/// Atomic-swap holder for the live config snapshot, mirroring the
/// `RwLock<Arc<Config>>` the rest of the request path reads through.
pub struct ConfigStore {
    path: PathBuf,
    inner: RwLock<Arc<Config>>,
    last_mtime: RwLock<Option<SystemTime>>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let cfg = Config::load(&path)?;
        let mtime = std::fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        Ok(Self {
            path,
            inner: RwLock::new(Arc::new(cfg)),
            last_mtime: RwLock::new(mtime),
        })
    }

    pub async fn current(&self) -> Arc<Config> {
        self.inner.read().await.clone()
    }

    /// Re-read the file if its mtime advanced since the last check; swap the
    /// snapshot pointer on success. Parse/validate failures are logged and
    /// leave the current snapshot in place — a typo mid-edit must never take
    /// the daemon down.
    pub async fn poll_reload(&self) {
        let mtime = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config stat failed");
                return;
            }
        };
        {
            let last = self.last_mtime.read().await;
            if *last == Some(mtime) {
                return;
            }
        }
        match Config::load(&self.path) {
            Ok(cfg) => {
                *self.inner.write().await = Arc::new(cfg);
                *self.last_mtime.write().await = Some(mtime);
                tracing::info!(path = %self.path.display(), "config reloaded");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config reload failed, keeping previous snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        r#"{
            "gateway": { "default_profile": "default" },
            "providers": {
                "p1": {
                    "name": "p1",
                    "dialect": "anthropic",
                    "base_url": "https://api.anthropic.example/",
                    "credential": "sk-ant-test",
                    "default_model": "claude-default"
                },
                "p2": {
                    "name": "p2",
                    "dialect": "openai",
                    "base_url": "https://api.openai.example/",
                    "credential": "sk-oai-test",
                    "default_model": "gpt-default"
                }
            },
            "profiles": {
                "default": {
                    "name": "default",
                    "providers": ["p1", "p2"],
                    "routing": {
                        "longContext": [{"provider": "p2"}]
                    }
                }
            }
        }"#
        .to_string()
    }

    #[test]
    fn parses_minimal_valid_config() {
        let cfg = Config::parse(&sample_json()).unwrap();
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.gateway.proxy_port, 19841);
        assert_eq!(cfg.default_profile().name, "default");
    }

    #[test]
    fn chain_for_unmapped_scenario_falls_back_to_default_chain() {
        let cfg = Config::parse(&sample_json()).unwrap();
        let profile = cfg.default_profile();
        let chain = profile.chain_for("think");
        assert_eq!(chain.iter().map(|h| h.provider.clone()).collect::<Vec<_>>(), vec!["p1", "p2"]);
    }

    #[test]
    fn chain_for_mapped_scenario_uses_route() {
        let cfg = Config::parse(&sample_json()).unwrap();
        let profile = cfg.default_profile();
        let chain = profile.chain_for("longContext");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].provider, "p2");
    }

    #[test]
    fn rejects_profile_referencing_unknown_provider() {
        let mut bad = sample_json();
        bad = bad.replace(r#""providers": ["p1", "p2"]"#, r#""providers": ["p1", "ghost"]"#);
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn rejects_unknown_default_profile() {
        let mut bad = sample_json();
        bad = bad.replace(r#""default_profile": "default""#, r#""default_profile": "nope""#);
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn tolerates_unknown_top_level_and_field_keys() {
        let with_extra = sample_json().replacen(
            '{',
            r#"{"unknown_top_level_key": 1, "#,
            1,
        );
        assert!(Config::parse(&with_extra).is_ok());
    }
}
