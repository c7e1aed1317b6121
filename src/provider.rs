//! In-memory representation of one upstream provider (C1).
//!
//! A [`Provider`] is built once from the config store's snapshot and handed
//! to the router as part of an immutable [`crate::config::Config`] — it never
//! changes for the lifetime of the request that's using it. Health is
//! tracked externally by [`crate::recorder`]; this module only knows how to
//! address the provider and resolve its model aliases.

use serde::{Deserialize, Serialize};

/// Which wire dialect a provider speaks.
///
/// The three client families named in the spec (an Anthropic-style client,
/// an OpenAI-style client, and a multi-provider client) all ultimately speak
/// one of these two shapes on the wire; the multi-provider client just picks
/// per request. See [`crate::translate`].
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    Anthropic,
    OpenAi,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        })
    }
}

/// Which semantic model slot a request is asking for.
///
/// The router resolves a client's requested model string to one of these
/// kinds, then asks the chosen [`Provider`] for its alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Default,
    Reasoning,
    Haiku,
    Opus,
    Sonnet,
}

impl ModelKind {
    /// Infer a model kind from a client-requested model string, by
    /// substring. Used by the router when no scenario-route model override
    /// applies (§4.4).
    pub fn infer(requested_model: &str) -> Self {
        let m = requested_model.to_ascii_lowercase();
        if m.contains("opus") {
            Self::Opus
        } else if m.contains("sonnet") {
            Self::Sonnet
        } else if m.contains("haiku") {
            Self::Haiku
        } else if m.contains("thinking") || m.contains("reasoning") || m.contains("o1") || m.contains("o3") {
            Self::Reasoning
        } else {
            Self::Default
        }
    }
}

/// One configured upstream provider.
///
/// Invariant: `base_url` and `credential` are non-empty (enforced by
/// [`crate::config::Config::validate`]). Every model alias falls back to
/// `default_model` when unset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Provider {
    /// Unique within the process.
    pub name: String,
    pub dialect: Dialect,
    pub base_url: String,
    /// Opaque secret — never logged or echoed back to a client.
    pub credential: String,
    pub default_model: String,
    #[serde(default)]
    pub reasoning_model: Option<String>,
    #[serde(default)]
    pub haiku_model: Option<String>,
    #[serde(default)]
    pub opus_model: Option<String>,
    #[serde(default)]
    pub sonnet_model: Option<String>,
}

impl Provider {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Join `base_url` with a relative API path, e.g. `v1/messages`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// The dialect-dependent auth header name and value.
    ///
    /// Anthropic uses `x-api-key`; OpenAI uses `Authorization: Bearer …`.
    /// `anthropic-version` is a second, fixed header the caller must add
    /// separately (see [`crate::translate::anthropic::ANTHROPIC_VERSION`])
    /// since it isn't credential-bearing.
    pub fn auth_header(&self) -> (&'static str, String) {
        match self.dialect {
            Dialect::Anthropic => ("x-api-key", self.credential.clone()),
            Dialect::OpenAi => ("authorization", format!("Bearer {}", self.credential)),
        }
    }

    /// Resolve a semantic model kind to this provider's concrete model name.
    pub fn resolve_model(&self, kind: ModelKind) -> &str {
        let alias = match kind {
            ModelKind::Default => None,
            ModelKind::Reasoning => self.reasoning_model.as_deref(),
            ModelKind::Haiku => self.haiku_model.as_deref(),
            ModelKind::Opus => self.opus_model.as_deref(),
            ModelKind::Sonnet => self.sonnet_model.as_deref(),
        };
        alias.unwrap_or(&self.default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Provider {
        Provider {
            name: "p1".into(),
            dialect: Dialect::Anthropic,
            base_url: "https://api.example.com/".into(),
            credential: "sk-test".into(),
            default_model: "claude-default".into(),
            reasoning_model: None,
            haiku_model: Some("claude-haiku".into()),
            opus_model: None,
            sonnet_model: None,
        }
    }

    #[test]
    fn url_for_joins_without_double_slash() {
        let p = provider();
        assert_eq!(p.url_for("/v1/messages"), "https://api.example.com/v1/messages");
        assert_eq!(p.url_for("v1/messages"), "https://api.example.com/v1/messages");
    }

    #[test]
    fn resolve_model_falls_back_to_default_when_alias_unset() {
        let p = provider();
        assert_eq!(p.resolve_model(ModelKind::Opus), "claude-default");
        assert_eq!(p.resolve_model(ModelKind::Haiku), "claude-haiku");
    }

    #[test]
    fn auth_header_differs_by_dialect() {
        let mut p = provider();
        let (name, value) = p.auth_header();
        assert_eq!(name, "x-api-key");
        assert_eq!(value, "sk-test");

        p.dialect = Dialect::OpenAi;
        let (name, value) = p.auth_header();
        assert_eq!(name, "authorization");
        assert_eq!(value, "Bearer sk-test");
    }

    #[test]
    fn model_kind_infers_from_requested_string() {
        assert_eq!(ModelKind::infer("claude-opus-4-5"), ModelKind::Opus);
        assert_eq!(ModelKind::infer("claude-3-5-sonnet"), ModelKind::Sonnet);
        assert_eq!(ModelKind::infer("claude-haiku-4-5"), ModelKind::Haiku);
        assert_eq!(ModelKind::infer("o3-mini"), ModelKind::Reasoning);
        assert_eq!(ModelKind::infer("gpt-4o"), ModelKind::Default);
    }
}
