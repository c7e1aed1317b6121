//! Classifies a canonical request into one of six scenarios (C3), used by
//! the router to pick which chain of providers to try.
//!
//! Deliberately cheap: token estimation never calls a real tokenizer (§4.3).

use crate::translate::canonical::{CanonicalRequest, ContentBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Default,
    Think,
    Image,
    LongContext,
    Background,
    WebSearch,
}

impl Scenario {
    /// The key used to look up a profile's `routing` map.
    pub fn route_key(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Think => "think",
            Self::Image => "image",
            Self::LongContext => "longContext",
            Self::Background => "background",
            Self::WebSearch => "webSearch",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.route_key())
    }
}

/// Sum of `len(text)/4` (floor) over every text block in system + messages,
/// plus 200 per image block.
pub fn estimate_tokens(req: &CanonicalRequest) -> u32 {
    let mut total: u64 = 0;
    if let Some(system) = &req.system {
        total += system.len() as u64 / 4;
    }
    for message in &req.messages {
        for block in &message.content {
            match block {
                ContentBlock::Text { text } => total += text.len() as u64 / 4,
                ContentBlock::Image { .. } => total += 200,
                ContentBlock::ToolResult { content, .. } => total += content.len() as u64 / 4,
                ContentBlock::ToolUse { input, .. } => total += input.to_string().len() as u64 / 4,
                ContentBlock::Thinking { text } => total += text.len() as u64 / 4,
            }
        }
    }
    total.min(u32::MAX as u64) as u32
}

fn has_image_block(req: &CanonicalRequest) -> bool {
    req.messages
        .iter()
        .flat_map(|m| &m.content)
        .any(|b| matches!(b, ContentBlock::Image { .. }))
}

fn requests_web_search(req: &CanonicalRequest) -> bool {
    if req.tools.iter().any(|t| t.name.contains("web_search")) {
        return true;
    }
    req.metadata
        .as_ref()
        .and_then(|m| m.get("enable_web_search"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

fn wants_thinking(req: &CanonicalRequest) -> bool {
    match &req.thinking {
        Some(t) => t.enabled && t.budget_tokens.unwrap_or(0) > 0,
        None => false,
    }
}

fn is_background(req: &CanonicalRequest) -> bool {
    req.metadata
        .as_ref()
        .and_then(|m| m.get("background"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Classify a request, evaluated in the order the rules are listed — first
/// match wins.
pub fn classify(req: &CanonicalRequest, long_context_threshold: u32) -> Scenario {
    if has_image_block(req) {
        return Scenario::Image;
    }
    if requests_web_search(req) {
        return Scenario::WebSearch;
    }
    if wants_thinking(req) {
        return Scenario::Think;
    }
    if estimate_tokens(req) >= long_context_threshold {
        return Scenario::LongContext;
    }
    if is_background(req) {
        return Scenario::Background;
    }
    Scenario::Default
}
