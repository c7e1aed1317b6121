//! Canonical request/response/event shapes, independent of wire dialect.
//!
//! Both `anthropic` and `openai` convert to and from these types; nothing
//! else in the crate ever touches a dialect-specific JSON shape directly.
//! This is the "sum type `Dialect` plus pure conversion functions" design
//! named in the design notes, applied to both the non-streaming bodies and
//! the streaming event sequence.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. `ToolResult`/`Tool` messages are Anthropic's
/// way of representing what OpenAI spells as a dedicated `role: tool`
/// message — the conversion happens during request translation (§4.2), not
/// here.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// `media_type` + base64 `data`, or a bare `url` when the source passed
    /// one through unchanged.
    Image {
        media_type: Option<String>,
        data: String,
        is_url: bool,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: Option<u32>,
}

/// A request, normalised out of whichever dialect the client spoke.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub stream: bool,
    pub tools: Vec<ToolDef>,
    pub tool_choice: Option<ToolChoice>,
    pub thinking: Option<ThinkingConfig>,
    /// Opaque passthrough bag — carries things like `metadata.background`
    /// that the classifier inspects but the translator otherwise ignores.
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    /// Used only for the synthetic terminal event emitted when an upstream
    /// stream ends before a real terminal event arrived (§4.2 edge cases).
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// What kind of content block a `ContentBlockStart` event opens.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStartKind {
    Text,
    ToolUse { id: String, name: String },
    Thinking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    Text(String),
    /// A fragment of a tool call's JSON-encoded arguments.
    InputJson(String),
    Thinking(String),
}

/// One step of the streaming state machine, dialect-independent.
///
/// The forwarder/observer split (§5) passes these between tasks; encoding to
/// either wire dialect is a pure, stateless-per-event function except for
/// bookkeeping each encoder keeps about chunk indices (see `stream.rs`).
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    MessageStart { id: String, model: String, usage: Usage },
    ContentBlockStart { index: usize, kind: BlockStartKind },
    ContentBlockDelta { index: usize, delta: ContentDelta },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: StopReason, usage: Usage },
    MessageStop,
}
