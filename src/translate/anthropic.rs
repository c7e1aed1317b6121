//! Anthropic Messages wire shape ⇄ canonical (§4.2 shape A), non-streaming
//! bodies plus the SSE encoding/decoding of the streaming state machine's
//! events on the Anthropic side.

use serde_json::{json, Value};

use super::canonical::*;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8_192;

fn role_str(r: Role) -> &'static str {
    match r {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System | Role::Tool => "user", // never reached: see to_canonical/from_canonical
    }
}

fn parse_role(s: &str) -> anyhow::Result<Role> {
    match s {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => anyhow::bail!("unexpected anthropic message role '{other}'"),
    }
}

fn block_to_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
        ContentBlock::Image { media_type, data, is_url } => {
            if *is_url {
                json!({ "type": "image", "source": { "type": "url", "url": data } })
            } else {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type.clone().unwrap_or_default(),
                        "data": data,
                    }
                })
            }
        }
        ContentBlock::ToolUse { id, name, input } => {
            json!({ "type": "tool_use", "id": id, "name": name, "input": input })
        }
        ContentBlock::ToolResult { tool_use_id, content, is_error } => {
            let mut v = json!({
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": content,
            });
            if *is_error {
                v["is_error"] = json!(true);
            }
            v
        }
        ContentBlock::Thinking { text } => json!({ "type": "thinking", "thinking": text }),
    }
}

fn block_from_json(v: &Value) -> anyhow::Result<ContentBlock> {
    let ty = v.get("type").and_then(Value::as_str).unwrap_or("text");
    match ty {
        "text" => Ok(ContentBlock::Text {
            text: v.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        }),
        "image" => {
            let source = v.get("source").cloned().unwrap_or(Value::Null);
            if source.get("type").and_then(Value::as_str) == Some("url") {
                Ok(ContentBlock::Image {
                    media_type: None,
                    data: source.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                    is_url: true,
                })
            } else {
                Ok(ContentBlock::Image {
                    media_type: source.get("media_type").and_then(Value::as_str).map(String::from),
                    data: source.get("data").and_then(Value::as_str).unwrap_or_default().to_string(),
                    is_url: false,
                })
            }
        }
        "tool_use" => Ok(ContentBlock::ToolUse {
            id: v.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: v.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            input: v.get("input").cloned().unwrap_or(json!({})),
        }),
        "tool_result" => {
            let content = match v.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(blocks)) => blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(""),
                _ => String::new(),
            };
            Ok(ContentBlock::ToolResult {
                tool_use_id: v.get("tool_use_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                content,
                is_error: v.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            })
        }
        "thinking" => Ok(ContentBlock::Thinking {
            text: v.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string(),
        }),
        other => anyhow::bail!("unsupported anthropic content block type '{other}'"),
    }
}

/// Parse an Anthropic `/v1/messages` request body into canonical form.
pub fn to_canonical(body: &Value) -> anyhow::Result<CanonicalRequest> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing 'model'"))?
        .to_string();

    let system = match body.get("system") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(blocks)) => {
            let text: String = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n\n");
            if text.is_empty() { None } else { Some(text) }
        }
        _ => None,
    };

    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("missing 'messages'"))?;

    let mut messages = Vec::with_capacity(raw_messages.len());
    for m in raw_messages {
        let role = parse_role(m.get("role").and_then(Value::as_str).unwrap_or("user"))?;
        let content = match m.get("content") {
            Some(Value::String(s)) => vec![ContentBlock::Text { text: s.clone() }],
            Some(Value::Array(blocks)) => {
                blocks.iter().map(block_from_json).collect::<anyhow::Result<Vec<_>>>()?
            }
            _ => vec![],
        };
        messages.push(CanonicalMessage { role, content });
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|t| ToolDef {
                    name: t.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    description: t.get("description").and_then(Value::as_str).map(String::from),
                    input_schema: t.get("input_schema").cloned().unwrap_or(json!({})),
                })
                .collect()
        })
        .unwrap_or_default();

    let tool_choice = body.get("tool_choice").map(|tc| match tc.get("type").and_then(Value::as_str) {
        Some("any") => ToolChoice::Any,
        Some("tool") => ToolChoice::Tool {
            name: tc.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        Some("none") => ToolChoice::None,
        _ => ToolChoice::Auto,
    });

    let thinking = body.get("thinking").map(|t| ThinkingConfig {
        enabled: t.get("type").and_then(Value::as_str) == Some("enabled"),
        budget_tokens: t.get("budget_tokens").and_then(Value::as_u64).map(|n| n as u32),
    });

    Ok(CanonicalRequest {
        model,
        system,
        messages,
        max_tokens: body.get("max_tokens").and_then(Value::as_u64).unwrap_or(DEFAULT_MAX_TOKENS as u64) as u32,
        temperature: body.get("temperature").and_then(Value::as_f64),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        tools,
        tool_choice,
        thinking,
        metadata: body.get("metadata").cloned(),
    })
}

/// Serialize a canonical request as an Anthropic `/v1/messages` body.
pub fn from_canonical(req: &CanonicalRequest) -> Value {
    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System) // system is hoisted to the top-level field elsewhere
        .map(|m| {
            json!({
                "role": role_str(m.role),
                "content": m.content.iter().map(block_to_json).collect::<Vec<_>>(),
            })
        })
        .collect();

    let mut out = json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });

    if let Some(sys) = &req.system {
        out["system"] = json!(sys);
    }
    if let Some(t) = req.temperature {
        out["temperature"] = json!(t);
    }
    if req.stream {
        out["stream"] = json!(true);
    }
    if !req.tools.is_empty() {
        out["tools"] = json!(req
            .tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "input_schema": t.input_schema }))
            .collect::<Vec<_>>());
    }
    if let Some(tc) = &req.tool_choice {
        out["tool_choice"] = match tc {
            ToolChoice::Auto => json!({ "type": "auto" }),
            ToolChoice::Any => json!({ "type": "any" }),
            ToolChoice::Tool { name } => json!({ "type": "tool", "name": name }),
            ToolChoice::None => json!({ "type": "none" }),
        };
    }
    if let Some(th) = &req.thinking {
        out["thinking"] = if th.enabled {
            json!({ "type": "enabled", "budget_tokens": th.budget_tokens })
        } else {
            json!({ "type": "disabled" })
        };
    }
    out
}

fn stop_reason_to_anthropic(r: StopReason) -> &'static str {
    match r {
        StopReason::EndTurn => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::ToolUse => "tool_use",
        StopReason::StopSequence => "stop_sequence",
        StopReason::Error => "error",
    }
}

fn stop_reason_from_anthropic(s: &str) -> StopReason {
    match s {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Parse a non-streaming Anthropic Messages response.
pub fn response_to_canonical(body: &Value) -> anyhow::Result<CanonicalResponse> {
    let content = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("missing 'content'"))?
        .iter()
        .map(block_from_json)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CanonicalResponse {
        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        content,
        stop_reason: stop_reason_from_anthropic(
            body.get("stop_reason").and_then(Value::as_str).unwrap_or("end_turn"),
        ),
        usage: Usage {
            input_tokens: body
                .get("usage")
                .and_then(|u| u.get("input_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            output_tokens: body
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        },
    })
}

/// Serialize a canonical response as Anthropic Messages shape.
pub fn response_from_canonical(resp: &CanonicalResponse) -> Value {
    json!({
        "id": resp.id,
        "type": "message",
        "role": "assistant",
        "model": resp.model,
        "content": resp.content.iter().map(block_to_json).collect::<Vec<_>>(),
        "stop_reason": stop_reason_to_anthropic(resp.stop_reason),
        "usage": {
            "input_tokens": resp.usage.input_tokens,
            "output_tokens": resp.usage.output_tokens,
        },
    })
}

/// Render one canonical streaming event as the Anthropic SSE frame(s) it
/// corresponds to (`event: <name>\ndata: <json>\n\n`). Anthropic names its
/// events explicitly via the `event:` line, unlike OpenAI's bare `data:`.
pub fn encode_event(event: &CanonicalEvent) -> String {
    let (name, data) = match event {
        CanonicalEvent::MessageStart { id, model, usage } => (
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": id, "type": "message", "role": "assistant", "model": model,
                    "content": [], "stop_reason": null,
                    "usage": { "input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens },
                }
            }),
        ),
        CanonicalEvent::ContentBlockStart { index, kind } => {
            let block = match kind {
                BlockStartKind::Text => json!({ "type": "text", "text": "" }),
                BlockStartKind::ToolUse { id, name } => {
                    json!({ "type": "tool_use", "id": id, "name": name, "input": {} })
                }
                BlockStartKind::Thinking => json!({ "type": "thinking", "thinking": "" }),
            };
            ("content_block_start", json!({ "type": "content_block_start", "index": index, "content_block": block }))
        }
        CanonicalEvent::ContentBlockDelta { index, delta } => {
            let delta_json = match delta {
                ContentDelta::Text(t) => json!({ "type": "text_delta", "text": t }),
                ContentDelta::InputJson(p) => json!({ "type": "input_json_delta", "partial_json": p }),
                ContentDelta::Thinking(t) => json!({ "type": "thinking_delta", "thinking": t }),
            };
            ("content_block_delta", json!({ "type": "content_block_delta", "index": index, "delta": delta_json }))
        }
        CanonicalEvent::ContentBlockStop { index } => {
            ("content_block_stop", json!({ "type": "content_block_stop", "index": index }))
        }
        CanonicalEvent::MessageDelta { stop_reason, usage } => (
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason_to_anthropic(*stop_reason), "stop_sequence": null },
                "usage": { "output_tokens": usage.output_tokens },
            }),
        ),
        CanonicalEvent::MessageStop => ("message_stop", json!({ "type": "message_stop" })),
    };
    format!("event: {name}\ndata: {data}\n\n")
}

/// Incrementally decodes raw Anthropic SSE bytes into canonical events.
///
/// Anthropic's framing is already close to 1:1 with [`CanonicalEvent`]; the
/// only state this decoder needs is a byte buffer for partial frames (an SSE
/// frame may arrive split across several upstream reads).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly-received bytes; returns every complete event now available.
    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<CanonicalEvent>> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find("\n\n") {
            let frame = self.buf[..pos].to_string();
            self.buf.drain(..pos + 2);
            if let Some(event) = parse_frame(&frame)? {
                out.push(event);
            }
        }
        Ok(out)
    }
}

fn parse_frame(frame: &str) -> anyhow::Result<Option<CanonicalEvent>> {
    let mut data_line = None;
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_line = Some(rest.trim().to_string());
        }
    }
    let Some(data) = data_line else { return Ok(None) };
    if data.is_empty() {
        return Ok(None);
    }
    let v: Value = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("malformed anthropic SSE payload: {e}"))?;
    let ty = v.get("type").and_then(Value::as_str).unwrap_or_default();
    let event = match ty {
        "message_start" => {
            let msg = v.get("message").cloned().unwrap_or(json!({}));
            let usage = msg.get("usage").cloned().unwrap_or(json!({}));
            CanonicalEvent::MessageStart {
                id: msg.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                model: msg.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
                usage: Usage {
                    input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                    output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                },
            }
        }
        "content_block_start" => {
            let index = v.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let block = v.get("content_block").cloned().unwrap_or(json!({}));
            let kind = match block.get("type").and_then(Value::as_str) {
                Some("tool_use") => BlockStartKind::ToolUse {
                    id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                    name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                },
                Some("thinking") => BlockStartKind::Thinking,
                _ => BlockStartKind::Text,
            };
            CanonicalEvent::ContentBlockStart { index, kind }
        }
        "content_block_delta" => {
            let index = v.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let delta = v.get("delta").cloned().unwrap_or(json!({}));
            let delta = match delta.get("type").and_then(Value::as_str) {
                Some("input_json_delta") => ContentDelta::InputJson(
                    delta.get("partial_json").and_then(Value::as_str).unwrap_or_default().to_string(),
                ),
                Some("thinking_delta") => ContentDelta::Thinking(
                    delta.get("thinking").and_then(Value::as_str).unwrap_or_default().to_string(),
                ),
                _ => ContentDelta::Text(
                    delta.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                ),
            };
            if matches!(&delta, ContentDelta::Text(t) | ContentDelta::InputJson(t) | ContentDelta::Thinking(t) if t.is_empty())
            {
                return Ok(None);
            }
            CanonicalEvent::ContentBlockDelta { index, delta }
        }
        "content_block_stop" => {
            CanonicalEvent::ContentBlockStop { index: v.get("index").and_then(Value::as_u64).unwrap_or(0) as usize }
        }
        "message_delta" => {
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(stop_reason_from_anthropic)
                .unwrap_or(StopReason::EndTurn);
            let output_tokens = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            CanonicalEvent::MessageDelta { stop_reason, usage: Usage { input_tokens: 0, output_tokens } }
        }
        "message_stop" => CanonicalEvent::MessageStop,
        _ => return Ok(None), // e.g. "ping" — not part of the canonical state machine
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoists_string_system_and_defaults_max_tokens() {
        let body = json!({
            "model": "claude-x",
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let req = to_canonical(&body).unwrap();
        assert_eq!(req.system.as_deref(), Some("be terse"));
        assert_eq!(req.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn concatenates_array_system_text_blocks() {
        let body = json!({
            "model": "m",
            "system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "messages": [],
            "max_tokens": 10
        });
        let req = to_canonical(&body).unwrap();
        assert_eq!(req.system.as_deref(), Some("a\n\nb"));
    }

    #[test]
    fn missing_model_is_an_error() {
        let body = json!({ "messages": [] });
        assert!(to_canonical(&body).is_err());
    }

    #[test]
    fn stop_reason_round_trips() {
        for (s, r) in [
            ("end_turn", StopReason::EndTurn),
            ("max_tokens", StopReason::MaxTokens),
            ("tool_use", StopReason::ToolUse),
            ("stop_sequence", StopReason::StopSequence),
        ] {
            assert_eq!(stop_reason_to_anthropic(stop_reason_from_anthropic(s)), stop_reason_to_anthropic(r));
        }
    }

    #[test]
    fn response_round_trip_preserves_text_and_usage() {
        let body = json!({
            "id": "msg_1", "model": "m",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let canonical = response_to_canonical(&body).unwrap();
        let back = response_from_canonical(&canonical);
        assert_eq!(back["content"][0]["text"], "pong");
        assert_eq!(back["usage"]["input_tokens"], 1);
    }

    #[test]
    fn sse_decoder_handles_split_frames() {
        let mut dec = SseDecoder::new();
        let whole = "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let (a, b) = whole.split_at(10);
        let mut events = dec.push(a.as_bytes()).unwrap();
        assert!(events.is_empty());
        events.extend(dec.push(b.as_bytes()).unwrap());
        assert_eq!(events, vec![CanonicalEvent::MessageStop]);
    }

    #[test]
    fn sse_decoder_skips_empty_text_deltas() {
        let mut dec = SseDecoder::new();
        let frame = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"\"}}\n\n";
        let events = dec.push(frame.as_bytes()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn encode_event_emits_named_sse_frame() {
        let frame = encode_event(&CanonicalEvent::MessageStop);
        assert!(frame.starts_with("event: message_stop\n"));
        assert!(frame.ends_with("\n\n"));
    }
}
