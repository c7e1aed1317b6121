//! OpenAI Chat Completions wire shape ⇄ canonical (§4.2 shape O), plus the
//! OpenAI side of the streaming state machine.
//!
//! OpenAI's streaming framing is looser than Anthropic's — there is no
//! explicit block-start/stop, and a tool call's arguments arrive as bare
//! string fragments tagged only by an index. [`SseDecoder`] buffers each
//! tool call's fragments and only emits the canonical
//! `ContentBlockStart/Delta/Stop` triple once `finish_reason` confirms the
//! call is complete, per §4.2's O-source → A-sink direction.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::canonical::*;

const DEFAULT_MAX_TOKENS: u32 = 8_192;

fn finish_reason_to_stop_reason(s: &str) -> StopReason {
    match s {
        "length" => StopReason::MaxTokens,
        "tool_calls" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn stop_reason_to_finish_reason(r: StopReason) -> &'static str {
    match r {
        StopReason::MaxTokens => "length",
        StopReason::ToolUse => "tool_calls",
        StopReason::EndTurn | StopReason::StopSequence | StopReason::Error => "stop",
    }
}

fn block_from_openai_content_item(v: &Value) -> ContentBlock {
    match v.get("type").and_then(Value::as_str) {
        Some("image_url") => {
            let url = v
                .get("image_url")
                .and_then(|u| u.get("url"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(rest) = url.strip_prefix("data:") {
                if let Some((media_type, data)) = rest.split_once(";base64,") {
                    return ContentBlock::Image {
                        media_type: Some(media_type.to_string()),
                        data: data.to_string(),
                        is_url: false,
                    };
                }
            }
            ContentBlock::Image { media_type: None, data: url.to_string(), is_url: true }
        }
        _ => ContentBlock::Text {
            text: v.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
    }
}

/// Parse an OpenAI `/v1/chat/completions` request body into canonical form.
pub fn to_canonical(body: &Value) -> anyhow::Result<CanonicalRequest> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing 'model'"))?
        .to_string();

    let raw_messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("missing 'messages'"))?;

    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for m in raw_messages {
        let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
        match role {
            "system" | "developer" => {
                let text = match m.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join(""),
                    _ => String::new(),
                };
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            "tool" => {
                messages.push(CanonicalMessage {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: m.get("tool_call_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        content: match m.get("content") {
                            Some(Value::String(s)) => s.clone(),
                            other => other.map(|v| v.to_string()).unwrap_or_default(),
                        },
                        is_error: false,
                    }],
                });
            }
            "assistant" => {
                let mut content = Vec::new();
                match m.get("content") {
                    Some(Value::String(s)) if !s.is_empty() => content.push(ContentBlock::Text { text: s.clone() }),
                    Some(Value::Array(items)) => {
                        content.extend(items.iter().map(block_from_openai_content_item))
                    }
                    _ => {}
                }
                if let Some(calls) = m.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let func = call.get("function").cloned().unwrap_or(json!({}));
                        let args_str = func.get("arguments").and_then(Value::as_str).unwrap_or("{}");
                        let input = serde_json::from_str(args_str).unwrap_or(json!({}));
                        content.push(ContentBlock::ToolUse {
                            id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                            name: func.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                            input,
                        });
                    }
                }
                messages.push(CanonicalMessage { role: Role::Assistant, content });
            }
            _ => {
                let content = match m.get("content") {
                    Some(Value::String(s)) => vec![ContentBlock::Text { text: s.clone() }],
                    Some(Value::Array(items)) => items.iter().map(block_from_openai_content_item).collect(),
                    _ => vec![],
                };
                messages.push(CanonicalMessage { role: Role::User, content });
            }
        }
    }

    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.get("function"))
                .map(|f| ToolDef {
                    name: f.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    description: f.get("description").and_then(Value::as_str).map(String::from),
                    input_schema: f.get("parameters").cloned().unwrap_or(json!({})),
                })
                .collect()
        })
        .unwrap_or_default();

    let tool_choice = body.get("tool_choice").map(|tc| match tc {
        Value::String(s) if s == "none" => ToolChoice::None,
        Value::String(s) if s == "required" => ToolChoice::Any,
        Value::Object(_) => ToolChoice::Tool {
            name: tc
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        _ => ToolChoice::Auto,
    });

    let max_tokens = body
        .get("max_completion_tokens")
        .or_else(|| body.get("max_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TOKENS as u64) as u32;

    Ok(CanonicalRequest {
        model,
        system: if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) },
        messages,
        max_tokens,
        temperature: body.get("temperature").and_then(Value::as_f64),
        stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
        tools,
        tool_choice,
        thinking: None, // OpenAI has no equivalent of an explicit thinking budget
        metadata: body.get("metadata").cloned(),
    })
}

fn canonical_message_to_openai(msg: &CanonicalMessage) -> Vec<Value> {
    let mut out = Vec::new();
    match msg.role {
        Role::User => {
            let mut content_items = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::ToolResult { tool_use_id, content, .. } => {
                        out.push(json!({ "role": "tool", "tool_call_id": tool_use_id, "content": content }));
                    }
                    ContentBlock::Text { text } => content_items.push(json!({ "type": "text", "text": text })),
                    ContentBlock::Image { media_type, data, is_url } => {
                        let url = if *is_url {
                            data.clone()
                        } else {
                            format!("data:{};base64,{}", media_type.clone().unwrap_or_default(), data)
                        };
                        content_items.push(json!({ "type": "image_url", "image_url": { "url": url } }));
                    }
                    ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
                }
            }
            if !content_items.is_empty() {
                let content = if content_items.len() == 1 && content_items[0]["type"] == "text" {
                    content_items[0]["text"].clone()
                } else {
                    json!(content_items)
                };
                out.push(json!({ "role": "user", "content": content }));
            }
        }
        Role::Assistant => {
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text: t } => text.push_str(t),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    })),
                    ContentBlock::Thinking { .. } => {}
                    ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
                }
            }
            let mut msg_json = json!({ "role": "assistant" });
            msg_json["content"] = if text.is_empty() { Value::Null } else { json!(text) };
            if !tool_calls.is_empty() {
                msg_json["tool_calls"] = json!(tool_calls);
            }
            out.push(msg_json);
        }
        Role::System | Role::Tool => {}
    }
    out
}

/// Serialize a canonical request as an OpenAI `/v1/chat/completions` body.
pub fn from_canonical(req: &CanonicalRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(sys) = &req.system {
        messages.push(json!({ "role": "system", "content": sys }));
    }
    for m in &req.messages {
        messages.extend(canonical_message_to_openai(m));
    }

    let mut out = json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });
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
            .map(|t| json!({
                "type": "function",
                "function": { "name": t.name, "description": t.description, "parameters": t.input_schema },
            }))
            .collect::<Vec<_>>());
    }
    if let Some(tc) = &req.tool_choice {
        out["tool_choice"] = match tc {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Any => json!("required"),
            ToolChoice::Tool { name } => json!({ "type": "function", "function": { "name": name } }),
            ToolChoice::None => json!("none"),
        };
    }
    out
}

/// Parse a non-streaming OpenAI chat completion response.
pub fn response_to_canonical(body: &Value) -> anyhow::Result<CanonicalResponse> {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .ok_or_else(|| anyhow::anyhow!("missing 'choices[0]'"))?;
    let message = choice.get("message").ok_or_else(|| anyhow::anyhow!("missing 'choices[0].message'"))?;

    let mut content = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(ContentBlock::Text { text: text.to_string() });
        }
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let func = call.get("function").cloned().unwrap_or(json!({}));
            let args_str = func.get("arguments").and_then(Value::as_str).unwrap_or("{}");
            content.push(ContentBlock::ToolUse {
                id: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: func.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                input: serde_json::from_str(args_str).unwrap_or(json!({})),
            });
        }
    }

    let stop_reason = finish_reason_to_stop_reason(choice.get("finish_reason").and_then(Value::as_str).unwrap_or("stop"));

    Ok(CanonicalResponse {
        id: body.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        model: body.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
        content,
        stop_reason,
        usage: Usage {
            input_tokens: body.get("usage").and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64).unwrap_or(0) as u32,
            output_tokens: body.get("usage").and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0) as u32,
        },
    })
}

/// Serialize a canonical response as an OpenAI chat completion.
pub fn response_from_canonical(resp: &CanonicalResponse) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in &resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": { "name": name, "arguments": input.to_string() },
            })),
            _ => {}
        }
    }
    let mut message = json!({ "role": "assistant" });
    message["content"] = if text.is_empty() { Value::Null } else { json!(text) };
    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    json!({
        "id": resp.id,
        "object": "chat.completion",
        "model": resp.model,
        "choices": [{ "index": 0, "message": message, "finish_reason": stop_reason_to_finish_reason(resp.stop_reason) }],
        "usage": {
            "prompt_tokens": resp.usage.input_tokens,
            "completion_tokens": resp.usage.output_tokens,
            "total_tokens": resp.usage.input_tokens + resp.usage.output_tokens,
        },
    })
}

struct ToolCallBuf {
    openai_index: u64,
    canonical_index: usize,
    id: String,
    name: String,
    args: String,
}

/// Incrementally decodes raw OpenAI `chat.completion.chunk` SSE bytes into
/// canonical events, buffering each tool call until `finish_reason` arrives.
pub struct SseDecoder {
    buf: String,
    started: bool,
    text_index: Option<usize>,
    next_index: usize,
    tool_calls: Vec<ToolCallBuf>,
    finished: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self { buf: String::new(), started: false, text_index: None, next_index: 0, tool_calls: Vec::new(), finished: false }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<CanonicalEvent>> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..pos + 1);
            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                continue;
            }
            if self.finished {
                continue;
            }
            self.handle_chunk(data, &mut out)?;
        }
        Ok(out)
    }

    fn handle_chunk(&mut self, data: &str, out: &mut Vec<CanonicalEvent>) -> anyhow::Result<()> {
        let v: Value = serde_json::from_str(data).map_err(|e| anyhow::anyhow!("malformed openai SSE payload: {e}"))?;

        if !self.started {
            self.started = true;
            out.push(CanonicalEvent::MessageStart {
                id: v.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                model: v.get("model").and_then(Value::as_str).unwrap_or_default().to_string(),
                usage: Usage::default(),
            });
        }

        let Some(choice) = v.get("choices").and_then(Value::as_array).and_then(|a| a.first()) else {
            return Ok(());
        };
        let delta = choice.get("delta").cloned().unwrap_or(json!({}));

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                let index = *self.text_index.get_or_insert_with(|| {
                    let i = self.next_index;
                    self.next_index += 1;
                    out_push_block_start(out, i, BlockStartKind::Text);
                    i
                });
                out.push(CanonicalEvent::ContentBlockDelta { index, delta: ContentDelta::Text(text.to_string()) });
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let oi = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let func = call.get("function").cloned().unwrap_or(json!({}));
                let buf = match self.tool_calls.iter_mut().find(|b| b.openai_index == oi) {
                    Some(b) => b,
                    None => {
                        let canonical_index = self.next_index;
                        self.next_index += 1;
                        self.tool_calls.push(ToolCallBuf {
                            openai_index: oi,
                            canonical_index,
                            id: String::new(),
                            name: String::new(),
                            args: String::new(),
                        });
                        self.tool_calls.last_mut().unwrap()
                    }
                };
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    buf.id = id.to_string();
                }
                if let Some(name) = func.get("name").and_then(Value::as_str) {
                    buf.name = name.to_string();
                }
                if let Some(args) = func.get("arguments").and_then(Value::as_str) {
                    buf.args.push_str(args);
                }
            }
        }

        if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
            if let Some(index) = self.text_index {
                out.push(CanonicalEvent::ContentBlockStop { index });
            }
            for buf in &self.tool_calls {
                out.push(CanonicalEvent::ContentBlockStart {
                    index: buf.canonical_index,
                    kind: BlockStartKind::ToolUse { id: buf.id.clone(), name: buf.name.clone() },
                });
                out.push(CanonicalEvent::ContentBlockDelta {
                    index: buf.canonical_index,
                    delta: ContentDelta::InputJson(buf.args.clone()),
                });
                out.push(CanonicalEvent::ContentBlockStop { index: buf.canonical_index });
            }
            let usage = v
                .get("usage")
                .map(|u| Usage {
                    input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                    output_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                })
                .unwrap_or_default();
            out.push(CanonicalEvent::MessageDelta { stop_reason: finish_reason_to_stop_reason(finish), usage });
            out.push(CanonicalEvent::MessageStop);
            self.finished = true;
        }
        Ok(())
    }
}

fn out_push_block_start(out: &mut Vec<CanonicalEvent>, index: usize, kind: BlockStartKind) {
    out.push(CanonicalEvent::ContentBlockStart { index, kind });
}

/// Incrementally encodes canonical events as OpenAI `chat.completion.chunk`
/// SSE frames, tracking the one piece of cross-event state OpenAI's wire
/// format needs: whether a tool call's `id`/`name` have already been sent.
pub struct SseEncoder {
    id: String,
    model: String,
    created: i64,
    tool_started: HashMap<usize, bool>,
}

impl SseEncoder {
    pub fn new(created_unix_ts: i64) -> Self {
        Self { id: String::new(), model: String::new(), created: created_unix_ts, tool_started: HashMap::new() }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let obj = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        });
        format!("data: {obj}\n\n")
    }

    pub fn encode(&mut self, event: &CanonicalEvent) -> Vec<String> {
        match event {
            CanonicalEvent::MessageStart { id, model, .. } => {
                self.id = id.clone();
                self.model = model.clone();
                vec![self.chunk(json!({ "role": "assistant" }), None)]
            }
            CanonicalEvent::ContentBlockStart { index, kind: BlockStartKind::ToolUse { id, name } } => {
                self.tool_started.insert(*index, true);
                vec![self.chunk(
                    json!({ "tool_calls": [{ "index": index, "id": id, "type": "function", "function": { "name": name, "arguments": "" } }] }),
                    None,
                )]
            }
            CanonicalEvent::ContentBlockStart { .. } => vec![],
            CanonicalEvent::ContentBlockDelta { delta: ContentDelta::Text(t), .. } => {
                vec![self.chunk(json!({ "content": t }), None)]
            }
            CanonicalEvent::ContentBlockDelta { index, delta: ContentDelta::InputJson(p) } => {
                vec![self.chunk(json!({ "tool_calls": [{ "index": index, "function": { "arguments": p } }] }), None)]
            }
            CanonicalEvent::ContentBlockDelta { delta: ContentDelta::Thinking(_), .. } => vec![],
            CanonicalEvent::ContentBlockStop { .. } => vec![],
            CanonicalEvent::MessageDelta { .. } => vec![],
            CanonicalEvent::MessageStop => vec![],
        }
    }

    /// The terminal chunk (`finish_reason` + usage) plus the `[DONE]`
    /// sentinel. Called once the encoder has also seen the preceding
    /// `MessageDelta` (the caller is expected to stash its `stop_reason`
    /// and `usage` and pass them here on `MessageStop`).
    pub fn encode_terminal(&mut self, stop_reason: StopReason, usage: Usage) -> Vec<String> {
        let finish = stop_reason_to_finish_reason(stop_reason);
        let obj = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": {}, "finish_reason": finish }],
            "usage": { "prompt_tokens": usage.input_tokens, "completion_tokens": usage.output_tokens, "total_tokens": usage.input_tokens + usage.output_tokens },
        });
        vec![format!("data: {obj}\n\n"), "data: [DONE]\n\n".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_system_messages_hoist_and_concatenate() {
        let body = json!({
            "model": "gpt-x",
            "messages": [
                {"role": "system", "content": "a"},
                {"role": "system", "content": "b"},
                {"role": "user", "content": "hi"},
            ]
        });
        let req = to_canonical(&body).unwrap();
        assert_eq!(req.system.as_deref(), Some("a\n\nb"));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn single_text_content_serializes_as_plain_string() {
        let req = CanonicalRequest {
            model: "m".into(),
            system: None,
            messages: vec![CanonicalMessage { role: Role::User, content: vec![ContentBlock::Text { text: "ping".into() }] }],
            max_tokens: 16,
            temperature: None,
            stream: false,
            tools: vec![],
            tool_choice: None,
            thinking: None,
            metadata: None,
        };
        let body = from_canonical(&req);
        assert_eq!(body["messages"][0]["content"], "ping");
    }

    #[test]
    fn tool_message_becomes_tool_result_block() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "do it"},
                {"role": "assistant", "content": null, "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{}"}}]},
                {"role": "tool", "tool_call_id": "call_1", "content": "result"},
            ]
        });
        let req = to_canonical(&body).unwrap();
        assert_eq!(req.messages.len(), 3);
        assert!(matches!(&req.messages[2].content[0], ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "call_1"));
    }

    #[test]
    fn decoder_buffers_tool_call_fragments_until_finish_reason() {
        let mut dec = SseDecoder::new();
        let mut events = Vec::new();
        events.extend(
            dec.push(b"data: {\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"search\",\"arguments\":\"\"}}]}}]}\n\n")
                .unwrap(),
        );
        assert!(events.iter().all(|e| !matches!(e, CanonicalEvent::ContentBlockStart { .. })));
        events.extend(
            dec.push(b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\n")
                .unwrap(),
        );
        events.extend(
            dec.push(b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\" \\\"hi\\\"}\"}}]}}]}\n\n")
                .unwrap(),
        );
        events.extend(
            dec.push(b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n").unwrap(),
        );
        events.extend(dec.push(b"data: [DONE]\n\n").unwrap());

        assert_eq!(
            events,
            vec![
                CanonicalEvent::MessageStart { id: "c1".into(), model: "m".into(), usage: Usage::default() },
                CanonicalEvent::ContentBlockStart { index: 0, kind: BlockStartKind::ToolUse { id: "call_1".into(), name: "search".into() } },
                CanonicalEvent::ContentBlockDelta { index: 0, delta: ContentDelta::InputJson("{\"q\": \"hi\"}".into()) },
                CanonicalEvent::ContentBlockStop { index: 0 },
                CanonicalEvent::MessageDelta { stop_reason: StopReason::ToolUse, usage: Usage::default() },
                CanonicalEvent::MessageStop,
            ]
        );
    }

    #[test]
    fn response_round_trip_preserves_tool_call_arguments() {
        let body = json!({
            "id": "c1", "model": "m",
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [{"id": "t1", "type": "function", "function": {"name": "f", "arguments": "{\"x\":1}"}}]}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4}
        });
        let canonical = response_to_canonical(&body).unwrap();
        assert_eq!(canonical.stop_reason, StopReason::ToolUse);
        let back = response_from_canonical(&canonical);
        assert_eq!(back["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "f");
        assert_eq!(back["usage"]["prompt_tokens"], 3);
    }
}
