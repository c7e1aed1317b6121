//! Bidirectional conversion between the Anthropic Messages and OpenAI Chat
//! Completions wire dialects (C2).
//!
//! Dispatch is a sum type plus pure functions, not a trait object: callers
//! never need a v-table, and adding a third dialect later is one more match
//! arm, not a new impl scattered across the crate.

pub mod anthropic;
pub mod canonical;
pub mod openai;
pub mod stream;

use serde_json::Value;

pub use canonical::*;
pub use stream::Translator;

use crate::provider::Dialect;

/// Parse a request body in `dialect`'s wire shape into canonical form.
pub fn decode_request(dialect: Dialect, body: &Value) -> anyhow::Result<CanonicalRequest> {
    match dialect {
        Dialect::Anthropic => anthropic::to_canonical(body),
        Dialect::OpenAi => openai::to_canonical(body),
    }
}

/// Serialize a canonical request as `dialect`'s wire shape.
pub fn encode_request(dialect: Dialect, req: &CanonicalRequest) -> Value {
    match dialect {
        Dialect::Anthropic => anthropic::from_canonical(req),
        Dialect::OpenAi => openai::from_canonical(req),
    }
}

/// Parse a non-streaming response body in `dialect`'s wire shape.
pub fn decode_response(dialect: Dialect, body: &Value) -> anyhow::Result<CanonicalResponse> {
    match dialect {
        Dialect::Anthropic => anthropic::response_to_canonical(body),
        Dialect::OpenAi => openai::response_to_canonical(body),
    }
}

/// Serialize a canonical response as `dialect`'s wire shape.
pub fn encode_response(dialect: Dialect, resp: &CanonicalResponse) -> Value {
    match dialect {
        Dialect::Anthropic => anthropic::response_from_canonical(resp),
        Dialect::OpenAi => openai::response_from_canonical(resp),
    }
}

/// Translate a full non-streaming request body from one dialect to another.
/// A no-op shortcut when both sides already agree.
pub fn translate_request_body(from: Dialect, to: Dialect, body: &Value) -> anyhow::Result<Value> {
    if from == to {
        return Ok(body.clone());
    }
    let canonical = decode_request(from, body)?;
    Ok(encode_request(to, &canonical))
}

/// Translate a full non-streaming response body from one dialect to another.
pub fn translate_response_body(from: Dialect, to: Dialect, body: &Value) -> anyhow::Result<Value> {
    if from == to {
        return Ok(body.clone());
    }
    let canonical = decode_response(from, body)?;
    Ok(encode_response(to, &canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_dialect_request_translation_is_identity() {
        let body = json!({ "model": "m", "messages": [] });
        let out = translate_request_body(Dialect::Anthropic, Dialect::Anthropic, &body).unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn anthropic_to_openai_request_translates_single_user_message() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 16,
        });
        let out = translate_request_body(Dialect::Anthropic, Dialect::OpenAi, &body).unwrap();
        assert_eq!(out["messages"][0]["content"], "ping");
        assert_eq!(out["max_tokens"], 16);
    }

    #[test]
    fn openai_to_anthropic_response_translates_text_reply() {
        let body = json!({
            "id": "c1", "model": "m",
            "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1},
        });
        let out = translate_response_body(Dialect::OpenAi, Dialect::Anthropic, &body).unwrap();
        assert_eq!(out["content"][0]["text"], "pong");
        assert_eq!(out["stop_reason"], "end_turn");
        assert_eq!(out["usage"]["input_tokens"], 1);
        assert_eq!(out["usage"]["output_tokens"], 1);
    }
}
