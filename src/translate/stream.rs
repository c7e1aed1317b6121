//! Streaming state machine (§4.2, §5): consumes raw SSE bytes in one dialect
//! and produces raw SSE bytes in the other, driven purely by
//! [`CanonicalEvent`]s in between.
//!
//! A [`Translator`] is built once per request and fed upstream bytes as they
//! arrive; it is also the thing that knows how to synthesize the terminal
//! event §4.2 requires when the upstream connection ends before a real one
//! arrived.

use super::canonical::*;
use super::{anthropic, openai};
use crate::provider::Dialect;

enum SourceDecoder {
    Anthropic(anthropic::SseDecoder),
    OpenAi(openai::SseDecoder),
}

enum SinkEncoder {
    Anthropic,
    OpenAi(openai::SseEncoder),
}

pub struct Translator {
    source: SourceDecoder,
    sink: SinkEncoder,
    pending_terminal: Option<(StopReason, Usage)>,
    input_tokens: u32,
    output_tokens: u32,
    terminated: bool,
}

impl Translator {
    pub fn new(source_dialect: Dialect, sink_dialect: Dialect, created_unix_ts: i64) -> Self {
        let source = match source_dialect {
            Dialect::Anthropic => SourceDecoder::Anthropic(anthropic::SseDecoder::new()),
            Dialect::OpenAi => SourceDecoder::OpenAi(openai::SseDecoder::new()),
        };
        let sink = match sink_dialect {
            Dialect::Anthropic => SinkEncoder::Anthropic,
            Dialect::OpenAi => SinkEncoder::OpenAi(openai::SseEncoder::new(created_unix_ts)),
        };
        Self { source, sink, pending_terminal: None, input_tokens: 0, output_tokens: 0, terminated: false }
    }

    /// Feed newly-received upstream bytes; returns the SSE frames (already
    /// formatted as `event:`/`data:` text) to write to the client.
    pub fn push(&mut self, bytes: &[u8]) -> anyhow::Result<Vec<String>> {
        let events = match &mut self.source {
            SourceDecoder::Anthropic(d) => d.push(bytes)?,
            SourceDecoder::OpenAi(d) => d.push(bytes)?,
        };
        let mut frames = Vec::new();
        for event in &events {
            self.observe(event);
            frames.extend(self.encode_one(event));
        }
        Ok(frames)
    }

    fn observe(&mut self, event: &CanonicalEvent) {
        match event {
            CanonicalEvent::MessageStart { usage, .. } => {
                self.input_tokens = self.input_tokens.max(usage.input_tokens);
            }
            CanonicalEvent::MessageDelta { usage, .. } => {
                self.input_tokens = self.input_tokens.max(usage.input_tokens);
                self.output_tokens = self.output_tokens.max(usage.output_tokens);
            }
            CanonicalEvent::MessageStop => self.terminated = true,
            _ => {}
        }
    }

    fn encode_one(&mut self, event: &CanonicalEvent) -> Vec<String> {
        match &mut self.sink {
            SinkEncoder::Anthropic => vec![anthropic::encode_event(event)],
            SinkEncoder::OpenAi(enc) => {
                if let CanonicalEvent::MessageDelta { stop_reason, usage } = event {
                    self.pending_terminal = Some((*stop_reason, *usage));
                    return vec![];
                }
                if matches!(event, CanonicalEvent::MessageStop) {
                    let (stop_reason, usage) =
                        self.pending_terminal.take().unwrap_or((StopReason::EndTurn, Usage::default()));
                    return enc.encode_terminal(stop_reason, usage);
                }
                enc.encode(event)
            }
        }
    }

    /// True once a real `message_stop`/terminal chunk has been observed from
    /// upstream.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn usage_so_far(&self) -> Usage {
        Usage { input_tokens: self.input_tokens, output_tokens: self.output_tokens }
    }

    /// Synthesize the terminal event the spec requires when upstream's
    /// connection ends before a real `message_stop`/`finish_reason` arrived.
    pub fn finish_unterminated(&mut self) -> Vec<String> {
        if self.terminated {
            return vec![];
        }
        let usage = self.usage_so_far();
        let events = [
            CanonicalEvent::MessageDelta { stop_reason: StopReason::Error, usage },
            CanonicalEvent::MessageStop,
        ];
        let mut frames = Vec::new();
        for event in &events {
            self.observe(event);
            frames.extend(self.encode_one(event));
        }
        frames
    }
}
