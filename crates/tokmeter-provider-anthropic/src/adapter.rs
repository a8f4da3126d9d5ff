//! Anthropic usage extraction
//!
//! A Messages API response carries `usage.input_tokens` and
//! `usage.output_tokens`. A stream reports input tokens on `message_start`
//! and the cumulative output count on each `message_delta`.

use serde::Deserialize;
use serde_json::Value;
use tokmeter_core::provider::{ProviderAdapter, StreamAccumulator, approximate_tokens};
use tokmeter_core::{Provider, TokenUsage};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

impl AnthropicUsage {
    fn from_value(value: Option<&Value>) -> Option<Self> {
        let usage = value.filter(|u| u.is_object())?;
        serde_json::from_value(usage.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn extract_model(&self, request: &Value) -> Option<String> {
        request.get("model")?.as_str().map(str::to_string)
    }

    fn extract_usage(&self, response: &Value) -> Option<TokenUsage> {
        let usage = AnthropicUsage::from_value(response.get("usage"))?;
        if usage.input_tokens.is_none() && usage.output_tokens.is_none() {
            return None;
        }
        Some(TokenUsage::new(
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0),
        ))
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::new(AnthropicStreamAccumulator::default())
    }
}

/// Accumulates usage over Messages API stream events
#[derive(Debug, Default)]
pub struct AnthropicStreamAccumulator {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    approximate_output: u64,
}

impl StreamAccumulator for AnthropicStreamAccumulator {
    fn observe(&mut self, chunk: &Value) {
        match chunk.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let usage = chunk
                    .get("message")
                    .and_then(|message| AnthropicUsage::from_value(message.get("usage")));
                if let Some(usage) = usage {
                    self.input_tokens = usage.input_tokens.or(self.input_tokens);
                }
            }
            Some("content_block_delta") => {
                let text = chunk
                    .get("delta")
                    .and_then(|delta| delta.get("text").or_else(|| delta.get("partial_json")))
                    .and_then(Value::as_str);
                if let Some(text) = text {
                    self.approximate_output += approximate_tokens(text);
                }
            }
            Some("message_delta") => {
                if let Some(usage) = AnthropicUsage::from_value(chunk.get("usage")) {
                    // Counts on message_delta are cumulative
                    if usage.output_tokens.is_some() {
                        self.output_tokens = usage.output_tokens;
                    }
                    if usage.input_tokens.is_some() {
                        self.input_tokens = usage.input_tokens;
                    }
                    debug!(
                        "Anthropic stream reported usage: {:?} in, {:?} out",
                        self.input_tokens, self.output_tokens
                    );
                }
            }
            _ => {}
        }
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(self.approximate_output),
        )
    }

    fn is_exact(&self) -> bool {
        self.input_tokens.is_some() && self.output_tokens.is_some()
    }
}
