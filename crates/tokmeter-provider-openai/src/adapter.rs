//! OpenAI usage extraction
//!
//! Chat Completions and Embeddings report `usage.prompt_tokens` and
//! `usage.completion_tokens`; the Responses API reports `usage.input_tokens`
//! and `usage.output_tokens`. Both shapes are accepted.
//!
//! Streamed Chat Completions only carry usage on the final chunk when the
//! request sets `stream_options.include_usage`. Streamed Responses carry it
//! on the `response.completed` event. Otherwise output tokens are
//! approximated from the text deltas.

use serde::Deserialize;
use serde_json::Value;
use tokmeter_core::provider::{ProviderAdapter, StreamAccumulator, approximate_tokens};
use tokmeter_core::{Provider, TokenUsage};
use tracing::debug;

/// `usage` object in either API generation
#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(alias = "input_tokens")]
    prompt_tokens: Option<u64>,
    #[serde(alias = "output_tokens")]
    completion_tokens: Option<u64>,
}

impl OpenAiUsage {
    fn from_response(response: &Value) -> Option<Self> {
        let usage = response.get("usage").filter(|u| u.is_object())?;
        serde_json::from_value(usage.clone()).ok()
    }

    fn into_token_usage(self) -> Option<TokenUsage> {
        if self.prompt_tokens.is_none() && self.completion_tokens.is_none() {
            return None;
        }
        Some(TokenUsage::new(
            self.prompt_tokens.unwrap_or(0),
            self.completion_tokens.unwrap_or(0),
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn extract_model(&self, request: &Value) -> Option<String> {
        request.get("model")?.as_str().map(str::to_string)
    }

    fn extract_usage(&self, response: &Value) -> Option<TokenUsage> {
        OpenAiUsage::from_response(response)
            // Responses API wraps the final object in `response`
            .or_else(|| response.get("response").and_then(OpenAiUsage::from_response))
            .and_then(OpenAiUsage::into_token_usage)
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::new(OpenAiStreamAccumulator::default())
    }
}

/// Accumulates usage over `chat.completion.chunk` and Responses stream events
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    exact: Option<TokenUsage>,
    approximate_output: u64,
}

impl OpenAiStreamAccumulator {
    fn delta_text(chunk: &Value) -> Vec<&str> {
        // Responses API: {"type": "response.output_text.delta", "delta": "..."}
        if chunk.get("type").and_then(Value::as_str) == Some("response.output_text.delta") {
            return chunk.get("delta").and_then(Value::as_str).into_iter().collect();
        }

        chunk
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|choice| choice.get("delta")?.get("content")?.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl StreamAccumulator for OpenAiStreamAccumulator {
    fn observe(&mut self, chunk: &Value) {
        for text in Self::delta_text(chunk) {
            self.approximate_output += approximate_tokens(text);
        }

        if let Some(usage) = OpenAiAdapter.extract_usage(chunk) {
            debug!(
                "OpenAI stream reported usage: {} in, {} out",
                usage.input_tokens, usage.output_tokens
            );
            self.exact = Some(usage);
        }
    }

    fn usage(&self) -> TokenUsage {
        self.exact
            .unwrap_or_else(|| TokenUsage::new(0, self.approximate_output))
    }

    fn is_exact(&self) -> bool {
        self.exact.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_completion_usage() {
        let response = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        assert_eq!(
            OpenAiAdapter.extract_usage(&response),
            Some(TokenUsage::new(12, 3))
        );
    }

    #[test]
    fn test_responses_api_usage() {
        let response = json!({
            "object": "response",
            "usage": {"input_tokens": 40, "output_tokens": 9, "total_tokens": 49}
        });
        assert_eq!(
            OpenAiAdapter.extract_usage(&response),
            Some(TokenUsage::new(40, 9))
        );
    }

    #[test]
    fn test_embedding_usage_has_no_output() {
        let response = json!({
            "object": "list",
            "usage": {"prompt_tokens": 8, "total_tokens": 8}
        });
        assert_eq!(
            OpenAiAdapter.extract_usage(&response),
            Some(TokenUsage::new(8, 0))
        );
    }

    #[test]
    fn test_missing_usage() {
        assert_eq!(OpenAiAdapter.extract_usage(&json!({"choices": []})), None);
        assert_eq!(OpenAiAdapter.extract_usage(&json!({"usage": null})), None);
        assert_eq!(OpenAiAdapter.extract_usage(&json!({"usage": {}})), None);
    }

    #[test]
    fn test_extract_model() {
        let request = json!({"model": "gpt-4o", "messages": []});
        assert_eq!(OpenAiAdapter.extract_model(&request), Some("gpt-4o".to_string()));
        assert_eq!(OpenAiAdapter.extract_model(&json!({})), None);
    }

    #[test]
    fn test_stream_without_usage_is_approximated() {
        let mut acc = OpenAiAdapter.stream_accumulator();
        acc.observe(&json!({"choices": [{"delta": {"role": "assistant"}}]}));
        acc.observe(&json!({"choices": [{"delta": {"content": "Hello"}}]}));
        acc.observe(&json!({"choices": [{"delta": {"content": " world!!"}}]}));
        acc.observe(&json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}));

        assert!(!acc.is_exact());
        // "Hello" -> 2, " world!!" -> 2
        assert_eq!(acc.usage(), TokenUsage::new(0, 4));
    }

    #[test]
    fn test_stream_final_usage_chunk_wins() {
        let mut acc = OpenAiAdapter.stream_accumulator();
        acc.observe(&json!({"choices": [{"delta": {"content": "Hello world"}}]}));
        acc.observe(&json!({
            "choices": [],
            "usage": {"prompt_tokens": 20, "completion_tokens": 2, "total_tokens": 22}
        }));

        assert!(acc.is_exact());
        assert_eq!(acc.usage(), TokenUsage::new(20, 2));
    }

    #[test]
    fn test_responses_stream_events() {
        let mut acc = OpenAiAdapter.stream_accumulator();
        acc.observe(&json!({"type": "response.created", "response": {"usage": null}}));
        acc.observe(&json!({"type": "response.output_text.delta", "delta": "abcdefgh"}));
        assert_eq!(acc.usage(), TokenUsage::new(0, 2));

        acc.observe(&json!({
            "type": "response.completed",
            "response": {"usage": {"input_tokens": 30, "output_tokens": 5}}
        }));
        assert!(acc.is_exact());
        assert_eq!(acc.usage(), TokenUsage::new(30, 5));
    }
}
