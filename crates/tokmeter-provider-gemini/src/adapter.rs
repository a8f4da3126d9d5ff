//! Gemini usage extraction
//!
//! Responses report `usageMetadata.promptTokenCount` and
//! `usageMetadata.candidatesTokenCount`. Some SDKs wrap the payload in a
//! `response` field. Streamed chunks each repeat the running totals, so the
//! latest chunk's metadata replaces earlier ones.

use serde::Deserialize;
use serde_json::Value;
use tokmeter_core::provider::{ProviderAdapter, StreamAccumulator, approximate_tokens};
use tokmeter_core::{Provider, TokenUsage};
use tracing::trace;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

fn usage_metadata(response: &Value) -> Option<TokenUsage> {
    let metadata = response
        .get("usageMetadata")
        .or_else(|| response.get("response")?.get("usageMetadata"))
        .filter(|m| m.is_object())?;
    let metadata: UsageMetadata = serde_json::from_value(metadata.clone()).ok()?;
    if metadata.prompt_token_count.is_none() && metadata.candidates_token_count.is_none() {
        return None;
    }
    Some(TokenUsage::new(
        metadata.prompt_token_count.unwrap_or(0),
        metadata.candidates_token_count.unwrap_or(0),
    ))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    /// Model from the request, without the `models/` resource prefix
    fn extract_model(&self, request: &Value) -> Option<String> {
        let model = request.get("model")?.as_str()?;
        Some(model.strip_prefix("models/").unwrap_or(model).to_string())
    }

    fn extract_usage(&self, response: &Value) -> Option<TokenUsage> {
        usage_metadata(response)
    }

    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator> {
        Box::new(GeminiStreamAccumulator::default())
    }
}

#[derive(Debug, Default)]
pub struct GeminiStreamAccumulator {
    exact: Option<TokenUsage>,
    approximate_output: u64,
}

impl StreamAccumulator for GeminiStreamAccumulator {
    fn observe(&mut self, chunk: &Value) {
        let candidates = chunk
            .get("candidates")
            .or_else(|| chunk.get("response")?.get("candidates"))
            .and_then(Value::as_array);
        for candidate in candidates.into_iter().flatten() {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array);
            for part in parts.into_iter().flatten() {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    self.approximate_output += approximate_tokens(text);
                }
            }
        }

        if let Some(usage) = usage_metadata(chunk) {
            trace!("Gemini chunk usage: {:?}", usage);
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
    fn test_generate_content_usage() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "Hi"}], "role": "model"}}],
            "usageMetadata": {
                "promptTokenCount": 11,
                "candidatesTokenCount": 4,
                "totalTokenCount": 15
            },
            "modelVersion": "gemini-1.5-flash-002"
        });
        assert_eq!(
            GeminiAdapter.extract_usage(&response),
            Some(TokenUsage::new(11, 4))
        );
    }

    #[test]
    fn test_wrapped_response_usage() {
        let result = json!({
            "response": {"usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 9}}
        });
        assert_eq!(GeminiAdapter.extract_usage(&result), Some(TokenUsage::new(3, 9)));
    }

    #[test]
    fn test_prompt_only_usage() {
        let response = json!({"usageMetadata": {"promptTokenCount": 6, "totalTokenCount": 6}});
        assert_eq!(GeminiAdapter.extract_usage(&response), Some(TokenUsage::new(6, 0)));
        assert_eq!(GeminiAdapter.extract_usage(&json!({"candidates": []})), None);
    }

    #[test]
    fn test_extract_model_strips_resource_prefix() {
        assert_eq!(
            GeminiAdapter.extract_model(&json!({"model": "models/gemini-1.5-pro"})),
            Some("gemini-1.5-pro".to_string())
        );
        assert_eq!(
            GeminiAdapter.extract_model(&json!({"model": "gemini-2.0-flash-exp"})),
            Some("gemini-2.0-flash-exp".to_string())
        );
    }

    #[test]
    fn test_stream_latest_metadata_wins() {
        let mut acc = GeminiAdapter.stream_accumulator();
        acc.observe(&json!({
            "candidates": [{"content": {"parts": [{"text": "Once upon"}]}}],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2}
        }));
        acc.observe(&json!({
            "candidates": [{"content": {"parts": [{"text": " a time"}]}}],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 5}
        }));

        assert!(acc.is_exact());
        assert_eq!(acc.usage(), TokenUsage::new(8, 5));
    }

    #[test]
    fn test_stream_approximation() {
        let mut acc = GeminiAdapter.stream_accumulator();
        acc.observe(&json!({"candidates": [{"content": {"parts": [{"text": "abcdefghi"}]}}]}));
        assert!(!acc.is_exact());
        assert_eq!(acc.usage(), TokenUsage::new(0, 3));
    }
}
