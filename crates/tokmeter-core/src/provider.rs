//! Provider adapter contract
//!
//! This module defines the `ProviderAdapter` trait that every provider crate
//! implements. An adapter knows how to read the model name out of a request,
//! how to read unit counts out of the provider's native response shape, and
//! how to accumulate usage across a streamed response.

use crate::types::{Provider, TokenUsage};
use serde_json::Value;

/// Approximate a token count from text length (one token per four characters)
///
/// Used only when a streamed chunk carries text but no usage numbers.
///
/// # Examples
/// ```
/// use tokmeter_core::provider::approximate_tokens;
///
/// assert_eq!(approximate_tokens(""), 0);
/// assert_eq!(approximate_tokens("abc"), 1);
/// assert_eq!(approximate_tokens("abcdefgh"), 2);
/// ```
pub fn approximate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Request fields that carry prompt text
const PROMPT_FIELDS: &[&str] = &[
    "messages",
    "input",
    "prompt",
    "system",
    "instructions",
    "contents",
    "systemInstruction",
];

/// Approximate the tokens of every string leaf in a JSON value
pub fn approximate_value_tokens(value: &Value) -> u64 {
    match value {
        Value::String(text) => approximate_tokens(text),
        Value::Array(items) => items.iter().map(approximate_value_tokens).sum(),
        Value::Object(map) => map.values().map(approximate_value_tokens).sum(),
        _ => 0,
    }
}

/// Read a non-negative integer field, tolerating floats and missing values
pub fn u64_field(value: &Value, key: &str) -> Option<u64> {
    let field = value.get(key)?;
    field
        .as_u64()
        .or_else(|| field.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Trait for provider-specific usage extraction.
///
/// Each provider crate (OpenAI, Anthropic, Gemini) implements this trait so
/// that tracked clients can meter any provider with generic code.
pub trait ProviderAdapter: Send + Sync {
    /// Provider served by this adapter
    fn provider(&self) -> Provider;

    /// Model named by the request arguments, if any
    fn extract_model(&self, request: &Value) -> Option<String>;

    /// Unit counts from a complete (non-streamed) response
    fn extract_usage(&self, response: &Value) -> Option<TokenUsage>;

    /// Fresh accumulator for one streamed response
    fn stream_accumulator(&self) -> Box<dyn StreamAccumulator>;

    /// Approximate input tokens from the request's prompt fields
    ///
    /// Used for streams that never report exact usage.
    fn approximate_prompt_tokens(&self, request: &Value) -> u64 {
        PROMPT_FIELDS
            .iter()
            .filter_map(|field| request.get(*field))
            .map(approximate_value_tokens)
            .sum()
    }
}

/// Running usage for a streamed response
///
/// Chunks are fed in arrival order. Exact usage reported by the provider
/// always replaces the character-based approximation.
pub trait StreamAccumulator: Send {
    /// Observe one stream chunk
    fn observe(&mut self, chunk: &Value);

    /// Usage so far
    fn usage(&self) -> TokenUsage;

    /// Whether `usage` came from provider-reported numbers
    fn is_exact(&self) -> bool;
}
