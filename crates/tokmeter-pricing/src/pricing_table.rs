//! Static pricing table
//!
//! All token rates are USD per 1,000 units. Keys are canonical model
//! identifiers in normalized form (lowercase, dotted version numbers) and are
//! matched as substrings of the normalized caller-supplied name, so each
//! provider list is ordered most-specific first: `gpt-4o-mini` must be tried
//! before `gpt-4o`, which must be tried before `gpt-4`.

use serde::{Deserialize, Serialize};
use tokmeter_core::Provider;

/// Per-token rate, USD per 1,000 units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Unit a special-cased model is billed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingUnit {
    /// Image generation; input units are an image count
    Image,
    /// Audio transcription; input units are seconds, billed per minute
    Minute,
    /// Text-to-speech; input units are characters
    Character,
}

/// Rate for a model that is not billed per token
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecialUnitRate {
    pub unit: BillingUnit,
    /// USD per image, per minute, or per character
    pub rate: f64,
}

/// A resolved price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Rate {
    Token(TokenRate),
    Special(SpecialUnitRate),
}

/// One row of a provider's token price list
#[derive(Debug, Clone, Copy)]
pub struct PricingEntry {
    pub key: &'static str,
    pub rate: TokenRate,
}

const fn token(key: &'static str, input_per_1k: f64, output_per_1k: f64) -> PricingEntry {
    PricingEntry {
        key,
        rate: TokenRate {
            input_per_1k,
            output_per_1k,
        },
    }
}

/// A special-unit model family recognised by name prefix
#[derive(Debug, Clone, Copy)]
pub struct SpecialFamily {
    /// Prefix of the normalized model name
    pub prefix: &'static str,
    /// More specific variants, checked in order
    pub variants: &'static [(&'static str, f64)],
    /// Key reported when no variant matches
    pub default_key: &'static str,
    /// Rate applied when no variant matches
    pub default_rate: f64,
    pub unit: BillingUnit,
}

/// OpenAI image, transcription and speech models
pub const OPENAI_SPECIAL_FAMILIES: &[SpecialFamily] = &[
    SpecialFamily {
        prefix: "dall-e",
        variants: &[("dall-e-3", 0.04)],
        default_key: "dall-e-2",
        default_rate: 0.02,
        unit: BillingUnit::Image,
    },
    SpecialFamily {
        prefix: "whisper-",
        variants: &[],
        default_key: "whisper-1",
        default_rate: 0.006,
        unit: BillingUnit::Minute,
    },
    SpecialFamily {
        prefix: "tts-",
        variants: &[("tts-1-hd", 0.00003)],
        default_key: "tts-1",
        default_rate: 0.000015,
        unit: BillingUnit::Character,
    },
];

pub const OPENAI_MODELS: &[PricingEntry] = &[
    token("gpt-4.1-nano", 0.0001, 0.0004),
    token("gpt-4.1-mini", 0.0004, 0.0016),
    token("gpt-4.1", 0.002, 0.008),
    token("gpt-4o-mini", 0.00015, 0.0006),
    token("gpt-4o", 0.0025, 0.01),
    token("gpt-4-turbo", 0.01, 0.03),
    token("gpt-4-32k", 0.06, 0.12),
    token("gpt-4", 0.03, 0.06),
    token("gpt-3.5-turbo-instruct", 0.0015, 0.002),
    token("gpt-3.5-turbo-16k", 0.003, 0.004),
    token("gpt-3.5-turbo", 0.0005, 0.0015),
    token("o1-mini", 0.0011, 0.0044),
    token("o1-pro", 0.15, 0.6),
    token("o1", 0.015, 0.06),
    token("o3-mini", 0.0011, 0.0044),
    token("o3", 0.002, 0.008),
    token("o4-mini", 0.0011, 0.0044),
    token("text-embedding-3-small", 0.00002, 0.0),
    token("text-embedding-3-large", 0.00013, 0.0),
    token("text-embedding-ada-002", 0.0001, 0.0),
];

pub const ANTHROPIC_MODELS: &[PricingEntry] = &[
    token("claude-opus-4.1", 0.015, 0.075),
    token("claude-opus-4", 0.015, 0.075),
    token("claude-sonnet-4.5", 0.003, 0.015),
    token("claude-sonnet-4", 0.003, 0.015),
    token("claude-haiku-4.5", 0.001, 0.005),
    token("claude-3.7-sonnet", 0.003, 0.015),
    token("claude-3.5-sonnet", 0.003, 0.015),
    token("claude-3.5-haiku", 0.0008, 0.004),
    token("claude-3-opus", 0.015, 0.075),
    token("claude-3-sonnet", 0.003, 0.015),
    token("claude-3-haiku", 0.00025, 0.00125),
    token("claude-2.1", 0.008, 0.024),
    token("claude-2", 0.008, 0.024),
    token("claude-instant", 0.0008, 0.0024),
];

pub const GEMINI_MODELS: &[PricingEntry] = &[
    // Experimental releases are free of charge
    token("gemini-2.0-flash-thinking-exp", 0.0, 0.0),
    token("gemini-2.0-flash-exp", 0.0, 0.0),
    token("gemini-2.5-pro-exp", 0.0, 0.0),
    token("gemini-1.5-pro-exp", 0.0, 0.0),
    token("gemini-1.5-flash-exp", 0.0, 0.0),
    token("gemini-exp", 0.0, 0.0),
    token("gemini-2.5-pro", 0.00125, 0.01),
    token("gemini-2.5-flash-lite", 0.0001, 0.0004),
    token("gemini-2.5-flash", 0.0003, 0.0025),
    token("gemini-2.0-flash-lite", 0.000075, 0.0003),
    token("gemini-2.0-flash", 0.0001, 0.0004),
    token("gemini-1.5-pro", 0.00125, 0.005),
    token("gemini-1.5-flash-8b", 0.0000375, 0.00015),
    token("gemini-1.5-flash", 0.000075, 0.0003),
    token("gemini-1.0-pro", 0.0005, 0.0015),
    token("gemini-pro", 0.0005, 0.0015),
];

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-haiku";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Blended rate applied to the unit sum when the provider is unknown
pub const BLENDED_FALLBACK_PER_1K: f64 = 0.002;

/// Ordered token price list for a provider
pub fn models_for(provider: Provider) -> &'static [PricingEntry] {
    match provider {
        Provider::OpenAi => OPENAI_MODELS,
        Provider::Anthropic => ANTHROPIC_MODELS,
        Provider::Gemini => GEMINI_MODELS,
    }
}

/// Special-unit families for a provider
pub fn special_families_for(provider: Provider) -> &'static [SpecialFamily] {
    match provider {
        Provider::OpenAi => OPENAI_SPECIAL_FAMILIES,
        Provider::Anthropic | Provider::Gemini => &[],
    }
}

/// Model charged when nothing in the provider's list matches
pub fn default_model_for(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenAi => OPENAI_DEFAULT_MODEL,
        Provider::Anthropic => ANTHROPIC_DEFAULT_MODEL,
        Provider::Gemini => GEMINI_DEFAULT_MODEL,
    }
}

/// Exact-key lookup in a provider's list
pub fn lookup(provider: Provider, key: &str) -> Option<&'static PricingEntry> {
    models_for(provider).iter().find(|entry| entry.key == key)
}
