//! Model name resolution
//!
//! Maps a `(provider, raw model string)` pair to a [`Rate`]. Resolution never
//! fails: unmatched models are charged at the provider's default model and
//! unknown providers at a blended per-unit rate. Both fallbacks are reported
//! through [`MatchSource`] and logged at `warn` level.

use crate::pricing_table::{
    self, BLENDED_FALLBACK_PER_1K, PricingEntry, Rate, SpecialFamily, SpecialUnitRate, TokenRate,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use tokmeter_core::Provider;
use tracing::{debug, warn};

/// Routing prefixes some SDKs and gateways put in front of model names
const STRIPPED_PREFIXES: &[&str] = &["models/", "openai/", "anthropic/", "google/"];

/// `claude-3-5-sonnet` style version numbers; rewritten to `claude-3.5-sonnet`
static DASHED_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d)-(\d)(\D|$)").expect("dashed version pattern is valid"));

/// How a rate was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// Image, transcription or speech model recognised by prefix
    Special,
    /// Matched a row of the provider's price list
    Table,
    /// Nothing matched; charged as the provider's default model
    ProviderDefault,
    /// Provider not recognised; blended rate on the unit sum
    BlendedFallback,
}

/// Result of resolving one model string
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub provider: Option<Provider>,
    /// Normalized form of the caller-supplied name
    pub normalized: String,
    /// Pricing key that was charged, if any
    pub matched_key: Option<&'static str>,
    pub rate: Rate,
    pub source: MatchSource,
}

impl Resolution {
    /// Whether the rate came from a fallback rather than a match
    pub fn is_fallback(&self) -> bool {
        matches!(
            self.source,
            MatchSource::ProviderDefault | MatchSource::BlendedFallback
        )
    }
}

/// Normalize a caller-supplied model name for matching.
///
/// Lowercases, trims, strips routing prefixes such as `models/` or
/// `anthropic/`, turns Vertex-style `@` snapshot separators into dashes, and
/// collapses dashed single-digit versions into dotted ones.
///
/// ```
/// use tokmeter_pricing::normalize_model_name;
///
/// assert_eq!(normalize_model_name("  Claude-3-5-Sonnet-20241022 "), "claude-3.5-sonnet-20241022");
/// assert_eq!(normalize_model_name("models/gemini-1.5-pro"), "gemini-1.5-pro");
/// assert_eq!(normalize_model_name("claude-opus-4-1"), "claude-opus-4.1");
/// ```
pub fn normalize_model_name(raw: &str) -> String {
    let mut name = raw.trim().to_lowercase();

    loop {
        let before = name.len();
        for prefix in STRIPPED_PREFIXES {
            if let Some(rest) = name.strip_prefix(prefix) {
                name = rest.to_string();
            }
        }
        if name.len() == before {
            break;
        }
    }

    let name = name.replace('@', "-");
    DASHED_VERSION.replace_all(&name, "${1}.${2}${3}").into_owned()
}

/// Resolves model strings against the static pricing table
#[derive(Debug, Clone, Copy, Default)]
pub struct PricingResolver;

impl PricingResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve using a provider name as supplied by a caller
    ///
    /// Provider names are matched case-insensitively; anything other than
    /// `openai`, `anthropic` or `gemini` (alias `google`) gets the blended rate.
    pub fn resolve(&self, provider: &str, model: &str) -> Resolution {
        match Provider::from_str(provider) {
            Ok(provider) => self.resolve_for(provider, model),
            Err(_) => {
                warn!(
                    "Unknown provider '{}' for model '{}', applying blended rate of ${} per 1K units",
                    provider, model, BLENDED_FALLBACK_PER_1K
                );
                Resolution {
                    provider: None,
                    normalized: normalize_model_name(model),
                    matched_key: None,
                    rate: Rate::Token(TokenRate {
                        input_per_1k: BLENDED_FALLBACK_PER_1K,
                        output_per_1k: BLENDED_FALLBACK_PER_1K,
                    }),
                    source: MatchSource::BlendedFallback,
                }
            }
        }
    }

    /// Resolve for a known provider
    pub fn resolve_for(&self, provider: Provider, model: &str) -> Resolution {
        let normalized = normalize_model_name(model);

        if let Some((key, rate)) =
            Self::find_special(pricing_table::special_families_for(provider), &normalized)
        {
            debug!("Resolved {} to special-unit model {}", model, key);
            return Resolution {
                provider: Some(provider),
                normalized,
                matched_key: Some(key),
                rate: Rate::Special(rate),
                source: MatchSource::Special,
            };
        }

        if let Some(entry) = Self::find_entry(pricing_table::models_for(provider), &normalized) {
            debug!("Resolved {} to {}", model, entry.key);
            return Resolution {
                provider: Some(provider),
                normalized,
                matched_key: Some(entry.key),
                rate: Rate::Token(entry.rate),
                source: MatchSource::Table,
            };
        }

        let default_key = pricing_table::default_model_for(provider);
        warn!(
            "No pricing for {} model '{}', charging as {}",
            provider, model, default_key
        );
        let rate = pricing_table::lookup(provider, default_key)
            .map(|entry| entry.rate)
            .unwrap_or(TokenRate {
                input_per_1k: BLENDED_FALLBACK_PER_1K,
                output_per_1k: BLENDED_FALLBACK_PER_1K,
            });
        Resolution {
            provider: Some(provider),
            normalized,
            matched_key: Some(default_key),
            rate: Rate::Token(rate),
            source: MatchSource::ProviderDefault,
        }
    }

    /// First table row whose key occurs in the normalized name
    fn find_entry<'a>(entries: &'a [PricingEntry], normalized: &str) -> Option<&'a PricingEntry> {
        entries.iter().find(|entry| normalized.contains(entry.key))
    }

    fn find_special(
        families: &[SpecialFamily],
        normalized: &str,
    ) -> Option<(&'static str, SpecialUnitRate)> {
        let family = families
            .iter()
            .find(|family| normalized.starts_with(family.prefix))?;

        let (key, rate) = family
            .variants
            .iter()
            .find(|(key, _)| normalized.starts_with(key))
            .copied()
            .unwrap_or((family.default_key, family.default_rate));

        Some((
            key,
            SpecialUnitRate {
                unit: family.unit,
                rate,
            },
        ))
    }
}
