//! Core domain types for tokmeter
//!
//! This module contains the fundamental types used throughout the tokmeter crates.
//! These types provide strong typing for common concepts like providers, model
//! names, user and session IDs, costs, and the immutable usage record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use uuid::Uuid;

/// Open key-value bag attached to every usage record
///
/// Only used for observability pass-through (durations, error flags,
/// request ids), so it is deliberately not a fixed structure.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// LLM provider whose API calls are being metered
///
/// # Examples
/// ```
/// use tokmeter_core::types::Provider;
///
/// let provider: Provider = "Anthropic".parse().unwrap();
/// assert_eq!(provider, Provider::Anthropic);
/// assert_eq!(provider.to_string(), "anthropic");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI (chat completions, responses, images, audio)
    #[default]
    OpenAi,
    /// Anthropic (messages)
    Anthropic,
    /// Google Gemini (generateContent)
    Gemini,
}

impl Provider {
    /// All supported providers, in display order
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Gemini];

    /// Lowercase identifier used in breakdown keys and persisted files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}

/// Strongly-typed model name wrapper
///
/// Holds the raw, caller-supplied model string. Normalization for pricing
/// lookups happens in the pricing resolver, never here, so records keep the
/// exact name the caller used.
///
/// # Examples
/// ```
/// use tokmeter_core::types::ModelName;
///
/// let model = ModelName::new("gpt-4o-2024-08-06");
/// assert_eq!(model.as_str(), "gpt-4o-2024-08-06");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelName(String);

impl ModelName {
    /// Create a new ModelName from any string-like type
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the user whose usage is being aggregated
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new("default")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strongly-typed session ID wrapper
///
/// A caller-chosen grouping of usage records (a conversation, a job, an MCP
/// client connection). Unrelated to [`TrackingId`], which identifies one
/// in-flight API call.
///
/// # Examples
/// ```
/// use tokmeter_core::types::SessionId;
///
/// let session = SessionId::new("chat-42");
/// assert_eq!(session.as_str(), "chat-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new SessionId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random session id
    pub fn generate() -> Self {
        Self(format!("session_{}", Uuid::new_v4().simple()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Handle for one in-flight tracked API call
///
/// Generated ids combine the creation time in milliseconds with a random
/// suffix, so ids issued within the same millisecond still differ.
///
/// # Examples
/// ```
/// use tokmeter_core::types::TrackingId;
///
/// let a = TrackingId::generate();
/// let b = TrackingId::generate();
/// assert_ne!(a, b);
/// assert!(a.as_str().starts_with("track_"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(String);

impl TrackingId {
    /// Wrap an existing id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id from the current time and a random suffix
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "track_{}_{}",
            Utc::now().timestamp_millis(),
            &suffix[..9]
        ))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency that recorded costs are expressed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// US dollars, the currency of every pricing table
    #[default]
    Usd,
    /// South Korean won, converted from USD with a cached exchange rate
    Krw,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Krw => "KRW",
        }
    }

    /// Symbol used in human-readable output
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Usd => "$",
            Self::Krw => "₩",
        }
    }

    /// Number of fractional digits shown in human-readable output
    pub fn display_decimals(&self) -> usize {
        match self {
            Self::Usd => 6,
            Self::Krw => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Self::Usd),
            "KRW" => Ok(Self::Krw),
            _ => Err(format!("Unsupported currency: {s}")),
        }
    }
}

/// A monetary amount in a given currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    /// Amount, never negative
    pub amount: f64,
    /// Currency of `amount`
    pub currency: Currency,
}

impl Cost {
    /// Create a new cost, clamping negative or NaN amounts to zero
    pub fn new(amount: f64, currency: Currency) -> Self {
        let amount = if amount.is_finite() && amount > 0.0 {
            amount
        } else {
            0.0
        };
        Self { amount, currency }
    }

    /// Create a USD cost
    pub fn usd(amount: f64) -> Self {
        Self::new(amount, Currency::Usd)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:.*}",
            self.currency.symbol(),
            self.currency.display_decimals(),
            self.amount
        )
    }
}

/// Input/output unit counts extracted from a provider response
///
/// For text models the units are tokens. Image, audio and speech models
/// overload `input_tokens` with image count, seconds, or characters.
///
/// # Examples
/// ```
/// use tokmeter_core::types::TokenUsage;
///
/// let usage = TokenUsage::new(100, 50) + TokenUsage::new(10, 5);
/// assert_eq!(usage.total(), 165);
/// ```
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    /// Input (prompt) units
    pub input_tokens: u64,
    /// Output (completion) units
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Create new TokenUsage
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Calculate total units
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One metered API call
///
/// Immutable once created. Records are appended to a per-user sequence in
/// insertion order and never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Provider that served the call
    pub provider: Provider,
    /// Model name as supplied by the caller
    pub model: ModelName,
    /// Input units
    pub input_tokens: u64,
    /// Output units
    pub output_tokens: u64,
    /// Total units, `input_tokens + output_tokens` unless supplied explicitly
    pub total_tokens: u64,
    /// Cost of the call in the tracker's currency
    pub cost: Cost,
    /// When the call completed
    pub timestamp: DateTime<Utc>,
    /// Owner of the record
    pub user_id: UserId,
    /// Optional caller session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Observability pass-through
    #[serde(default)]
    pub metadata: Metadata,
}

impl UsageRecord {
    /// Key of this record in a per-model breakdown: `provider/model`
    pub fn breakdown_key(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Usage reported when a tracking session ends
///
/// Every field except the unit counts is optional; the session manager fills
/// in the defaults (provider `openai`, total = input + output, cost from the
/// pricing table) before the record is built. A supplied `cost` is taken as
/// USD and goes through the same currency conversion as a computed one.
///
/// # Examples
/// ```
/// use tokmeter_core::types::{PartialUsage, Provider};
///
/// let usage = PartialUsage::new(100, 50)
///     .with_provider(Provider::Anthropic)
///     .with_model("claude-3-haiku-20240307");
/// assert_eq!(usage.input_tokens, 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialUsage {
    /// Provider, defaults to OpenAI
    #[serde(default)]
    pub provider: Option<Provider>,
    /// Model name
    #[serde(default)]
    pub model: Option<ModelName>,
    /// Input units
    #[serde(default)]
    pub input_tokens: u64,
    /// Output units
    #[serde(default)]
    pub output_tokens: u64,
    /// Explicit total
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Pre-computed USD cost
    #[serde(default)]
    pub cost: Option<f64>,
    /// Extra metadata merged into the record
    #[serde(default)]
    pub metadata: Metadata,
}

impl PartialUsage {
    /// Create a partial usage with unit counts only
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// Create a partial usage from extracted token counts
    pub fn from_usage(usage: TokenUsage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(ModelName::new(model));
        self
    }

    pub fn with_total(mut self, total_tokens: u64) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
