//! Common test utilities and helpers for tokmeter tests

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use tokmeter::tracker::{SharedTracker, UsageTracker};
use tokmeter_core::{
    Cost, Currency, Metadata, ModelName, Provider, SessionId, TrackerConfig, UsageRecord, UserId,
};

/// Models used across tests, one pair per provider
pub const TEST_MODELS: &[(Provider, &str)] = &[
    (Provider::OpenAi, "gpt-4o-mini"),
    (Provider::OpenAi, "gpt-4o"),
    (Provider::Anthropic, "claude-3-haiku-20240307"),
    (Provider::Anthropic, "claude-3-5-sonnet-20241022"),
    (Provider::Gemini, "gemini-1.5-flash"),
    (Provider::Gemini, "gemini-1.5-pro"),
];

/// In-memory tracker for user `alice`
pub fn memory_tracker() -> UsageTracker {
    UsageTracker::new(TrackerConfig::default().in_memory().with_user_id("alice"))
        .expect("default config is valid")
}

#[allow(dead_code)]
pub fn shared_memory_tracker() -> SharedTracker {
    memory_tracker().into_shared()
}

/// Tracker persisting to `data_file`, with its exchange-rate cache next to it
#[allow(dead_code)]
pub fn file_tracker(data_file: &Path) -> UsageTracker {
    let dir = data_file.parent().expect("data file has a parent");
    UsageTracker::new(
        TrackerConfig::default()
            .with_user_id("alice")
            .with_data_file(data_file)
            .with_exchange_rate_file(dir.join("exchange-rate.json")),
    )
    .expect("file config is valid")
}

/// Builder for creating test UsageRecord instances
#[allow(dead_code)]
pub struct UsageRecordBuilder {
    provider: Provider,
    model: String,
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
    timestamp: DateTime<Utc>,
    user_id: String,
    session_id: Option<String>,
}

impl Default for UsageRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl UsageRecordBuilder {
    pub fn new() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            cost: 0.0001,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            user_id: "alice".to_string(),
            session_id: None,
        }
    }

    pub fn with_model(mut self, provider: Provider, model: &str) -> Self {
        self.provider = provider;
        self.model = model.to_string();
        self
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user_id = user.to_string();
        self
    }

    pub fn with_session(mut self, session: &str) -> Self {
        self.session_id = Some(session.to_string());
        self
    }

    pub fn with_minute_offset(mut self, minutes: i64) -> Self {
        self.timestamp += chrono::Duration::minutes(minutes);
        self
    }

    pub fn build(self) -> UsageRecord {
        UsageRecord {
            provider: self.provider,
            model: ModelName::new(self.model),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            cost: Cost::new(self.cost, Currency::Usd),
            timestamp: self.timestamp,
            user_id: UserId::new(self.user_id),
            session_id: self.session_id.map(SessionId::new),
            metadata: Metadata::new(),
        }
    }
}

/// Assert two costs are equal within floating-point noise
#[allow(dead_code)]
pub fn assert_cost_eq(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "cost {actual} != expected {expected}"
    );
}
