//! Tracking sessions
//!
//! A tracking session bridges one external API call: [`SessionManager::start`]
//! hands out a [`TrackingId`] before the call, and [`SessionManager::end`]
//! consumes it afterwards, turning the reported usage into a priced
//! [`UsageRecord`]. An id can be ended exactly once.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokmeter_core::error::{Result, TokmeterError};
use tokmeter_core::{
    Cost, Currency, ModelName, PartialUsage, SessionId, TrackingId, UsageRecord, UserId,
};
use tokmeter_pricing::CostCalculator;
use tokmeter_pricing::pricing_table::default_model_for;
use tracing::{debug, info};

/// An open tracking session
#[derive(Debug, Clone)]
pub struct TrackingSession {
    pub user_id: UserId,
    pub session_id: Option<SessionId>,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl TrackingSession {
    /// Time since `start`
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// How recorded costs are computed and expressed
#[derive(Debug, Clone, Copy)]
pub struct CostPolicy {
    pub calculator: CostCalculator,
    pub currency: Currency,
    /// Units of `currency` per USD
    pub usd_rate: f64,
}

impl CostPolicy {
    pub fn new(currency: Currency, usd_rate: f64) -> Self {
        Self {
            calculator: CostCalculator::new(),
            currency,
            usd_rate,
        }
    }

    /// Cost in the configured currency
    ///
    /// A caller-supplied cost is taken as USD and converted like a computed one.
    pub fn cost_for(&self, usage: &PartialUsage, model: &ModelName) -> Cost {
        let provider = usage.provider.unwrap_or_default();
        let usd = usage.cost.unwrap_or_else(|| {
            self.calculator.calculate_for(
                provider,
                model.as_str(),
                usage.input_tokens,
                usage.output_tokens,
            )
        });
        let amount = match self.currency {
            Currency::Usd => usd,
            Currency::Krw => usd * self.usd_rate,
        };
        Cost::new(amount, self.currency)
    }
}

/// Open tracking sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<TrackingId, TrackingSession>,
    /// Sessions older than this are dropped on the next `start`
    ttl: Option<Duration>,
}

impl SessionManager {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    /// Open a session and return its id
    pub fn start(&mut self, user_id: UserId, session_id: Option<SessionId>) -> TrackingId {
        if self.ttl.is_some() {
            self.sweep_expired();
        }

        let id = TrackingId::generate();
        debug!("Started tracking {} for {}", id, user_id);
        self.sessions.insert(
            id.clone(),
            TrackingSession {
                user_id,
                session_id,
                started_at: Utc::now(),
                started: Instant::now(),
            },
        );
        id
    }

    /// Remove an open session without recording anything
    pub fn take(&mut self, id: &TrackingId) -> Result<TrackingSession> {
        self.sessions
            .remove(id)
            .ok_or_else(|| TokmeterError::UnknownSession(id.clone()))
    }

    /// Close a session and build its priced record
    ///
    /// Missing fields are filled in: provider defaults to OpenAI, model to the
    /// provider's default model, total to input + output. Timing metadata
    /// (`start_time`, `end_time`, `duration_ms`) is attached; caller metadata
    /// with the same keys wins.
    pub fn end(
        &mut self,
        id: &TrackingId,
        usage: PartialUsage,
        policy: &CostPolicy,
    ) -> Result<UsageRecord> {
        let session = self.take(id)?;
        let ended_at = Utc::now();
        let duration_ms = session.elapsed().as_millis() as u64;

        let provider = usage.provider.unwrap_or_default();
        let model = usage
            .model
            .clone()
            .unwrap_or_else(|| ModelName::new(default_model_for(provider)));
        let cost = policy.cost_for(&usage, &model);

        let mut metadata = serde_json::Map::new();
        metadata.insert("tracking_id".into(), json!(id));
        metadata.insert("start_time".into(), json!(session.started_at.to_rfc3339()));
        metadata.insert("end_time".into(), json!(ended_at.to_rfc3339()));
        metadata.insert("duration_ms".into(), json!(duration_ms));
        metadata.extend(usage.metadata);

        let record = UsageRecord {
            provider,
            model,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage
                .total_tokens
                .unwrap_or(usage.input_tokens.saturating_add(usage.output_tokens)),
            cost,
            timestamp: ended_at,
            user_id: session.user_id,
            session_id: session.session_id,
            metadata,
        };
        debug!(
            "Ended tracking {} after {}ms: {} units, {}",
            id, duration_ms, record.total_tokens, record.cost
        );
        Ok(record)
    }

    /// Drop sessions older than the TTL; returns how many were dropped
    pub fn sweep_expired(&mut self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.elapsed() < ttl);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            info!("Dropped {} tracking sessions older than {:?}", dropped, ttl);
        }
        dropped
    }

    pub fn contains(&self, id: &TrackingId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokmeter_core::Provider;

    fn usd_policy() -> CostPolicy {
        CostPolicy::new(Currency::Usd, 1.0)
    }

    #[test]
    fn test_start_end_prices_with_defaults() {
        let mut manager = SessionManager::default();
        let id = manager.start(UserId::new("alice"), None);
        assert!(manager.contains(&id));

        let record = manager
            .end(&id, PartialUsage::new(100, 50), &usd_policy())
            .unwrap();

        assert_eq!(record.provider, Provider::OpenAi);
        assert_eq!(record.model.as_str(), "gpt-3.5-turbo");
        assert_eq!(record.total_tokens, 150);
        // (100/1000)*0.0005 + (50/1000)*0.0015
        assert!((record.cost.amount - 0.000125).abs() < 1e-12);
        assert!(record.metadata.contains_key("duration_ms"));
        assert!(record.metadata.contains_key("start_time"));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_double_end_is_unknown_session() {
        let mut manager = SessionManager::default();
        let id = manager.start(UserId::new("alice"), None);
        manager.end(&id, PartialUsage::new(1, 1), &usd_policy()).unwrap();

        let err = manager
            .end(&id, PartialUsage::new(1, 1), &usd_policy())
            .unwrap_err();
        assert!(matches!(err, TokmeterError::UnknownSession(ref unknown) if unknown == &id));
    }

    #[test]
    fn test_never_issued_id_is_unknown_session() {
        let mut manager = SessionManager::default();
        let result = manager.end(
            &TrackingId::new("track_0_missing"),
            PartialUsage::new(1, 1),
            &usd_policy(),
        );
        assert!(matches!(result, Err(TokmeterError::UnknownSession(_))));
    }

    #[test]
    fn test_explicit_total_and_cost_are_kept() {
        let mut manager = SessionManager::default();
        let id = manager.start(UserId::new("alice"), Some(SessionId::new("s1")));
        let usage = PartialUsage::new(10, 10)
            .with_provider(Provider::Anthropic)
            .with_model("claude-3-opus")
            .with_total(25)
            .with_cost(0.5)
            .with_metadata("duration_ms", 7);

        let record = manager.end(&id, usage, &usd_policy()).unwrap();
        assert_eq!(record.total_tokens, 25);
        assert_eq!(record.cost.amount, 0.5);
        assert_eq!(record.session_id, Some(SessionId::new("s1")));
        // Caller metadata overrides timing metadata
        assert_eq!(record.metadata["duration_ms"], 7);
    }

    #[test]
    fn test_krw_conversion() {
        let mut manager = SessionManager::default();
        let id = manager.start(UserId::new("alice"), None);
        let policy = CostPolicy::new(Currency::Krw, 1350.0);
        let record = manager
            .end(&id, PartialUsage::new(0, 0).with_cost(2.0), &policy)
            .unwrap();
        assert_eq!(record.cost, Cost::new(2700.0, Currency::Krw));
    }

    #[test]
    fn test_sweep_expired() {
        let mut manager = SessionManager::new(Some(Duration::ZERO));
        let id = manager.start(UserId::new("alice"), None);
        assert_eq!(manager.sweep_expired(), 1);
        assert!(!manager.contains(&id));

        let mut without_ttl = SessionManager::new(None);
        without_ttl.start(UserId::new("alice"), None);
        assert_eq!(without_ttl.sweep_expired(), 0);
        assert_eq!(without_ttl.len(), 1);
    }
}
