//! Usage aggregation
//!
//! The [`UsageAggregator`] owns every user's record history and running
//! totals. Records are appended in arrival order and never reordered or
//! deduplicated; each user's [`UserAggregate`] is kept equal to the fold of
//! that user's history.
//!
//! # Example
//!
//! ```
//! use tokmeter::aggregation::UsageAggregator;
//! use tokmeter_core::{Cost, ModelName, Provider, UsageRecord, UserId};
//!
//! let mut aggregator = UsageAggregator::new();
//! aggregator.record(UsageRecord {
//!     provider: Provider::OpenAi,
//!     model: ModelName::new("gpt-4o-mini"),
//!     input_tokens: 100,
//!     output_tokens: 50,
//!     total_tokens: 150,
//!     cost: Cost::usd(0.000045),
//!     timestamp: chrono::Utc::now(),
//!     user_id: UserId::new("alice"),
//!     session_id: None,
//!     metadata: Default::default(),
//! });
//!
//! let total = aggregator.user_total(&UserId::new("alice")).unwrap();
//! assert_eq!(total.total_tokens, 150);
//! ```

use std::collections::HashMap;
use tokmeter_core::aggregation_types::{Totals, UserAggregate};
use tokmeter_core::{SessionId, UsageRecord, UserId};
use tracing::{debug, warn};

/// Per-user history and running totals
#[derive(Debug, Default, Clone)]
pub struct UsageAggregator {
    history: HashMap<UserId, Vec<UsageRecord>>,
    totals: HashMap<UserId, UserAggregate>,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an aggregator from persisted state
    ///
    /// Totals are recomputed from history wherever stored totals are missing
    /// or disagree with it, so the loaded state always satisfies the fold
    /// invariant. Totals for users without history are dropped.
    pub fn from_parts(
        mut history: HashMap<UserId, Vec<UsageRecord>>,
        mut stored: HashMap<UserId, UserAggregate>,
    ) -> Self {
        history.retain(|_, records| !records.is_empty());

        let mut totals = HashMap::with_capacity(history.len());
        for (user_id, records) in &history {
            let Some(rebuilt) = UserAggregate::from_records(user_id.clone(), records) else {
                continue;
            };
            match stored.remove(user_id) {
                Some(total) if Self::same_totals(&total, &rebuilt) => {
                    totals.insert(user_id.clone(), total);
                }
                Some(_) => {
                    warn!("Stored totals for {} disagree with history, rebuilding", user_id);
                    totals.insert(user_id.clone(), rebuilt);
                }
                None => {
                    debug!("Rebuilding missing totals for {}", user_id);
                    totals.insert(user_id.clone(), rebuilt);
                }
            }
        }

        for user_id in stored.keys() {
            warn!("Dropping stored totals for {}: no usage history", user_id);
        }

        Self { history, totals }
    }

    fn same_totals(a: &UserAggregate, b: &UserAggregate) -> bool {
        a.total_tokens == b.total_tokens
            && a.request_count == b.request_count
            && (a.total_cost - b.total_cost).abs() < 1e-9
            && a.model_breakdown.len() == b.model_breakdown.len()
            && a.model_breakdown.iter().all(|(key, usage)| {
                b.model_breakdown.get(key).is_some_and(|other| {
                    usage.tokens == other.tokens && (usage.cost - other.cost).abs() < 1e-9
                })
            })
    }

    /// Append a record and fold it into its user's total
    pub fn record(&mut self, record: UsageRecord) -> &UserAggregate {
        let user_id = record.user_id.clone();
        debug!(
            "Recording {} units for {} on {}",
            record.total_tokens,
            user_id,
            record.breakdown_key()
        );

        let aggregate = self.totals.entry(user_id.clone()).or_insert_with(|| {
            UserAggregate::new(user_id.clone(), record.cost.currency, record.timestamp)
        });
        aggregate.apply(&record);

        self.history.entry(user_id).or_default().push(record);
        aggregate
    }

    /// Running total for a user
    pub fn user_total(&self, user_id: &UserId) -> Option<&UserAggregate> {
        self.totals.get(user_id)
    }

    /// The last `limit` records for a user, oldest first
    ///
    /// `None` returns the full history.
    pub fn history(&self, user_id: &UserId, limit: Option<usize>) -> &[UsageRecord] {
        let records = self
            .history
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        match limit {
            Some(limit) => &records[records.len().saturating_sub(limit)..],
            None => records,
        }
    }

    /// Every user's total, ordered by user id
    pub fn all_totals(&self) -> Vec<UserAggregate> {
        let mut totals: Vec<_> = self.totals.values().cloned().collect();
        totals.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        totals
    }

    /// Grand totals across users
    pub fn grand_totals(&self) -> Totals {
        Totals::from_aggregates(&self.all_totals())
    }

    /// Remove a user's history and total; other users are untouched
    ///
    /// Returns whether the user had any data.
    pub fn clear(&mut self, user_id: &UserId) -> bool {
        let had_history = self.history.remove(user_id).is_some();
        let had_total = self.totals.remove(user_id).is_some();
        had_history || had_total
    }

    /// Fold of one user's records that carry `session_id`
    pub fn session_usage(&self, user_id: &UserId, session_id: &SessionId) -> Option<UserAggregate> {
        let records: Vec<UsageRecord> = self
            .history(user_id, None)
            .iter()
            .filter(|record| record.session_id.as_ref() == Some(session_id))
            .cloned()
            .collect();
        UserAggregate::from_records(user_id.clone(), &records)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.totals.keys()
    }

    /// Number of records across all users
    pub fn record_count(&self) -> usize {
        self.history.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty() && self.history.is_empty()
    }

    pub fn history_map(&self) -> &HashMap<UserId, Vec<UsageRecord>> {
        &self.history
    }

    pub fn totals_map(&self) -> &HashMap<UserId, UserAggregate> {
        &self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tokmeter_core::{Cost, Currency, ModelName, Provider};

    fn record(user: &str, model: &str, total: u64, cost: f64, minute: u32) -> UsageRecord {
        UsageRecord {
            provider: Provider::OpenAi,
            model: ModelName::new(model),
            input_tokens: total,
            output_tokens: 0,
            total_tokens: total,
            cost: Cost::usd(cost),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
            user_id: UserId::new(user),
            session_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_record_updates_totals_and_breakdown() {
        let mut aggregator = UsageAggregator::new();
        aggregator.record(record("alice", "gpt-4o", 100, 0.5, 0));
        aggregator.record(record("alice", "gpt-4o", 50, 0.25, 1));
        let total = aggregator.record(record("alice", "gpt-4o-mini", 10, 0.01, 2));

        assert_eq!(total.total_tokens, 160);
        assert_eq!(total.request_count, 3);
        assert!((total.total_cost - 0.76).abs() < 1e-12);
        assert_eq!(total.model_breakdown["openai/gpt-4o"].tokens, 150);
        assert_eq!(total.model_breakdown["openai/gpt-4o-mini"].tokens, 10);
        assert_eq!(
            total.last_used,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 2, 0).unwrap()
        );
    }

    #[test]
    fn test_identical_records_are_not_deduplicated() {
        let mut aggregator = UsageAggregator::new();
        let r = record("alice", "gpt-4o", 100, 0.5, 0);
        aggregator.record(r.clone());
        aggregator.record(r);
        assert_eq!(aggregator.history(&UserId::new("alice"), None).len(), 2);
    }

    #[test]
    fn test_history_limit_returns_most_recent() {
        let mut aggregator = UsageAggregator::new();
        for minute in 0..5 {
            aggregator.record(record("alice", "gpt-4o", minute as u64 + 1, 0.0, minute));
        }

        let alice = UserId::new("alice");
        let last_two = aggregator.history(&alice, Some(2));
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].total_tokens, 4);
        assert_eq!(last_two[1].total_tokens, 5);

        assert_eq!(aggregator.history(&alice, Some(50)).len(), 5);
        assert!(aggregator.history(&alice, Some(0)).is_empty());
        assert!(aggregator.history(&UserId::new("nobody"), None).is_empty());
    }

    #[test]
    fn test_clear_only_affects_one_user() {
        let mut aggregator = UsageAggregator::new();
        aggregator.record(record("alice", "gpt-4o", 100, 0.5, 0));
        aggregator.record(record("bob", "gpt-4o", 200, 1.0, 0));

        assert!(aggregator.clear(&UserId::new("alice")));
        assert!(aggregator.user_total(&UserId::new("alice")).is_none());
        assert!(aggregator.history(&UserId::new("alice"), None).is_empty());
        assert_eq!(
            aggregator.user_total(&UserId::new("bob")).unwrap().total_tokens,
            200
        );
        assert!(!aggregator.clear(&UserId::new("alice")));
    }

    #[test]
    fn test_all_totals_sorted_by_user() {
        let mut aggregator = UsageAggregator::new();
        aggregator.record(record("carol", "gpt-4o", 1, 0.0, 0));
        aggregator.record(record("alice", "gpt-4o", 1, 0.0, 0));
        aggregator.record(record("bob", "gpt-4o", 1, 0.0, 0));

        let users: Vec<_> = aggregator
            .all_totals()
            .into_iter()
            .map(|t| t.user_id.to_string())
            .collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
        assert_eq!(aggregator.grand_totals().total_tokens, 3);
    }

    #[test]
    fn test_session_usage_filters_by_session() {
        let mut aggregator = UsageAggregator::new();
        let mut in_session = record("alice", "gpt-4o", 100, 0.5, 0);
        in_session.session_id = Some(SessionId::new("s1"));
        aggregator.record(in_session);
        aggregator.record(record("alice", "gpt-4o", 999, 9.0, 1));

        let usage = aggregator
            .session_usage(&UserId::new("alice"), &SessionId::new("s1"))
            .unwrap();
        assert_eq!(usage.total_tokens, 100);
        assert!(
            aggregator
                .session_usage(&UserId::new("alice"), &SessionId::new("other"))
                .is_none()
        );
    }

    #[test]
    fn test_from_parts_rebuilds_missing_and_stale_totals() {
        let mut source = UsageAggregator::new();
        source.record(record("alice", "gpt-4o", 100, 0.5, 0));
        source.record(record("bob", "gpt-4o", 40, 0.2, 0));

        let history = source.history_map().clone();
        let mut totals = source.totals_map().clone();
        totals.remove(&UserId::new("alice"));
        totals.get_mut(&UserId::new("bob")).unwrap().total_tokens = 1;

        let rebuilt = UsageAggregator::from_parts(history, totals);
        assert_eq!(
            rebuilt.user_total(&UserId::new("alice")).unwrap().total_tokens,
            100
        );
        assert_eq!(
            rebuilt.user_total(&UserId::new("bob")).unwrap().total_tokens,
            40
        );
    }

    #[test]
    fn test_from_parts_drops_totals_without_history() {
        let mut source = UsageAggregator::new();
        source.record(record("alice", "gpt-4o", 100, 0.5, 0));
        source.record(record("ghost", "gpt-4o", 999, 5.0, 0));

        let mut history = source.history_map().clone();
        let totals = source.totals_map().clone();
        history.remove(&UserId::new("ghost"));
        history.insert(UserId::new("empty"), Vec::new());

        let rebuilt = UsageAggregator::from_parts(history, totals);
        assert!(rebuilt.user_total(&UserId::new("ghost")).is_none());
        assert!(rebuilt.user_total(&UserId::new("empty")).is_none());
        assert_eq!(rebuilt.users().count(), 1);
        assert_eq!(rebuilt.grand_totals().total_tokens, 100);
    }

    #[test]
    fn test_from_parts_rebuilds_corrupted_breakdown() {
        let mut source = UsageAggregator::new();
        source.record(record("alice", "gpt-4o", 100, 0.5, 0));
        source.record(record("alice", "gpt-4o-mini", 20, 0.1, 1));

        let history = source.history_map().clone();
        let mut totals = source.totals_map().clone();
        let alice = totals.get_mut(&UserId::new("alice")).unwrap();
        // Same key count and grand total, wrong split
        alice.model_breakdown.get_mut("openai/gpt-4o").unwrap().tokens = 20;
        alice.model_breakdown.get_mut("openai/gpt-4o-mini").unwrap().tokens = 100;

        let rebuilt = UsageAggregator::from_parts(history, totals);
        let total = rebuilt.user_total(&UserId::new("alice")).unwrap();
        assert_eq!(total.model_breakdown["openai/gpt-4o"].tokens, 100);
        assert_eq!(total.model_breakdown["openai/gpt-4o-mini"].tokens, 20);

        let mut renamed = source.totals_map().clone();
        let alice = renamed.get_mut(&UserId::new("alice")).unwrap();
        let usage = alice.model_breakdown.remove("openai/gpt-4o-mini").unwrap();
        alice.model_breakdown.insert("openai/gpt-3.5-turbo".to_string(), usage);

        let rebuilt = UsageAggregator::from_parts(source.history_map().clone(), renamed);
        let total = rebuilt.user_total(&UserId::new("alice")).unwrap();
        assert!(total.model_breakdown.contains_key("openai/gpt-4o-mini"));
        assert!(!total.model_breakdown.contains_key("openai/gpt-3.5-turbo"));
    }

    #[test]
    fn test_currency_follows_latest_record() {
        let mut aggregator = UsageAggregator::new();
        aggregator.record(record("alice", "gpt-4o", 1, 0.1, 0));
        let mut krw = record("alice", "gpt-4o", 1, 135.0, 1);
        krw.cost = Cost::new(135.0, Currency::Krw);
        let total = aggregator.record(krw);
        assert_eq!(total.currency, Currency::Krw);
    }
}
