//! Aggregation data types for tokmeter
//!
//! Pure data structures for aggregated usage summaries.
//! These types have no dependencies on the pricing crate or on storage.

use crate::types::{Currency, Provider, SessionId, UsageRecord, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cumulative units and cost for one `provider/model` key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Units consumed
    pub tokens: u64,
    /// Cost accumulated
    pub cost: f64,
}

/// Running total for one user
///
/// Derived entirely from the user's usage records: every field equals the
/// fold of [`UserAggregate::apply`] over the records in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregate {
    pub user_id: UserId,
    /// Sum of `total_tokens` across records
    pub total_tokens: u64,
    /// Sum of `cost.amount` across records
    pub total_cost: f64,
    /// Currency of the most recent record
    pub currency: Currency,
    /// `provider/model` -> cumulative usage
    pub model_breakdown: HashMap<String, ModelUsage>,
    /// Timestamp of the most recent record
    pub last_used: DateTime<Utc>,
    /// Number of records folded in
    #[serde(default)]
    pub request_count: u64,
}

impl UserAggregate {
    /// Create an empty aggregate for a user
    pub fn new(user_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_tokens: 0,
            total_cost: 0.0,
            currency,
            model_breakdown: HashMap::new(),
            last_used: now,
            request_count: 0,
        }
    }

    /// Fold one record into the aggregate
    ///
    /// Unit counts saturate at `u64::MAX` instead of overflowing.
    pub fn apply(&mut self, record: &UsageRecord) {
        self.total_tokens = self.total_tokens.saturating_add(record.total_tokens);
        self.total_cost += record.cost.amount;
        self.currency = record.cost.currency;
        self.last_used = record.timestamp;
        self.request_count = self.request_count.saturating_add(1);

        let entry = self
            .model_breakdown
            .entry(record.breakdown_key())
            .or_default();
        entry.tokens = entry.tokens.saturating_add(record.total_tokens);
        entry.cost += record.cost.amount;
    }

    /// Rebuild an aggregate from a full record sequence
    ///
    /// Returns `None` for an empty sequence.
    pub fn from_records(user_id: UserId, records: &[UsageRecord]) -> Option<Self> {
        let first = records.first()?;
        let mut aggregate = Self::new(user_id, first.cost.currency, first.timestamp);
        for record in records {
            aggregate.apply(record);
        }
        Some(aggregate)
    }
}

/// Usage of one session measured against a token budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub user_id: UserId,
    pub session_id: SessionId,
    /// Units consumed in the session
    pub used_tokens: u64,
    /// Configured budget
    pub budget_tokens: u64,
    /// `budget - used`, floored at zero
    pub remaining_tokens: u64,
    /// `used / budget * 100`, may exceed 100
    pub percent_used: f64,
    pub total_cost: f64,
    pub currency: Currency,
    pub request_count: u64,
}

impl SessionSummary {
    /// Build a summary from the session's record fold
    pub fn new(
        user_id: UserId,
        session_id: SessionId,
        used: Option<&UserAggregate>,
        budget_tokens: u64,
        currency: Currency,
    ) -> Self {
        let (used_tokens, total_cost, request_count, currency) = match used {
            Some(agg) => (
                agg.total_tokens,
                agg.total_cost,
                agg.request_count,
                agg.currency,
            ),
            None => (0, 0.0, 0, currency),
        };
        let percent_used = if budget_tokens == 0 {
            if used_tokens == 0 { 0.0 } else { 100.0 }
        } else {
            used_tokens as f64 / budget_tokens as f64 * 100.0
        };

        Self {
            user_id,
            session_id,
            used_tokens,
            budget_tokens,
            remaining_tokens: budget_tokens.saturating_sub(used_tokens),
            percent_used,
            total_cost,
            currency,
            request_count,
        }
    }
}

/// One row of a cross-model cost comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostComparison {
    /// 1-based position in ascending cost order
    pub rank: usize,
    pub provider: Provider,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost in USD
    pub cost: f64,
}

/// Grand total across users
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub users: usize,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub request_count: u64,
}

impl Totals {
    pub fn from_aggregates(aggregates: &[UserAggregate]) -> Self {
        let mut totals = Self {
            users: aggregates.len(),
            ..Self::default()
        };
        for aggregate in aggregates {
            totals.total_tokens = totals.total_tokens.saturating_add(aggregate.total_tokens);
            totals.total_cost += aggregate.total_cost;
            totals.request_count = totals.request_count.saturating_add(aggregate.request_count);
        }
        totals
    }
}
