//! Output formatting module for tokmeter
//!
//! This module provides formatters for displaying usage data in different formats:
//! - Table format for human-readable terminal output
//! - JSON format for machine-readable output and integration with other tools
//!
//! # Examples
//!
//! ```
//! use tokmeter_terminal::get_formatter;
//! use tokmeter_core::aggregation_types::Totals;
//!
//! let formatter = get_formatter(true);
//! let output = formatter.format_all_users(&[], &Totals::default());
//! assert!(output.contains("\"users\""));
//! ```

use crate::progress::BudgetBar;
use chrono::{DateTime, Utc};
use prettytable::{Table, format, row};
use serde_json::{Value, json};
use tokmeter_core::aggregation_types::{ModelCostComparison, SessionSummary, Totals, UserAggregate};
use tokmeter_core::{Cost, Currency, TokenUsage, UsageRecord, UserId};
use tokmeter_pricing::{ExchangeRate, Rate, Resolution};

/// Trait for output formatters
///
/// Each CLI subcommand and MCP tool result has one method here, so a new
/// output format only has to implement this trait.
pub trait OutputFormatter {
    /// A single freshly recorded usage
    fn format_record(&self, record: &UsageRecord) -> String;

    /// One user's running total with per-model breakdown
    fn format_user_summary(&self, summary: &UserAggregate) -> String;

    /// Every user's running total with grand totals
    fn format_all_users(&self, data: &[UserAggregate], totals: &Totals) -> String;

    /// Current session against its token budget
    fn format_session_summary(&self, summary: &SessionSummary) -> String;

    /// Most recent records for a user, oldest first
    fn format_history(&self, user_id: &UserId, records: &[UsageRecord]) -> String;

    /// Models ranked by cost
    fn format_comparison(&self, data: &[ModelCostComparison]) -> String;

    /// Cached or refreshed exchange rate
    fn format_exchange_rate(&self, rate: &ExchangeRate) -> String;

    /// Price of one request on a resolved model
    fn format_price(&self, resolution: &Resolution, usage: TokenUsage, cost: f64) -> String;
}

/// Table formatter for human-readable output
///
/// Numbers are formatted with thousands separators and costs with the
/// currency symbol and the currency's display precision.
pub struct TableFormatter {
    budget_bar: BudgetBar,
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            budget_bar: BudgetBar::default(),
        }
    }

    /// Use a specific budget bar (tests disable colors this way)
    pub fn with_budget_bar(mut self, budget_bar: BudgetBar) -> Self {
        self.budget_bar = budget_bar;
        self
    }

    /// Format a number with thousands separators
    fn format_number(n: u64) -> String {
        let s = n.to_string();
        let mut result = String::new();

        for (count, ch) in s.chars().rev().enumerate() {
            if count > 0 && count % 3 == 0 {
                result.push(',');
            }
            result.push(ch);
        }

        result.chars().rev().collect()
    }

    fn format_money(amount: f64, currency: Currency) -> String {
        Cost::new(amount, currency).to_string()
    }

    fn format_timestamp(ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }

    fn new_table() -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table
    }

    fn breakdown_table(summary: &UserAggregate) -> Table {
        let mut table = Self::new_table();
        table.set_titles(row![b -> "Model", b -> "Tokens", b -> "Cost"]);

        let mut models: Vec<_> = summary.model_breakdown.iter().collect();
        models.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost).then_with(|| a.0.cmp(b.0)));
        for (model, usage) in models {
            table.add_row(row![
                model,
                r -> Self::format_number(usage.tokens),
                r -> Self::format_money(usage.cost, summary.currency)
            ]);
        }
        table
    }
}

impl OutputFormatter for TableFormatter {
    fn format_record(&self, record: &UsageRecord) -> String {
        let mut table = Self::new_table();
        table.set_titles(row![b -> "Field", b -> "Value"]);
        table.add_row(row!["User", record.user_id]);
        table.add_row(row!["Provider", record.provider]);
        table.add_row(row!["Model", record.model]);
        table.add_row(row!["Input", r -> Self::format_number(record.input_tokens)]);
        table.add_row(row!["Output", r -> Self::format_number(record.output_tokens)]);
        table.add_row(row!["Total", r -> Self::format_number(record.total_tokens)]);
        table.add_row(row!["Cost", r -> record.cost]);
        table.add_row(row!["Time", Self::format_timestamp(&record.timestamp)]);
        table.to_string()
    }

    fn format_user_summary(&self, summary: &UserAggregate) -> String {
        let mut output = String::new();
        output.push_str(&format!("User: {}\n", summary.user_id));
        output.push_str(&format!(
            "Total tokens: {}  Requests: {}  Cost: {}\n",
            Self::format_number(summary.total_tokens),
            Self::format_number(summary.request_count),
            Self::format_money(summary.total_cost, summary.currency)
        ));
        output.push_str(&format!(
            "Last used: {}\n\n",
            Self::format_timestamp(&summary.last_used)
        ));
        output.push_str(&Self::breakdown_table(summary).to_string());
        output
    }

    fn format_all_users(&self, data: &[UserAggregate], totals: &Totals) -> String {
        if data.is_empty() {
            return "No usage recorded.\n".to_string();
        }

        let mut table = Self::new_table();
        table.set_titles(row![
            b -> "User",
            b -> "Requests",
            b -> "Tokens",
            b -> "Cost",
            b -> "Last Used"
        ]);

        for aggregate in data {
            table.add_row(row![
                aggregate.user_id,
                r -> Self::format_number(aggregate.request_count),
                r -> Self::format_number(aggregate.total_tokens),
                r -> Self::format_money(aggregate.total_cost, aggregate.currency),
                Self::format_timestamp(&aggregate.last_used)
            ]);
        }

        let currency = data.last().map(|a| a.currency).unwrap_or_default();
        table.add_row(row![
            b -> format!("TOTAL ({} users)", totals.users),
            b -> Self::format_number(totals.request_count),
            b -> Self::format_number(totals.total_tokens),
            b -> Self::format_money(totals.total_cost, currency),
            ""
        ]);
        table.to_string()
    }

    fn format_session_summary(&self, summary: &SessionSummary) -> String {
        format!(
            "Session: {}\nUser: {}\nTokens: {} / {} ({} remaining)\n{}\nRequests: {}  Cost: {}\n",
            summary.session_id,
            summary.user_id,
            Self::format_number(summary.used_tokens),
            Self::format_number(summary.budget_tokens),
            Self::format_number(summary.remaining_tokens),
            self.budget_bar.render(summary.percent_used),
            Self::format_number(summary.request_count),
            Self::format_money(summary.total_cost, summary.currency)
        )
    }

    fn format_history(&self, user_id: &UserId, records: &[UsageRecord]) -> String {
        if records.is_empty() {
            return format!("No usage recorded for {user_id}.\n");
        }

        let mut table = Self::new_table();
        table.set_titles(row![
            b -> "Time",
            b -> "Provider",
            b -> "Model",
            b -> "Input",
            b -> "Output",
            b -> "Total",
            b -> "Cost"
        ]);
        for record in records {
            table.add_row(row![
                Self::format_timestamp(&record.timestamp),
                record.provider,
                record.model,
                r -> Self::format_number(record.input_tokens),
                r -> Self::format_number(record.output_tokens),
                r -> Self::format_number(record.total_tokens),
                r -> record.cost
            ]);
        }
        table.to_string()
    }

    fn format_comparison(&self, data: &[ModelCostComparison]) -> String {
        let mut table = Self::new_table();
        table.set_titles(row![
            b -> "Rank",
            b -> "Provider",
            b -> "Model",
            b -> "Input",
            b -> "Output",
            b -> "Cost (USD)"
        ]);
        for comparison in data {
            table.add_row(row![
                r -> comparison.rank,
                comparison.provider,
                comparison.model,
                r -> Self::format_number(comparison.input_tokens),
                r -> Self::format_number(comparison.output_tokens),
                r -> Cost::usd(comparison.cost)
            ]);
        }
        table.to_string()
    }

    fn format_exchange_rate(&self, rate: &ExchangeRate) -> String {
        format!(
            "1 USD = {:.2} KRW\nUpdated: {}\nSource: {}\n",
            rate.rate,
            Self::format_timestamp(&rate.last_updated),
            rate.source
        )
    }

    fn format_price(&self, resolution: &Resolution, usage: TokenUsage, cost: f64) -> String {
        let rate = match resolution.rate {
            Rate::Token(token) => format!(
                "${} / 1K input, ${} / 1K output",
                token.input_per_1k, token.output_per_1k
            ),
            Rate::Special(special) => format!("${} per {:?}", special.rate, special.unit),
        };
        let provider = resolution
            .provider
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Model: {} ({})\nCharged as: {} [{:?}]\nRate: {}\nUnits: {} in, {} out\nCost: {}\n",
            resolution.normalized,
            provider,
            resolution.matched_key.unwrap_or("blended rate"),
            resolution.source,
            rate,
            Self::format_number(usage.input_tokens),
            Self::format_number(usage.output_tokens),
            Cost::usd(cost)
        )
    }
}

/// JSON formatter for machine-readable output
///
/// Field names follow the camelCase serialization of the core types.
pub struct JsonFormatter;

impl JsonFormatter {
    fn pretty(value: Value) -> String {
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
    }

    fn to_value<T: serde::Serialize>(data: &T) -> Value {
        serde_json::to_value(data).unwrap_or(Value::Null)
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_record(&self, record: &UsageRecord) -> String {
        Self::pretty(Self::to_value(record))
    }

    fn format_user_summary(&self, summary: &UserAggregate) -> String {
        Self::pretty(Self::to_value(summary))
    }

    fn format_all_users(&self, data: &[UserAggregate], totals: &Totals) -> String {
        Self::pretty(json!({
            "users": Self::to_value(&data),
            "totals": Self::to_value(totals),
        }))
    }

    fn format_session_summary(&self, summary: &SessionSummary) -> String {
        Self::pretty(Self::to_value(summary))
    }

    fn format_history(&self, user_id: &UserId, records: &[UsageRecord]) -> String {
        Self::pretty(json!({
            "userId": user_id,
            "count": records.len(),
            "records": Self::to_value(&records),
        }))
    }

    fn format_comparison(&self, data: &[ModelCostComparison]) -> String {
        Self::pretty(json!({ "comparison": Self::to_value(&data) }))
    }

    fn format_exchange_rate(&self, rate: &ExchangeRate) -> String {
        Self::pretty(json!({
            "base": "USD",
            "target": "KRW",
            "rate": rate.rate,
            "lastUpdated": rate.last_updated.to_rfc3339(),
            "source": rate.source,
        }))
    }

    fn format_price(&self, resolution: &Resolution, usage: TokenUsage, cost: f64) -> String {
        Self::pretty(json!({
            "resolution": Self::to_value(resolution),
            "inputTokens": usage.input_tokens,
            "outputTokens": usage.output_tokens,
            "cost": cost,
        }))
    }
}

/// Get the appropriate formatter based on output preference
pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(TableFormatter::new())
    }
}
