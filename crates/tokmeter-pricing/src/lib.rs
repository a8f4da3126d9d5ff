//! Pricing resolution and cost calculation for tokmeter
//!
//! This crate holds the static per-model pricing table, resolves raw model
//! strings from three providers to a rate, turns unit counts into USD costs,
//! and maintains the cached USD exchange rate used for non-USD currencies.

pub mod cost_calculator;
pub mod exchange_rate;
pub mod pricing_table;
pub mod resolver;

pub use cost_calculator::{COMPARISON_MODELS, CostCalculator};
pub use exchange_rate::{ExchangeRate, ExchangeRateProvider};
pub use pricing_table::{BillingUnit, Rate, SpecialUnitRate, TokenRate};
pub use resolver::{MatchSource, PricingResolver, Resolution, normalize_model_name};
