//! Cost calculator module for computing usage costs
//!
//! Turns unit counts into a USD cost using the rate chosen by
//! [`PricingResolver`], and ranks a list of models by what the same request
//! would cost on each of them.
//!
//! # Examples
//!
//! ```
//! use tokmeter_pricing::CostCalculator;
//!
//! let calculator = CostCalculator::new();
//!
//! // 100 input + 50 output tokens on claude-3-haiku
//! let cost = calculator.calculate_cost("anthropic", "claude-3-haiku-20240307", 100, 50);
//! assert!((cost - 0.0000875).abs() < 1e-12);
//!
//! let ranking = calculator.compare_models(1000, 1000, tokmeter_pricing::COMPARISON_MODELS);
//! assert_eq!(ranking[0].rank, 1);
//! ```

use crate::pricing_table::{BillingUnit, Rate};
use crate::resolver::{PricingResolver, Resolution};
use tokmeter_core::Provider;
use tokmeter_core::aggregation_types::ModelCostComparison;
use tracing::debug;

/// Models ranked by `compare_models` when the caller does not supply a list
pub const COMPARISON_MODELS: &[(Provider, &str)] = &[
    (Provider::OpenAi, "gpt-4o"),
    (Provider::OpenAi, "gpt-4o-mini"),
    (Provider::OpenAi, "gpt-3.5-turbo"),
    (Provider::Anthropic, "claude-3.5-sonnet"),
    (Provider::Anthropic, "claude-3-haiku"),
    (Provider::Gemini, "gemini-1.5-pro"),
    (Provider::Gemini, "gemini-1.5-flash"),
];

/// Calculates USD costs from unit counts
#[derive(Debug, Clone, Copy, Default)]
pub struct CostCalculator {
    resolver: PricingResolver,
}

impl CostCalculator {
    pub fn new() -> Self {
        Self {
            resolver: PricingResolver::new(),
        }
    }

    /// Resolver used to pick rates
    pub fn resolver(&self) -> &PricingResolver {
        &self.resolver
    }

    /// Cost in USD of `input_units`/`output_units` on a model
    ///
    /// Never fails: unmatched models and unknown providers fall back to a
    /// default rate (see [`PricingResolver::resolve`]).
    pub fn calculate_cost(
        &self,
        provider: &str,
        model: &str,
        input_units: u64,
        output_units: u64,
    ) -> f64 {
        let resolution = self.resolver.resolve(provider, model);
        Self::calculate_from_resolution(&resolution, input_units, output_units)
    }

    /// Same as [`calculate_cost`](Self::calculate_cost) for a parsed provider
    pub fn calculate_for(
        &self,
        provider: Provider,
        model: &str,
        input_units: u64,
        output_units: u64,
    ) -> f64 {
        let resolution = self.resolver.resolve_for(provider, model);
        Self::calculate_from_resolution(&resolution, input_units, output_units)
    }

    fn calculate_from_resolution(resolution: &Resolution, input_units: u64, output_units: u64) -> f64 {
        let cost = Self::calculate_from_rate(&resolution.rate, input_units, output_units);
        debug!(
            "Calculated cost: ${:.6} for {} ({} in, {} out)",
            cost, resolution.normalized, input_units, output_units
        );
        cost
    }

    /// Calculate cost from a rate without resolving
    ///
    /// Per-token rates are USD per 1,000 units. Special-unit rates read only
    /// `input_units`: an image count, a duration in seconds billed per minute,
    /// or a character count.
    pub fn calculate_from_rate(rate: &Rate, input_units: u64, output_units: u64) -> f64 {
        match rate {
            Rate::Token(token) => {
                (input_units as f64 / 1000.0) * token.input_per_1k
                    + (output_units as f64 / 1000.0) * token.output_per_1k
            }
            Rate::Special(special) => match special.unit {
                BillingUnit::Image => input_units as f64 * special.rate,
                BillingUnit::Minute => (input_units as f64 / 60.0) * special.rate,
                BillingUnit::Character => input_units as f64 * special.rate,
            },
        }
    }

    /// Rank models by the cost of the same request, cheapest first
    ///
    /// Ranks start at 1. Models with equal cost keep their input order.
    pub fn compare_models(
        &self,
        input_units: u64,
        output_units: u64,
        models: &[(Provider, &str)],
    ) -> Vec<ModelCostComparison> {
        let mut comparisons: Vec<ModelCostComparison> = models
            .iter()
            .map(|(provider, model)| ModelCostComparison {
                rank: 0,
                provider: *provider,
                model: model.to_string(),
                input_tokens: input_units,
                output_tokens: output_units,
                cost: self.calculate_for(*provider, model, input_units, output_units),
            })
            .collect();

        comparisons.sort_by(|a, b| a.cost.total_cmp(&b.cost));
        for (index, comparison) in comparisons.iter_mut().enumerate() {
            comparison.rank = index + 1;
        }
        comparisons
    }
}
