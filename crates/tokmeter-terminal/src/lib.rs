//! Terminal output formatting for tokmeter
//!
//! This crate provides table and JSON output formatters for usage summaries,
//! history, model comparisons and exchange rates, plus the budget progress bar
//! shown in session summaries.

pub mod output;
pub mod progress;

pub use output::{JsonFormatter, OutputFormatter, TableFormatter, get_formatter};
pub use progress::BudgetBar;
