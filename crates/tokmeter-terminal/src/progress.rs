//! Budget progress bar
//!
//! Renders how much of a session's token budget has been used as an ASCII
//! bar, colored green, yellow or red as usage approaches and passes the
//! budget.

use colored::*;

const PROGRESS_FULL: &str = "#";
const PROGRESS_EMPTY: &str = ".";

/// Default bar width in characters, excluding brackets
pub const DEFAULT_BAR_WIDTH: usize = 30;

/// Usage at or above this percentage is shown as a warning
const WARNING_THRESHOLD: f64 = 80.0;

/// Usage at or above this percentage is shown as exceeded
const EXCEEDED_THRESHOLD: f64 = 100.0;

/// Budget status derived from a usage percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Normal,
    Warning,
    Exceeded,
}

impl BudgetStatus {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= EXCEEDED_THRESHOLD {
            Self::Exceeded
        } else if percentage >= WARNING_THRESHOLD {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "OK",
            Self::Warning => "WARNING",
            Self::Exceeded => "EXCEEDED",
        }
    }
}

/// Renders `[#####.....]` style bars
#[derive(Debug, Clone, Copy)]
pub struct BudgetBar {
    width: usize,
    /// Whether to use colored output (respects NO_COLOR environment variable)
    colored_output: bool,
}

impl Default for BudgetBar {
    fn default() -> Self {
        Self::new(DEFAULT_BAR_WIDTH)
    }
}

impl BudgetBar {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            colored_output: std::env::var("NO_COLOR").is_err(),
        }
    }

    /// Force colors on or off
    pub fn with_color(mut self, colored_output: bool) -> Self {
        self.colored_output = colored_output;
        self
    }

    /// Plain bar; percentages outside 0..=100 are clamped
    pub fn render_plain(&self, percentage: f64) -> String {
        let clamped = if percentage.is_finite() {
            percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let filled = (((clamped / 100.0) * self.width as f64) as usize).min(self.width);
        let empty = self.width.saturating_sub(filled);
        format!(
            "[{}{}]",
            PROGRESS_FULL.repeat(filled),
            PROGRESS_EMPTY.repeat(empty)
        )
    }

    /// Bar followed by the percentage and a status label
    pub fn render(&self, percentage: f64) -> String {
        let status = BudgetStatus::from_percentage(percentage);
        let bar = self.render_plain(percentage);
        let line = format!("{} {:5.1}% {}", bar, percentage.min(999.9), status.label());

        if !self.colored_output {
            return line;
        }

        match status {
            BudgetStatus::Exceeded => line.red().to_string(),
            BudgetStatus::Warning => line.yellow().to_string(),
            BudgetStatus::Normal => line.green().to_string(),
        }
    }
}
