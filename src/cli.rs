//! CLI interface for tokmeter
//!
//! This module defines the command-line interface using clap. Every command
//! works on the same persisted usage data as the library and the MCP server.
//!
//! # Example
//!
//! ```bash
//! # Record a call made outside a tracked client
//! tokmeter track --provider anthropic --model claude-3-haiku --input 1200 --output 300
//!
//! # Totals for every user, as JSON
//! tokmeter summary --all --json
//!
//! # What would 500 input and 500 output tokens cost on each model?
//! tokmeter compare --input 500 --output 500
//!
//! # Serve the MCP tools over stdio
//! tokmeter mcp
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokmeter_core::error::{Result, TokmeterError};
use tokmeter_core::{Currency, Provider, TrackerConfig};

/// Meter token usage and cost of LLM API calls
#[derive(Parser, Debug, Clone)]
#[command(name = "tokmeter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show informational output (default is quiet mode with only warnings and errors)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Usage data file
    #[arg(long, global = true, env = "TOKMETER_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Currency for recorded costs (USD or KRW)
    #[arg(long, global = true)]
    pub currency: Option<Currency>,

    /// Keep usage in memory only
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the MCP server on stdio
    Mcp,

    /// Record usage for one API call
    Track {
        /// Provider that served the call
        #[arg(long, default_value = "openai")]
        provider: Provider,

        /// Model name as sent to the provider
        #[arg(long)]
        model: Option<String>,

        /// Input units (tokens, images, seconds or characters)
        #[arg(long, short = 'i', default_value = "0")]
        input: u64,

        /// Output units
        #[arg(long, short = 'o', default_value = "0")]
        output: u64,

        /// User to attribute the usage to
        #[arg(long, short = 'u')]
        user: Option<String>,

        /// Session to tag the record with
        #[arg(long, short = 's')]
        session: Option<String>,
    },

    /// Show usage totals
    Summary {
        /// User to summarize (defaults to the configured user)
        #[arg(long, short = 'u', conflicts_with = "all")]
        user: Option<String>,

        /// Summarize every user
        #[arg(long, short = 'a')]
        all: bool,
    },

    /// Show recent usage records
    History {
        /// User whose history to show
        #[arg(long, short = 'u')]
        user: Option<String>,

        /// Number of most recent records
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Compare the cost of one request across models
    Compare {
        /// Input tokens
        #[arg(long, short = 'i', default_value = "1000")]
        input: u64,

        /// Output tokens
        #[arg(long, short = 'o', default_value = "1000")]
        output: u64,
    },

    /// Delete one user's usage data
    Clear {
        /// User whose data is deleted
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Show the USD to KRW exchange rate
    ExchangeRate {
        /// Fetch a fresh rate even if the cached one is current
        #[arg(long)]
        refresh: bool,
    },

    /// Show how a model name is priced
    Price {
        /// Provider name
        provider: String,

        /// Model name
        model: String,

        /// Input units to price
        #[arg(long, short = 'i', default_value = "1000")]
        input: u64,

        /// Output units to price
        #[arg(long, short = 'o', default_value = "1000")]
        output: u64,
    },
}

impl Cli {
    /// Tracker configuration from the environment overlaid with CLI flags
    pub fn tracker_config(&self) -> Result<TrackerConfig> {
        let mut config = TrackerConfig::from_env()?;
        if let Some(path) = &self.data_file {
            config = config.with_data_file(path);
        }
        if let Some(currency) = self.currency {
            config = config.with_currency(currency);
        }
        if self.no_persist {
            config = config.in_memory();
        }
        config.validate()?;
        Ok(config)
    }

    /// Whether the command needs the exchange rate refreshed before it runs
    pub fn needs_exchange_rate(&self, config: &TrackerConfig) -> bool {
        config.currency != Currency::Usd
            && matches!(self.command, Some(Command::Track { .. }) | Some(Command::Mcp))
    }
}

/// Reject a limit of zero
pub fn validate_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        return Err(TokmeterError::InvalidArgument(
            "limit must be at least 1".to_string(),
        ));
    }
    Ok(limit)
}
