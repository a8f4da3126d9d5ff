//! Core types, traits, and configuration for tokmeter
//!
//! This crate provides the foundational types, error handling,
//! tracker configuration, and the provider adapter contract used
//! by all other tokmeter crates.

pub mod aggregation_types;
pub mod config;
pub mod error;
pub mod provider;
pub mod types;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use config::TrackerConfig;
pub use error::{Result, TokmeterError};
pub use types::{
    Cost, Currency, Metadata, ModelName, PartialUsage, Provider, SessionId, TokenUsage,
    TrackingId, UsageRecord, UserId,
};
