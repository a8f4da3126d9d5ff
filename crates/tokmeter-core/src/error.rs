//! Error types for tokmeter
//!
//! This module defines the error types used throughout the tokmeter crates.
//! All errors are derived from `thiserror` for convenient error handling
//! and automatic `From` implementations.
//!
//! Only two kinds of failure are fatal to a caller: ending a tracking session
//! that does not exist, and asking for an adapter of an unknown client kind.
//! Pricing misses, storage failures and external fetch failures are degraded
//! paths that are logged and never surface through the metering flow.
//!
//! # Example
//!
//! ```
//! use tokmeter_core::error::{Result, TokmeterError};
//!
//! fn example_function() -> Result<()> {
//!     // This will automatically convert io::Error to TokmeterError
//!     let _file = std::fs::read_to_string("nonexistent.txt")?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::types::TrackingId;

/// Main error type for tokmeter operations
#[derive(Error, Debug)]
pub enum TokmeterError {
    /// `end` was called with a tracking id that was never issued or was already consumed
    #[error("Unknown tracking session: {0}")]
    UnknownSession(TrackingId),

    /// An adapter was requested for a client kind tokmeter does not know how to wrap
    #[error("Unsupported client: {0}")]
    UnsupportedClient(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The exchange-rate endpoint answered without a usable rate
    #[error("Exchange rate unavailable: {0}")]
    ExchangeRate(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience type alias for Results in tokmeter
///
/// # Example
///
/// ```
/// use tokmeter_core::Result;
///
/// fn process_data() -> Result<String> {
///     Ok("Processed successfully".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, TokmeterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TokmeterError::UnknownSession(TrackingId::new("track-1"));
        assert_eq!(error.to_string(), "Unknown tracking session: track-1");

        let error = TokmeterError::UnsupportedClient("MistralClient".to_string());
        assert_eq!(error.to_string(), "Unsupported client: MistralClient");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: TokmeterError = io_error.into();
        assert!(matches!(error, TokmeterError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: TokmeterError = json_error.into();
        assert!(matches!(error, TokmeterError::Json(_)));
    }
}
