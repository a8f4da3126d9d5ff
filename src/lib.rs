//! tokmeter - Meter token usage and cost of LLM API calls
//!
//! This library provides functionality to:
//! - Wrap OpenAI, Anthropic and Gemini calls and record their usage
//! - Price usage from built-in per-provider tables, in USD or KRW
//! - Keep per-user running totals and history, persisted to a JSON file
//! - Compare the cost of one request across models
//! - Serve all of the above as MCP tools over stdio
//!
//! # Examples
//!
//! ```no_run
//! use tokmeter::tracked::{ClientKind, TrackedClient};
//! use tokmeter::tracker::UsageTracker;
//! use tokmeter_core::TrackerConfig;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> tokmeter::Result<()> {
//!     let tracker = UsageTracker::new(TrackerConfig::from_env()?)?.into_shared();
//!     let client = TrackedClient::new(ClientKind::OpenAi, tracker.clone());
//!
//!     let request = json!({"model": "gpt-4o-mini", "messages": [{"role": "user", "content": "hi"}]});
//!     let _response = client
//!         .call(request, |_body| async move {
//!             // Send the request body to the provider here
//!             Ok::<_, std::io::Error>(json!({"usage": {"prompt_tokens": 9, "completion_tokens": 12}}))
//!         })
//!         .await?;
//!
//!     let guard = tracker.lock().await;
//!     println!("{:?}", guard.user_summary(None));
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod cli;
pub mod mcp;
pub mod session;
pub mod storage;
pub mod tracked;
pub mod tracker;
pub mod webhook;

// Re-export commonly used types
pub use tokmeter_core::error::{Result, TokmeterError};
pub use tokmeter_core::{
    Cost, Currency, PartialUsage, Provider, SessionId, TrackerConfig, TrackingId, UsageRecord,
    UserId,
};
pub use tracked::{ClientKind, TrackedClient};
pub use tracker::{SharedTracker, UsageTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
