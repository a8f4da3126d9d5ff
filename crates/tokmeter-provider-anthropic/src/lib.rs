//! Anthropic adapter for tokmeter
//!
//! This crate implements the provider adapter trait for the Anthropic
//! Messages API, including its server-sent event stream.

pub mod adapter;

pub use adapter::AnthropicAdapter;
