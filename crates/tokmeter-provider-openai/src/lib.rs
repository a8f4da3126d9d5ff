//! OpenAI adapter for tokmeter
//!
//! This crate implements the provider adapter trait for OpenAI, reading
//! usage from Chat Completions, Embeddings and Responses API payloads.

pub mod adapter;

pub use adapter::OpenAiAdapter;
