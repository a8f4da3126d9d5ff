//! Gemini adapter for tokmeter
//!
//! This crate implements the provider adapter trait for the Gemini
//! `generateContent` and `streamGenerateContent` APIs.

pub mod adapter;

pub use adapter::GeminiAdapter;
