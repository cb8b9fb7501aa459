//! Inference Client: HTTP client for the language-model backend.
//!
//! This module handles all communication with the model endpoint:
//! - Ollama `/api/generate` and OpenAI-compatible `/chat/completions`
//! - Backend selection and sampling settings from config
//! - Startup connectivity probe
//!
//! The dialect is a config choice, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatBackend, InferenceClient};
pub use config::{BackendConfig, BackendKind};
pub use errors::InferenceError;
