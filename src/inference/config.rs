//! Backend configuration.
//!
//! The `backend` section of `toolchat.yaml`: which wire dialect to speak, where
//! the endpoint lives, and the sampling parameters sent with each request.

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Which HTTP API the backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Ollama's `POST /api/generate` with a flattened prompt.
    Ollama,
    /// OpenAI-compatible `POST /chat/completions` with system + user messages.
    Openai,
}

impl BackendKind {
    /// Name shown to the user ("Ollama", "OpenAI API").
    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::Ollama => "Ollama",
            BackendKind::Openai => "OpenAI API",
        }
    }
}

/// Backend endpoint and sampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_kind")]
    pub kind: BackendKind,
    /// For `ollama` the server root, for `openai` the `/v1` base.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_kind() -> BackendKind {
    BackendKind::Ollama
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen3:1.7b".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Reject values that cannot produce a working client.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(InferenceError::ConfigError {
                reason: format!("backend base_url must be http(s): '{}'", self.base_url),
            });
        }
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "backend model must not be empty".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(InferenceError::ConfigError {
                reason: "backend timeout_secs must be positive".into(),
            });
        }
        Ok(())
    }

    /// Full URL of the completion endpoint for this backend kind.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.kind {
            BackendKind::Ollama => format!("{base}/api/generate"),
            BackendKind::Openai => format!("{base}/chat/completions"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
