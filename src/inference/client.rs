//! Language-model backend client.
//!
//! Sends one system + user exchange to the configured endpoint and returns
//! the reply text. No streaming, no history, no retries.

use std::time::Duration;

use reqwest::Client as HttpClient;

use super::config::{BackendConfig, BackendKind};
use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, GenerateRequest, GenerateResponse,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Message used to probe the backend at startup.
pub const PROBE_MESSAGE: &str = "Hello";

// ─── ChatBackend ─────────────────────────────────────────────────────────────

/// Anything that can turn a system prompt and a user message into a reply.
#[allow(async_fn_in_trait)]
pub trait ChatBackend {
    async fn complete(&self, system_prompt: &str, message: &str) -> Result<String, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for the configured backend.
pub struct InferenceClient {
    http: HttpClient,
    config: BackendConfig,
    endpoint: String,
}

impl InferenceClient {
    /// Build a client from config. Does NOT check connectivity.
    pub fn from_config(config: BackendConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        let endpoint = config.endpoint();

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            endpoint,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.config.kind
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a single throwaway message to confirm the backend answers.
    pub async fn health_check(&self) -> Result<(), InferenceError> {
        let reply = self.complete("", PROBE_MESSAGE).await?;
        tracing::info!(
            endpoint = %self.endpoint,
            model = %self.config.model,
            reply_len = reply.len(),
            "backend probe succeeded"
        );
        Ok(())
    }

    async fn post_json<T: serde::Serialize>(&self, body: &T) -> Result<String, InferenceError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                "backend returned error status"
            );
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        response.text().await.map_err(|e| self.map_send_error(e))
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            }
        }
    }
}

impl ChatBackend for InferenceClient {
    async fn complete(&self, system_prompt: &str, message: &str) -> Result<String, InferenceError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.config.model,
            message_len = message.len(),
            "sending completion request"
        );

        let reply = match self.config.kind {
            BackendKind::Ollama => {
                let body = GenerateRequest {
                    model: self.config.model.clone(),
                    prompt: flatten_prompt(system_prompt, message),
                    stream: false,
                    think: false,
                };
                let text = self.post_json(&body).await?;
                parse_generate_body(&text)?
            }
            BackendKind::Openai => {
                let body = ChatCompletionRequest {
                    model: self.config.model.clone(),
                    messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(message)],
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_tokens,
                    stream: false,
                };
                let text = self.post_json(&body).await?;
                parse_chat_body(&text)?
            }
        };

        tracing::debug!(reply_len = reply.len(), "completion received");
        Ok(reply)
    }
}

// ─── Request / Response Helpers ──────────────────────────────────────────────

/// Flatten a system prompt and user message into Ollama's single prompt.
pub fn flatten_prompt(system_prompt: &str, message: &str) -> String {
    format!("System: {system_prompt}\n\nUser: {message}\n\nAssistant:")
}

/// Extract `response` from an `/api/generate` body.
pub fn parse_generate_body(body: &str) -> Result<String, InferenceError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParse {
            reason: format!("invalid JSON: {e}"),
        })?;
    parsed.response.ok_or_else(|| InferenceError::ResponseParse {
        reason: "missing 'response' field".into(),
    })
}

/// Extract `choices[0].message.content` from a `/chat/completions` body.
pub fn parse_chat_body(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParse {
            reason: format!("invalid JSON: {e}"),
        })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| InferenceError::ResponseParse {
            reason: "no choices in response".into(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
