//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can occur while running the conversation loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Reading user input or writing output failed.
    #[error("terminal I/O error: {reason}")]
    Io { reason: String },

    /// The tool session rejected or failed a call.
    #[error("tool execution failed: {source}")]
    Session {
        #[from]
        source: McpError,
    },

    /// The language-model backend failed.
    #[error("model request failed: {source}")]
    Inference {
        #[from]
        source: InferenceError,
    },
}

impl AgentError {
    /// Whether the loop must stop: the terminal is gone or the session can
    /// no longer execute tools.
    pub fn is_fatal(&self) -> bool {
        match self {
            AgentError::Io { .. } => true,
            AgentError::Session { source } => source.is_fatal(),
            AgentError::Inference { .. } => false,
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io {
            reason: e.to_string(),
        }
    }
}
