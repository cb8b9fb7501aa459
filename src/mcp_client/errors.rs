//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The worker process could not be launched.
    #[error("failed to spawn worker '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// No response line arrived within the configured window.
    #[error("'{method}' request to '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// A response line could not be parsed, or its id did not match.
    #[error("protocol error from '{server}': {reason}")]
    Protocol {
        server: String,
        reason: String,
    },

    /// The worker's streams are closed or the process has exited.
    #[error("transport to '{server}' closed: {reason}")]
    TransportClosed {
        server: String,
        reason: String,
    },

    /// Worker returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The initialize / tools/list exchange did not complete.
    #[error("worker '{name}' handshake failed: {source}{}", format_stderr_suffix(.stderr))]
    HandshakeFailed {
        name: String,
        #[source]
        source: Box<McpError>,
        stderr: String,
    },

    /// Tool not found in the registry.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments {
        tool: String,
        reason: String,
    },

    /// The response matched the request but carried no usable payload.
    #[error("tool '{tool}' returned no result: {reason}")]
    ToolInvocation {
        tool: String,
        reason: String,
    },

    /// Operation requested in a session state that does not accept it.
    #[error("session is {state}, cannot {operation}")]
    NotReady {
        state: String,
        operation: String,
    },
}

impl McpError {
    /// Whether this error leaves the session unusable.
    ///
    /// Timeouts and protocol errors may leave a late or half-read line on the
    /// stream, so they invalidate the session just like a closed transport.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::Timeout { .. }
                | McpError::Protocol { .. }
                | McpError::TransportClosed { .. }
                | McpError::HandshakeFailed { .. }
        )
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub(crate) fn format_stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_failed_includes_stderr() {
        let err = McpError::HandshakeFailed {
            name: "calc".into(),
            source: Box::new(McpError::TransportClosed {
                server: "calc".into(),
                reason: "stdout closed".into(),
            }),
            stderr: "bind failed\n".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("stdout closed"));
        assert!(msg.ends_with("| stderr: bind failed"));
    }

    #[test]
    fn test_handshake_failed_without_stderr() {
        let err = McpError::HandshakeFailed {
            name: "calc".into(),
            source: Box::new(McpError::Timeout {
                server: "calc".into(),
                method: "initialize".into(),
                timeout_ms: 10,
            }),
            stderr: "  \n".into(),
        };
        assert!(!err.to_string().contains("stderr"));
    }

    #[test]
    fn test_is_fatal_classification() {
        assert!(McpError::Timeout {
            server: "s".into(),
            method: "tools/call".into(),
            timeout_ms: 1
        }
        .is_fatal());
        assert!(McpError::Protocol {
            server: "s".into(),
            reason: "id mismatch".into()
        }
        .is_fatal());
        assert!(!McpError::UnknownTool { name: "x".into() }.is_fatal());
        assert!(!McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None
        }
        .is_fatal());
    }
}
