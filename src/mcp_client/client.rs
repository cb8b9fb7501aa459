//! MCP session: the high-level interface for tool execution.
//!
//! Owns one worker process, its transport, and the tool registry for the
//! lifetime of a conversation, and drives the session state machine:
//!
//! ```text
//! Unstarted → Starting → Handshaking → Ready → ShuttingDown → Closed
//!                 └───────────┴───────────┴──→ Failed
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::errors::McpError;
use super::lifecycle::{self, WorkerProcess};
use super::registry::ToolRegistry;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    InitializeParams, InitializeResult, ListToolsResult, ServerConfig, ToolCallResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Output reported when a tool response carries no `content[0].text`.
pub const TOOL_CALL_FAILED: &str = "Error calling tool";

/// Client identity sent in `initialize`.
const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// ─── SessionState ────────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Starting,
    Handshaking,
    Ready,
    ShuttingDown,
    Closed,
    /// Terminal. The worker has been stopped; a new session is required.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Starting => "starting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// One conversation's connection to a tool worker.
pub struct McpSession {
    id: Uuid,
    config: ServerConfig,
    state: SessionState,
    transport: Option<StdioTransport>,
    worker: Option<WorkerProcess>,
    registry: ToolRegistry,
}

impl McpSession {
    /// Create an unstarted session for the given worker configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            state: SessionState::Unstarted,
            transport: None,
            worker: None,
            registry: ToolRegistry::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Tools discovered during the handshake.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.config.shutdown_grace_ms)
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<(), McpError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(McpError::NotReady {
                state: self.state.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the worker and perform the handshake.
    ///
    /// On failure the session is `Failed`, the worker has been stopped, and
    /// the error carries whatever the worker wrote to stderr.
    pub async fn start(&mut self) -> Result<(), McpError> {
        self.expect_state(SessionState::Unstarted, "start")?;
        self.state = SessionState::Starting;
        tracing::info!(session = %self.id, worker = %self.config.name, "starting session");

        let spawned = match lifecycle::spawn_worker(&self.config) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "worker spawn failed");
                self.state = SessionState::Failed;
                return Err(e);
            }
        };

        self.transport = Some(StdioTransport::new(
            &self.config.name,
            spawned.stdin,
            spawned.stdout,
        ));
        let mut process = spawned.process;
        let alive = process.is_alive();
        let exit = process.exit_status();
        self.worker = Some(process);

        if !alive {
            let reason = match exit {
                Some(status) => format!("worker exited before handshake ({status})"),
                None => "worker exited before handshake".to_string(),
            };
            let err = McpError::TransportClosed {
                server: self.config.name.clone(),
                reason,
            };
            return Err(self.fail_handshake(err).await);
        }

        self.run_handshake().await
    }

    /// Perform the handshake over an already connected transport.
    ///
    /// There is no child process to supervise; shutdown only closes the
    /// transport.
    pub async fn attach(&mut self, transport: StdioTransport) -> Result<(), McpError> {
        self.expect_state(SessionState::Unstarted, "attach")?;
        self.state = SessionState::Starting;
        self.transport = Some(transport);
        self.run_handshake().await
    }

    async fn run_handshake(&mut self) -> Result<(), McpError> {
        self.state = SessionState::Handshaking;
        match self.handshake().await {
            Ok(()) => {
                self.state = SessionState::Ready;
                tracing::info!(
                    session = %self.id,
                    worker = %self.config.name,
                    tool_count = self.registry.len(),
                    tools = ?self.registry.tool_names(),
                    "session ready"
                );
                Ok(())
            }
            Err(e) => Err(self.fail_handshake(e).await),
        }
    }

    /// `initialize`, `notifications/initialized`, then `tools/list`, each
    /// completed before the next is sent.
    async fn handshake(&mut self) -> Result<(), McpError> {
        let timeout = self.request_timeout();
        let server = self.config.name.clone();
        let transport = self.transport.as_mut().ok_or_else(|| McpError::TransportClosed {
            server: server.clone(),
            reason: "no transport".into(),
        })?;

        let params = serde_json::to_value(InitializeParams::for_client(CLIENT_NAME, CLIENT_VERSION))
            .map_err(|e| McpError::Protocol {
                server: server.clone(),
                reason: format!("failed to build initialize params: {e}"),
            })?;
        let response = transport.request("initialize", Some(params), timeout).await?;
        let result = extract_result(response)?;

        match serde_json::from_value::<InitializeResult>(result) {
            Ok(init) => {
                let info = init.server_info.as_ref();
                tracing::info!(
                    worker = %server,
                    server_name = info.and_then(|i| i.name.as_deref()).unwrap_or("unknown"),
                    server_version = info.and_then(|i| i.version.as_deref()).unwrap_or("unknown"),
                    protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
                    "worker initialized"
                );
            }
            Err(e) => {
                tracing::debug!(worker = %server, error = %e, "unrecognized initialize result");
            }
        }

        transport.notify("notifications/initialized", None).await?;

        let response = transport
            .request("tools/list", Some(serde_json::json!({})), timeout)
            .await?;
        let result = extract_result(response)?;
        let listed: ListToolsResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                server: server.clone(),
                reason: format!("malformed tools/list result: {e}"),
            })?;

        self.registry.populate(listed.tools);
        Ok(())
    }

    /// Move to `Failed`, stop the worker, and wrap `cause` with its stderr.
    async fn fail_handshake(&mut self, cause: McpError) -> McpError {
        tracing::error!(session = %self.id, worker = %self.config.name, error = %cause, "handshake failed");
        self.state = SessionState::Failed;
        self.release().await;

        let stderr = match self.worker.as_mut() {
            Some(worker) => worker.stderr_output().await,
            None => String::new(),
        };
        if !stderr.trim().is_empty() {
            tracing::warn!(worker = %self.config.name, stderr = %stderr.trim(), "worker stderr captured on failure");
        }

        McpError::HandshakeFailed {
            name: self.config.name.clone(),
            source: Box::new(cause),
            stderr,
        }
    }

    /// Close the worker's stdin and stop the process.
    async fn release(&mut self) {
        self.transport = None;
        let grace = self.shutdown_grace();
        if let Some(worker) = self.worker.as_mut() {
            worker.terminate(grace).await;
        }
    }

    /// Shut the session down, always stopping the worker.
    ///
    /// Safe to call in any state and more than once. A failed session stays
    /// `Failed`; every other state ends `Closed`.
    pub async fn shutdown(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Failed => {
                self.release().await;
                return;
            }
            _ => {}
        }

        tracing::info!(session = %self.id, worker = %self.config.name, "shutting down session");
        self.state = SessionState::ShuttingDown;
        self.release().await;
        self.state = SessionState::Closed;
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Invoke a tool on the worker.
    ///
    /// Per-call failures that leave the stream in sync (JSON-RPC error
    /// responses, `isError` results, results without text) come back as a
    /// `ToolCallResult` with `success == false`. Timeouts, protocol errors and
    /// a closed transport are returned as errors and fail the session.
    pub async fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, McpError> {
        self.expect_state(SessionState::Ready, "call tools")?;
        self.registry.validate_tool_call(tool_name, &arguments)?;

        let start = Instant::now();
        let timeout = self.request_timeout();
        let transport = self.transport.as_mut().ok_or_else(|| McpError::TransportClosed {
            server: self.config.name.clone(),
            reason: "no transport".into(),
        })?;

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let response = match transport.request("tools/call", Some(params), timeout).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_fatal() {
                    self.invalidate(&e).await;
                }
                return Err(e);
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;

        let result = match extract_result(response) {
            Ok(result) => tool_result_from_payload(tool_name, &result, elapsed),
            Err(McpError::ServerError { code, message, .. }) => ToolCallResult {
                tool_name: tool_name.to_string(),
                success: false,
                output: TOOL_CALL_FAILED.to_string(),
                error: Some(format!("[{code}] {message}")),
                execution_time_ms: elapsed,
            },
            Err(e) => return Err(e),
        };

        tracing::info!(
            session = %self.id,
            tool = tool_name,
            success = result.success,
            execution_time_ms = elapsed,
            "tool call completed"
        );
        Ok(result)
    }

    /// Fail the session after an error that may have desynchronized the stream.
    async fn invalidate(&mut self, cause: &McpError) {
        tracing::error!(session = %self.id, worker = %self.config.name, error = %cause, "session invalidated");
        self.state = SessionState::Failed;
        self.release().await;
    }
}

/// Text of `result.content[0].text`, if present.
pub fn extract_tool_text(result: &serde_json::Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
}

fn tool_result_from_payload(
    tool_name: &str,
    result: &serde_json::Value,
    elapsed: u64,
) -> ToolCallResult {
    let is_error = result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match extract_tool_text(result) {
        Some(text) if !is_error => ToolCallResult {
            tool_name: tool_name.to_string(),
            success: true,
            output: text.to_string(),
            error: None,
            execution_time_ms: elapsed,
        },
        Some(text) => ToolCallResult {
            tool_name: tool_name.to_string(),
            success: false,
            output: text.to_string(),
            error: Some(text.to_string()),
            execution_time_ms: elapsed,
        },
        None => {
            let err = McpError::ToolInvocation {
                tool: tool_name.to_string(),
                reason: "result has no content[0].text".into(),
            };
            tracing::warn!(tool = tool_name, error = %err, "tool result had unexpected shape");
            ToolCallResult {
                tool_name: tool_name.to_string(),
                success: false,
                output: TOOL_CALL_FAILED.to_string(),
                error: Some(err.to_string()),
                execution_time_ms: elapsed,
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
