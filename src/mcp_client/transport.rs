//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with the worker process:
//! - Writing JSON-RPC requests to its stdin
//! - Reading JSON-RPC responses from its stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! The transport is single-flight: every method takes `&mut self`, so at
//! most one request can be awaiting a response at any time.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::errors::McpError;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a worker's stdio.
pub struct StdioTransport {
    server_name: String,
    writer: BoxedWriter,
    reader: BoxedReader,
    /// Next request id. Per transport, so ids never repeat within a session.
    next_id: u64,
}

impl StdioTransport {
    /// Create a new transport from a writer (worker stdin) and a reader
    /// (worker stdout).
    pub fn new<W, R>(server_name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader)),
            next_id: 1,
        }
    }

    /// Allocate the next request id.
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Build a request with a fresh id and exchange it.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);
        self.send_and_receive(&request, timeout).await
    }

    /// Write one request line and read back the response line for it.
    ///
    /// The timeout covers the whole exchange, including a write that blocks
    /// because the worker stopped draining its stdin. On timeout the caller's
    /// wait is abandoned; the worker may still answer later, so the session
    /// must not be reused.
    pub async fn send_and_receive(
        &mut self,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, McpError> {
        let line = encode_line(request).map_err(|reason| McpError::Protocol {
            server: self.server_name.clone(),
            reason,
        })?;

        tracing::debug!(
            server = %self.server_name,
            id = request.id,
            method = %request.method,
            bytes = line.len(),
            "sending request"
        );

        let raw = match tokio::time::timeout(timeout, self.exchange(&line)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    server = %self.server_name,
                    id = request.id,
                    method = %request.method,
                    timeout_ms = timeout.as_millis() as u64,
                    "no response before timeout"
                );
                return Err(McpError::Timeout {
                    server: self.server_name.clone(),
                    method: request.method.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let response = decode_response(&raw).map_err(|reason| McpError::Protocol {
            server: self.server_name.clone(),
            reason,
        })?;

        if response.id != request.id {
            return Err(McpError::Protocol {
                server: self.server_name.clone(),
                reason: format!(
                    "response id {} does not match request id {}",
                    response.id, request.id
                ),
            });
        }

        Ok(response)
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = encode_line(&notification).map_err(|reason| McpError::Protocol {
            server: self.server_name.clone(),
            reason,
        })?;
        self.write_line(&line).await
    }

    async fn exchange(&mut self, line: &str) -> Result<String, McpError> {
        self.write_line(line).await?;
        self.read_line().await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), McpError> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::TransportClosed {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        self.writer
            .flush()
            .await
            .map_err(|e| McpError::TransportClosed {
                server: self.server_name.clone(),
                reason: format!("failed to flush stdin: {e}"),
            })
    }

    /// Read the next non-blank line.
    async fn read_line(&mut self) -> Result<String, McpError> {
        let mut line_buf = String::new();

        loop {
            line_buf.clear();
            let bytes_read = match self.reader.read_line(&mut line_buf).await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Err(McpError::Protocol {
                        server: self.server_name.clone(),
                        reason: format!("response is not valid UTF-8: {e}"),
                    });
                }
                Err(e) => {
                    return Err(McpError::TransportClosed {
                        server: self.server_name.clone(),
                        reason: format!("failed to read from stdout: {e}"),
                    });
                }
            };

            if bytes_read == 0 {
                return Err(McpError::TransportClosed {
                    server: self.server_name.clone(),
                    reason: "worker stdout closed (process may have exited)".into(),
                });
            }

            let trimmed = line_buf.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }
}

// ─── Framing ─────────────────────────────────────────────────────────────────

/// Serialize a message as exactly one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, String> {
    let mut json =
        serde_json::to_string(message).map_err(|e| format!("failed to serialize message: {e}"))?;
    if json.contains('\n') || json.contains('\r') {
        return Err("serialized message contains a line break".into());
    }
    json.push('\n');
    Ok(json)
}

/// Parse one response line, requiring either `result` or `error`.
pub fn decode_response(line: &str) -> Result<JsonRpcResponse, String> {
    let response: JsonRpcResponse = serde_json::from_str(line)
        .map_err(|e| format!("malformed response line: {e}"))?;
    if response.result.is_none() && response.error.is_none() {
        return Err(format!(
            "response {} has neither 'result' nor 'error'",
            response.id
        ));
    }
    Ok(response)
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    const WAIT: Duration = Duration::from_secs(2);

    fn pipe() -> (StdioTransport, DuplexStream) {
        let (client, worker) = tokio::io::duplex(8192);
        let (reader, writer) = tokio::io::split(client);
        (StdioTransport::new("test", writer, reader), worker)
    }

    /// Fake worker that answers every request with the given closure.
    fn spawn_worker<F>(worker: DuplexStream, respond: F) -> tokio::task::JoinHandle<Vec<String>>
    where
        F: Fn(&JsonRpcRequest) -> Option<String> + Send + 'static,
    {
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(worker);
            let mut lines = BufReader::new(reader).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                seen.push(line.clone());
                let Ok(req) = serde_json::from_str::<JsonRpcRequest>(&line) else {
                    continue;
                };
                if let Some(reply) = respond(&req) {
                    if writer.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            seen
        })
    }

    #[tokio::test]
    async fn test_round_trip_preserves_request() {
        let (mut transport, worker) = pipe();
        let sent = JsonRpcRequest::new(
            7,
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"text": "line one\nline two", "n": 2.5}})),
        );
        let expected = sent.clone();
        let handle = spawn_worker(worker, |req| {
            Some(format!(
                "{}\n",
                json!({"jsonrpc": "2.0", "id": req.id, "result": {"echo": req}})
            ))
        });

        let response = transport.send_and_receive(&sent, WAIT).await.unwrap();
        let echoed: JsonRpcRequest =
            serde_json::from_value(response.result.unwrap()["echo"].clone()).unwrap();
        assert_eq!(echoed, expected);

        drop(transport);
        let seen = handle.await.unwrap();
        assert_eq!(seen.len(), 1, "request must occupy exactly one line");
    }

    #[tokio::test]
    async fn test_request_ids_increase() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |req| {
            Some(format!("{}\n", json!({"id": req.id, "result": {}})))
        });

        let first = transport.request("ping", None, WAIT).await.unwrap();
        let second = transport.request("ping", None, WAIT).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_id_mismatch_is_protocol_error() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |req| {
            Some(format!("{}\n", json!({"id": req.id + 40, "result": {}})))
        });

        let err = transport.request("tools/list", None, WAIT).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol { .. }), "got {err:?}");
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_silence_times_out() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |_| None);

        let timeout = Duration::from_millis(50);
        let start = std::time::Instant::now();
        let err = transport.request("tools/call", None, timeout).await.unwrap_err();
        assert!(start.elapsed() >= timeout);
        match err {
            McpError::Timeout { method, timeout_ms, .. } => {
                assert_eq!(method, "tools/call");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_worker_is_transport_closed() {
        let (mut transport, worker) = pipe();
        drop(worker);

        let err = transport.request("initialize", None, WAIT).await.unwrap_err();
        assert!(matches!(err, McpError::TransportClosed { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unparseable_line_is_protocol_error() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |_| Some("Starting calculator...\n".to_string()));

        let err = transport.request("initialize", None, WAIT).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_response_without_result_or_error_is_protocol_error() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |req| {
            Some(format!("{}\n", json!({"jsonrpc": "2.0", "id": req.id})))
        });

        let err = transport.request("tools/list", None, WAIT).await.unwrap_err();
        assert!(matches!(err, McpError::Protocol { .. }), "got {err:?}");
    }

    #[test]
    fn test_decode_accepts_null_result() {
        let resp = decode_response(r#"{"jsonrpc":"2.0","id":4,"result":null}"#).unwrap();
        assert_eq!(extract_result(resp).unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let (mut transport, worker) = pipe();
        let _handle = spawn_worker(worker, |req| {
            Some(format!("\n  \n{}\n", json!({"id": req.id, "result": {"ok": true}})))
        });

        let response = transport.request("tools/list", None, WAIT).await.unwrap();
        assert_eq!(response.result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_notify_writes_line_without_id() {
        let (mut transport, worker) = pipe();
        let handle = spawn_worker(worker, |_| None);

        transport
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        drop(transport);

        let seen = handle.await.unwrap();
        assert_eq!(seen.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&seen[0]).unwrap();
        assert_eq!(value["method"], "notifications/initialized");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_encode_line_escapes_newlines() {
        let req = JsonRpcRequest::new(1, "tools/call", Some(json!({"text": "a\nb\r\nc"})));
        let line = encode_line(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(!line.contains('\r'));
    }

    #[test]
    fn test_extract_result_success() {
        let resp = decode_response(r#"{"jsonrpc":"2.0","id":1,"result":{"text":"hello"}}"#)
            .unwrap();
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = decode_response(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        )
        .unwrap();
        match extract_result(resp).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }
}
