//! In-memory fake worker for tests.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::transport::StdioTransport;

/// Tools advertised by the calculator worker, trimmed to what tests need.
pub(crate) fn calculator_tools() -> Value {
    json!([
        {
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {"type": "object", "required": ["a", "b"]}
        },
        {
            "name": "square_root",
            "description": "Calculate the square root of a number",
            "inputSchema": {"type": "object", "required": ["a"]}
        }
    ])
}

/// Spawn a fake worker over an in-memory pipe.
///
/// `initialize` and `tools/list` (returning `tools`) are answered; notifications
/// are ignored; `tools/call` is answered by `on_call(id, params)`, where `None`
/// means the worker stays silent.
pub(crate) fn fake_worker<F>(tools: Value, on_call: F) -> StdioTransport
where
    F: Fn(u64, &Value) -> Option<Value> + Send + 'static,
{
    fake_worker_raw(tools, move |id, params| on_call(id, params).map(line_bytes))
}

/// Like [`fake_worker`], but `tools/call` replies are written as raw bytes.
pub(crate) fn fake_worker_raw<F>(tools: Value, on_call: F) -> StdioTransport
where
    F: Fn(u64, &Value) -> Option<Vec<u8>> + Send + 'static,
{
    let (client, worker) = tokio::io::duplex(8192);
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(worker);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = msg["id"].as_u64() else {
                continue;
            };
            let reply = match msg["method"].as_str().unwrap_or_default() {
                "initialize" => Some(line_bytes(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0.0.1"}
                    }
                }))),
                "tools/list" => Some(line_bytes(
                    json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}}),
                )),
                "tools/call" => on_call(id, &msg["params"]),
                _ => None,
            };
            if let Some(reply) = reply {
                if writer.write_all(&reply).await.is_err() {
                    break;
                }
            }
        }
    });
    let (reader, writer) = tokio::io::split(client);
    StdioTransport::new("calc", writer, reader)
}

fn line_bytes(message: Value) -> Vec<u8> {
    format!("{message}\n").into_bytes()
}

/// A `tools/call` reply carrying `text` as the tool output.
pub(crate) fn text_result(id: u64, text: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": {"content": [{"type": "text", "text": text}]}})
}
