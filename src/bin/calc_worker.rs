//! calc-worker: a calculator tool worker speaking MCP over stdio.
//!
//! Reads one JSON-RPC message per line on stdin and writes one response per
//! line on stdout. Logs go to stderr. Exits when stdin closes.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use toolchat::mcp_client::types::{error_codes, ToolDescriptor, PROTOCOL_VERSION};

const SERVER_NAME: &str = "Calculator Server";

// ─── Messages ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Incoming {
    /// Absent for notifications.
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

// ─── Tools ───────────────────────────────────────────────────────────────────

enum Operation {
    Unary(fn(f64) -> Result<f64, String>),
    Binary(fn(f64, f64) -> Result<f64, String>),
}

struct Tool {
    name: &'static str,
    description: &'static str,
    op: Operation,
}

const TOOLS: &[Tool] = &[
    Tool {
        name: "add",
        description: "Add two numbers together",
        op: Operation::Binary(add),
    },
    Tool {
        name: "subtract",
        description: "Subtract b from a",
        op: Operation::Binary(subtract),
    },
    Tool {
        name: "multiply",
        description: "Multiply two numbers",
        op: Operation::Binary(multiply),
    },
    Tool {
        name: "divide",
        description: "Divide a by b",
        op: Operation::Binary(divide),
    },
    Tool {
        name: "power",
        description: "Raise a to the power of b",
        op: Operation::Binary(power),
    },
    Tool {
        name: "square_root",
        description: "Calculate the square root of a number",
        op: Operation::Unary(square_root),
    },
];

fn add(a: f64, b: f64) -> Result<f64, String> {
    Ok(a + b)
}

fn subtract(a: f64, b: f64) -> Result<f64, String> {
    Ok(a - b)
}

fn multiply(a: f64, b: f64) -> Result<f64, String> {
    Ok(a * b)
}

fn divide(a: f64, b: f64) -> Result<f64, String> {
    if b == 0.0 {
        return Err("Cannot divide by zero".into());
    }
    Ok(a / b)
}

fn power(a: f64, b: f64) -> Result<f64, String> {
    Ok(a.powf(b))
}

fn square_root(a: f64) -> Result<f64, String> {
    if a < 0.0 {
        return Err("Cannot calculate square root of negative number".into());
    }
    Ok(a.sqrt())
}

impl Tool {
    fn descriptor(&self) -> ToolDescriptor {
        let (properties, required) = match self.op {
            Operation::Unary(_) => (json!({"a": {"type": "number"}}), json!(["a"])),
            Operation::Binary(_) => (
                json!({"a": {"type": "number"}, "b": {"type": "number"}}),
                json!(["a", "b"]),
            ),
        };
        ToolDescriptor {
            name: self.name.to_string(),
            description: self.description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    fn apply(&self, args: &Value) -> Result<f64, String> {
        let value = match self.op {
            Operation::Unary(f) => f(number_arg(args, "a")?),
            Operation::Binary(f) => f(number_arg(args, "a")?, number_arg(args, "b")?),
        }?;
        if !value.is_finite() {
            return Err(format!("Result is not a finite real number ({value})"));
        }
        Ok(value)
    }
}

fn number_arg(args: &Value, key: &str) -> Result<f64, String> {
    args.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("missing or non-numeric argument '{key}'"))
}

/// Render a float the way Python's `repr` does: `5.0`, `1e+20`, `1.5e-07`.
///
/// Rust's `Debug` already switches to exponent form at the same magnitudes;
/// only the exponent needs a sign and two digits.
fn format_number(value: f64) -> String {
    let debug = format!("{value:?}");
    let Some((mantissa, exponent)) = debug.split_once('e') else {
        return debug;
    };
    match exponent.parse::<i32>() {
        Ok(exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        Err(_) => debug,
    }
}

fn text_content(text: String, is_error: bool) -> Value {
    let mut result = json!({"content": [{"type": "text", "text": text}]});
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

type RpcResult = Result<Value, (i32, String)>;

/// Handle one input line; `None` means nothing is written back.
fn handle_line(line: &str) -> Option<String> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable line");
            return Some(error_response(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("Parse error: {e}"),
            ));
        }
    };

    let incoming: Incoming = match Incoming::deserialize(&raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "invalid request");
            let id = raw.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                error_codes::INVALID_REQUEST,
                format!("Invalid request: {e}"),
            ));
        }
    };

    let Some(id) = incoming.id else {
        tracing::debug!(method = %incoming.method, "notification");
        return None;
    };

    let outcome = match incoming.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
        })),
        "tools/list" => Ok(json!({
            "tools": TOOLS.iter().map(Tool::descriptor).collect::<Vec<_>>(),
        })),
        "tools/call" => call_tool(incoming.params),
        "ping" => Ok(json!({})),
        other => Err((error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}"))),
    };

    match outcome {
        Ok(result) => Some(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()),
        Err((code, message)) => Some(error_response(id, code, message)),
    }
}

fn error_response(id: Value, code: i32, message: String) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
    .to_string()
}

fn call_tool(params: Option<Value>) -> RpcResult {
    let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| (error_codes::INVALID_PARAMS, format!("Invalid params: {e}")))?;

    let Some(tool) = TOOLS.iter().find(|t| t.name == params.name) else {
        return Err((
            error_codes::INVALID_PARAMS,
            format!("Unknown tool: {}", params.name),
        ));
    };

    let args = params.arguments.unwrap_or_else(|| json!({}));
    let result = match tool.apply(&args) {
        Ok(value) => {
            tracing::info!(tool = tool.name, %args, value, "tool call");
            text_content(format_number(value), false)
        }
        Err(message) => {
            tracing::info!(tool = tool.name, %args, error = %message, "tool call failed");
            text_content(message, true)
        }
    };
    Ok(result)
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolchat::init_stderr_tracing();
    tracing::info!(tools = TOOLS.len(), "calc-worker ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(&line) {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("stdin closed, exiting");
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> Value {
        let line = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments},
        });
        serde_json::from_str(&handle_line(&line.to_string()).unwrap()).unwrap()
    }

    #[test]
    fn test_initialize() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        let resp: Value = serde_json::from_str(&handle_line(line).unwrap()).unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[test]
    fn test_tools_list_advertises_input_schema() {
        let line = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#;
        let resp: Value = serde_json::from_str(&handle_line(line).unwrap()).unwrap();
        let tools = resp["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec!["add", "subtract", "multiply", "divide", "power", "square_root"]
        );
        assert_eq!(tools[5]["inputSchema"]["required"], json!(["a"]));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(call("add", json!({"a": 2, "b": 3}))["result"]["content"][0]["text"], "5.0");
        assert_eq!(call("power", json!({"a": 2, "b": 10}))["result"]["content"][0]["text"], "1024.0");
        assert_eq!(call("square_root", json!({"a": 2.25}))["result"]["content"][0]["text"], "1.5");
    }

    #[test]
    fn test_domain_errors_are_tool_errors() {
        let resp = call("divide", json!({"a": 1, "b": 0}));
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["content"][0]["text"], "Cannot divide by zero");

        let resp = call("square_root", json!({"a": -1}));
        assert_eq!(resp["result"]["isError"], true);
    }

    #[test]
    fn test_bad_arguments_are_tool_errors() {
        let resp = call("add", json!({"a": "two", "b": 3}));
        assert_eq!(resp["result"]["isError"], true);
        assert!(resp["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("'a'"));
    }

    #[test]
    fn test_unknown_tool_is_rpc_error() {
        let resp = call("modulo", json!({}));
        assert_eq!(resp["error"]["code"], error_codes::INVALID_PARAMS);
        assert_eq!(resp["id"], 7);
    }

    #[test]
    fn test_unknown_method() {
        let line = r#"{"jsonrpc":"2.0","id":9,"method":"resources/list"}"#;
        let resp: Value = serde_json::from_str(&handle_line(line).unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_notifications_get_no_reply() {
        assert!(handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).is_none());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let resp: Value = serde_json::from_str(&handle_line("not json").unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], error_codes::PARSE_ERROR);
        assert!(resp["id"].is_null());
    }

    #[test]
    fn test_request_without_method_is_invalid() {
        let resp: Value =
            serde_json::from_str(&handle_line(r#"{"jsonrpc":"2.0","id":5}"#).unwrap()).unwrap();
        assert_eq!(resp["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(resp["id"], 5);
    }

    #[test]
    fn test_non_finite_results_are_tool_errors() {
        let resp = call("power", json!({"a": -8, "b": 0.5}));
        assert_eq!(resp["result"]["isError"], true);

        let resp = call("power", json!({"a": 10, "b": 400}));
        assert_eq!(resp["result"]["isError"], true);
    }

    #[test]
    fn test_format_number_matches_python_repr() {
        assert_eq!(format_number(5.0), "5.0");
        assert_eq!(format_number(-0.5), "-0.5");
        assert_eq!(format_number(1e20), "1e+20");
        assert_eq!(format_number(1.5e-7), "1.5e-07");
        assert_eq!(format_number(123456.789), "123456.789");
    }
}
