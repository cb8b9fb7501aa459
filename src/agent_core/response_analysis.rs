//! Reply analysis for the conversation loop.
//!
//! Decides whether a model reply is a tool request of the form
//! `{"tool": "name", "arguments": {...}}` or plain conversation. Small local
//! models wrap the object in a ```json fence, prefix it with a `<think>` block,
//! or leave a trailing comma; all of those are tolerated. Anything else is
//! treated as text.

use serde::Deserialize;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default = "empty_arguments")]
    pub arguments: serde_json::Value,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// What the loop should do with a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyAction {
    /// Execute the tool and show its output.
    CallTool(ToolRequest),
    /// Show this text as-is.
    Respond(String),
}

/// Classify a model reply.
pub fn analyze_reply(reply: &str) -> ReplyAction {
    let visible = strip_think_blocks(reply);
    let visible = visible.trim();

    match parse_tool_request(visible) {
        Some(request) => ReplyAction::CallTool(request),
        None => ReplyAction::Respond(visible.to_string()),
    }
}

/// Parse the whole reply as a tool request.
///
/// The object must be the entire reply (optionally fenced); a JSON object
/// embedded in prose is conversation, not a call.
pub fn parse_tool_request(text: &str) -> Option<ToolRequest> {
    let body = strip_code_fence(text.trim());
    if !(body.starts_with('{') && body.ends_with('}')) {
        return None;
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .or_else(|_| serde_json::from_str(&remove_trailing_commas(body)))
        .ok()?;

    let request: ToolRequest = serde_json::from_value(value).ok()?;
    if request.tool.trim().is_empty() {
        return None;
    }
    Some(request)
}

/// Remove every `<think>…</think>` block. An unclosed block hides the rest.
pub fn strip_think_blocks(text: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start + OPEN.len()..].find(CLOSE) {
            Some(end) => rest = &rest[start + OPEN.len() + end + CLOSE.len()..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Unwrap a single surrounding ``` fence, with or without a language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}

/// Remove commas directly before `}` or `]`, outside strings.
fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in chars.iter().enumerate() {
        if escape_next {
            escape_next = false;
        } else if ch == '\\' && in_string {
            escape_next = true;
        } else if ch == '"' {
            in_string = !in_string;
        } else if ch == ',' && !in_string {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }

    result
}

// ─── Tests ───────────────────────────────────────────────────────────────────
