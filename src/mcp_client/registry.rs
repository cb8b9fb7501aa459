//! Tool registry: the tools advertised by the worker during the handshake.
//!
//! Provides:
//! - Tool lookup by name
//! - Ordered `(name, description)` pairs for the model's tool catalog
//! - Validation that a tool call matches the registered schema
//!
//! The registry is populated once per session and not mutated afterward.

use std::collections::HashMap;

use super::errors::McpError;
use super::types::ToolDescriptor;

/// Catalog text used when a tool advertises no description.
const NO_DESCRIPTION: &str = "No description";

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Tools advertised by one worker, in advertisement order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    /// `tool_name → index into tools`.
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents with `tools`.
    ///
    /// A later entry with an already-seen name overwrites the earlier one but
    /// keeps the position where the name first appeared.
    pub fn populate(&mut self, tools: Vec<ToolDescriptor>) {
        self.tools.clear();
        self.index.clear();

        for tool in tools {
            match self.index.get(&tool.name) {
                Some(&pos) => {
                    tracing::debug!(tool = %tool.name, "duplicate tool name, keeping last definition");
                    self.tools[pos] = tool;
                }
                None => {
                    self.index.insert(tool.name.clone(), self.tools.len());
                    self.tools.push(tool);
                }
            }
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Result<&ToolDescriptor, McpError> {
        self.index
            .get(name)
            .map(|&pos| &self.tools[pos])
            .ok_or_else(|| McpError::UnknownTool {
                name: name.to_string(),
            })
    }

    /// Return `(name, description)` pairs in advertisement order.
    pub fn describe_all(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|def| (def.name.clone(), def.description.clone()))
            .collect()
    }

    /// Render the catalog as one `- name: description` line per tool.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|def| {
                let description = if def.description.trim().is_empty() {
                    NO_DESCRIPTION
                } else {
                    def.description.as_str()
                };
                format!("- {}: {description}", def.name)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Return all registered tool names in order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|def| def.name.as_str()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a tool call: tool exists, arguments is an object, and the
    /// schema's `required` fields are present.
    ///
    /// Type checking of individual fields is left to the worker.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<(), McpError> {
        let def = self.get(tool_name)?;

        let Some(args_obj) = arguments.as_object() else {
            return Err(McpError::InvalidArguments {
                tool: tool_name.to_string(),
                reason: "arguments must be a JSON object".into(),
            });
        };

        if let Some(required) = def.input_schema.get("required").and_then(|r| r.as_array()) {
            for field_name in required.iter().filter_map(|f| f.as_str()) {
                if !args_obj.contains_key(field_name) {
                    return Err(McpError::InvalidArguments {
                        tool: tool_name.to_string(),
                        reason: format!("missing required field: '{field_name}'"),
                    });
                }
            }
        }

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
