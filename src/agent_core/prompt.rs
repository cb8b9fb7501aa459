//! System prompt construction.

use crate::mcp_client::ToolRegistry;

const SYSTEM_PROMPT_INTRO: &str = "You are a helpful assistant with calculator tools.";

const SYSTEM_PROMPT_RULES: &str = "For calculations, use this format: \
{\"tool\": \"tool_name\", \"arguments\": {\"param1\": value1, \"param2\": value2}}\n\n\
For regular conversation, just respond normally.";

/// Build the system prompt from the tools the worker advertised.
///
/// The catalog is regenerated per session so the model only sees tools that
/// actually exist.
pub fn build_system_prompt(registry: &ToolRegistry) -> String {
    let catalog = if registry.is_empty() {
        "(none)".to_string()
    } else {
        registry.catalog()
    };
    format!("{SYSTEM_PROMPT_INTRO}\n\nAvailable tools:\n{catalog}\n\n{SYSTEM_PROMPT_RULES}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ToolDescriptor;

    #[test]
    fn test_prompt_lists_tools() {
        let mut registry = ToolRegistry::new();
        registry.populate(vec![ToolDescriptor {
            name: "add".into(),
            description: "Add two numbers together".into(),
            input_schema: serde_json::json!({}),
        }]);

        let prompt = build_system_prompt(&registry);
        assert!(prompt.contains("Available tools:\n- add: Add two numbers together\n"));
        assert!(prompt.contains(r#"{"tool": "tool_name""#));
    }

    #[test]
    fn test_prompt_without_tools() {
        let prompt = build_system_prompt(&ToolRegistry::new());
        assert!(prompt.contains("Available tools:\n(none)"));
    }
}
