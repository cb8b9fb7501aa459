//! Agent Core: the conversation layer on top of the tool session.
//!
//! Submodules:
//! - `conversation`: Terminal chat loop (input, model, tool execution, output)
//! - `prompt`: System prompt built from the tool registry
//! - `response_analysis`: Classify model replies as tool requests or text
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod prompt;
pub mod response_analysis;

// Re-exports for convenience
pub use conversation::{ChatLoop, LoopExit};
pub use errors::AgentError;
pub use response_analysis::{analyze_reply, ReplyAction, ToolRequest};
