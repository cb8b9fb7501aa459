//! MCP Client: JSON-RPC over stdio to a single tool worker.
//!
//! This module handles:
//! - Spawning and supervising the worker child process
//! - Line-delimited JSON-RPC 2.0 exchanges over the worker's stdio
//! - The initialize / tools/list handshake and the tool registry
//! - Tool call execution with per-request timeouts
//!
//! A session owns exactly one worker and allows one request in flight.

pub mod client;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::{McpSession, SessionState, TOOL_CALL_FAILED};
pub use errors::McpError;
pub use registry::ToolRegistry;
pub use transport::StdioTransport;
pub use types::{ServerConfig, ToolCallResult, ToolDescriptor};
