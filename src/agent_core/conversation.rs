//! ChatLoop: the terminal conversation.
//!
//! Responsibilities:
//! - Read one line of user input per turn
//! - Ask the backend for a reply with the tool catalog in the system prompt
//! - Execute a requested tool through the session and show its output
//! - Stop on `quit`/`exit`/`bye`, end of input, or a dead session

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::inference::ChatBackend;
use crate::mcp_client::McpSession;

use super::errors::AgentError;
use super::prompt::build_system_prompt;
use super::response_analysis::{analyze_reply, ReplyAction, ToolRequest};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Inputs that end the conversation (case-insensitive).
const QUIT_WORDS: [&str; 3] = ["quit", "exit", "bye"];

const PROMPT: &str = "\nYou: ";

// ─── ChatLoop ───────────────────────────────────────────────────────────────

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The user typed a quit word.
    UserQuit,
    /// Input reached end of file.
    EndOfInput,
}

/// One conversation over a ready session and a backend.
pub struct ChatLoop<'a, B: ChatBackend> {
    session: &'a mut McpSession,
    backend: &'a B,
    system_prompt: String,
    backend_label: String,
    turns: usize,
}

impl<'a, B: ChatBackend> ChatLoop<'a, B> {
    /// Build the loop; the system prompt is fixed from the session's registry.
    pub fn new(session: &'a mut McpSession, backend: &'a B, backend_label: &str) -> Self {
        let system_prompt = build_system_prompt(session.registry());
        Self {
            session,
            backend,
            system_prompt,
            backend_label: backend_label.to_string(),
            turns: 0,
        }
    }

    /// Number of user messages answered so far.
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Run until the user quits or input ends.
    ///
    /// Per-turn failures (backend errors, unknown tools, bad arguments) are
    /// printed and the loop continues. An error is returned only when the
    /// terminal or the session is unusable.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<LoopExit, AgentError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let banner = format!(
            "Calculator Chat Bot (powered by {} + MCP)\nType 'quit' to exit\n{}\n",
            self.backend_label,
            "=".repeat(50)
        );
        write_flush(output, &banner).await?;

        let mut lines = input.lines();
        loop {
            write_flush(output, PROMPT).await?;

            let Some(line) = lines.next_line().await? else {
                tracing::info!(turns = self.turns, "input closed, ending conversation");
                write_flush(output, "\n").await?;
                return Ok(LoopExit::EndOfInput);
            };

            let message = line.trim();
            if QUIT_WORDS.iter().any(|w| message.eq_ignore_ascii_case(w)) {
                tracing::info!(turns = self.turns, "user ended conversation");
                return Ok(LoopExit::UserQuit);
            }
            if message.is_empty() {
                continue;
            }

            match self.respond(message).await {
                Ok(text) => write_flush(output, &format!("Bot: {text}\n")).await?,
                Err(e) if e.is_fatal() => {
                    write_flush(output, &format!("Error: {e}\n")).await?;
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    write_flush(output, &format!("Error: {e}\n")).await?;
                }
            }
        }
    }

    /// Answer one user message, executing a tool if the model asks for one.
    pub async fn respond(&mut self, message: &str) -> Result<String, AgentError> {
        self.turns += 1;
        tracing::info!(
            session = %self.session.session_id(),
            turn = self.turns,
            message_len = message.len(),
            "user message"
        );

        let reply = self.backend.complete(&self.system_prompt, message).await?;

        match analyze_reply(&reply) {
            ReplyAction::CallTool(request) => self.execute(request).await,
            ReplyAction::Respond(text) => Ok(text),
        }
    }

    async fn execute(&mut self, request: ToolRequest) -> Result<String, AgentError> {
        tracing::info!(tool = %request.tool, arguments = %request.arguments, "model requested tool");

        let result = self
            .session
            .call_tool(&request.tool, request.arguments)
            .await?;

        if result.success {
            Ok(result.output)
        } else {
            Ok(format!("Tool '{}' failed: {}", result.tool_name, result.output))
        }
    }
}

async fn write_flush<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<(), AgentError> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
