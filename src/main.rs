//! toolchat binary: start the worker, probe the backend, run the chat.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tokio::io::BufReader;

use toolchat::agent_core::ChatLoop;
use toolchat::inference::{BackendKind, InferenceClient};
use toolchat::mcp_client::McpSession;

#[derive(Parser)]
#[command(name = "toolchat", version)]
#[command(about = "Chat with a language model that can call tools on a stdio worker")]
struct Cli {
    /// Path to toolchat.yaml (defaults to $TOOLCHAT_CONFIG or an upward search)
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = toolchat::init_tracing() {
        toolchat::init_stderr_tracing();
        tracing::warn!(error = %e, "file logging unavailable, logging to stderr");
    }

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "toolchat exited with error");
            eprintln!("Error: {e:#}");
            1
        }
    };

    // The stdin reader thread cannot be cancelled and would hold up runtime
    // shutdown until the next newline.
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Registered before the worker exists so an early interrupt still reaches
    // the shutdown below.
    let mut stop = StopSignals::install().context("failed to install signal handlers")?;

    let (config, config_path) =
        toolchat::config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = &config_path {
        println!("Using config {}", path.display());
    }

    let backend = InferenceClient::from_config(config.backend.clone())
        .context("invalid backend configuration")?;

    println!("Starting MCP worker '{}'...", config.worker.name);
    let mut session = McpSession::new(config.worker.clone());

    let started = tokio::select! {
        result = session.start() => Some(result),
        signal = stop.recv() => {
            tracing::info!(signal, "interrupted during startup");
            None
        }
    };

    let outcome = match started {
        None => {
            println!("\nInterrupted");
            Ok(())
        }
        Some(Err(e)) => Err(anyhow!("worker '{}' failed to start: {e}", config.worker.name)),
        Some(Ok(())) => {
            println!(
                "Connected to MCP worker! ({} tools: {})",
                session.registry().len(),
                session.registry().tool_names().join(", ")
            );
            tokio::select! {
                result = converse(&mut session, &backend) => result,
                signal = stop.recv() => {
                    tracing::info!(signal, "interrupted");
                    println!();
                    Ok(())
                }
            }
        }
    };

    session.shutdown().await;
    tracing::info!(session = %session.session_id(), state = %session.state(), "session closed");

    outcome
}

async fn converse(session: &mut McpSession, backend: &InferenceClient) -> anyhow::Result<()> {
    let label = backend.kind().display_name();

    println!("Testing connection to {label}...");
    if let Err(e) = backend.health_check().await {
        let hint = match backend.kind() {
            BackendKind::Ollama if e.is_unreachable() => {
                "\nMake sure Ollama is running: ollama serve"
            }
            _ => "",
        };
        bail!("{label} connection failed ({}): {e}{hint}", backend.endpoint());
    }
    println!("Connected to {label} ({})!", backend.model());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut chat = ChatLoop::new(session, backend, label);
    let exit = chat.run(stdin, &mut stdout).await?;

    tracing::info!(?exit, turns = chat.turns(), "conversation ended");
    Ok(())
}

// ─── Signals ─────────────────────────────────────────────────────────────────

/// SIGINT and SIGTERM (Ctrl-C elsewhere), installed once for the whole run.
struct StopSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl StopSignals {
    #[cfg(unix)]
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next stop signal and name it.
    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}
