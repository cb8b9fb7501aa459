//! Application configuration loading.
//!
//! Reads `toolchat.yaml`, resolves environment variables, and falls back to
//! built-in defaults when no file exists.
//!
//! Resolution order for the file:
//! 1. Path given on the command line.
//! 2. `TOOLCHAT_CONFIG` env var.
//! 3. `toolchat.yaml` in the cwd or any parent directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::inference::BackendConfig;
use crate::mcp_client::ServerConfig;

/// File name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "toolchat.yaml";

/// Env var naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TOOLCHAT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level config (mirrors `toolchat.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_worker")]
    pub worker: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_worker() -> ServerConfig {
    ServerConfig::new("calculator", "python3", &["server.py"])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            worker: default_worker(),
            backend: BackendConfig::default(),
        }
    }
}

impl AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "worker.command must not be empty".into(),
            });
        }
        if self.worker.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "worker.request_timeout_ms must be positive".into(),
            });
        }
        self.backend
            .validate()
            .map_err(|e| ConfigError::Invalid { reason: e.to_string() })
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// An explicit path (argument or env var) must exist. The upward search
/// returns `Ok(None)` when nothing is found.
pub fn find_config_path(
    explicit: Option<&Path>,
    start: &Path,
) -> Result<Option<PathBuf>, ConfigError> {
    // 1. Command line, then 2. env var
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    if let Some(path) = explicit {
        let path = PathBuf::from(expand_tilde(&path.to_string_lossy()));
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::NotFound { path });
    }

    // 3. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
        if !dir.pop() {
            break;
        }
    }

    Ok(None)
}

/// Resolve and load the configuration, or the defaults if no file exists.
///
/// Returns the config and the file it came from.
pub fn load(explicit: Option<&Path>) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match find_config_path(explicit, &cwd)? {
        Some(path) => {
            let config = load_config_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config");
            Ok((config, Some(path)))
        }
        None => {
            tracing::info!("no {CONFIG_FILE_NAME} found, using defaults");
            Ok((AppConfig::default(), None))
        }
    }
}

/// Load and parse a config file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}`, expands `~` in the worker command and cwd, and
/// resolves a relative worker cwd against the file's directory.
pub fn load_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);

    let mut config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    resolve_worker_paths(&mut config.worker, base_dir);
    config.validate()?;

    Ok(config)
}

fn resolve_worker_paths(worker: &mut ServerConfig, base_dir: &Path) {
    worker.command = expand_tilde(&worker.command);

    if let Some(cwd) = worker.cwd.take() {
        let expanded = PathBuf::from(expand_tilde(&cwd));
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            base_dir.join(expanded)
        };
        worker.cwd = Some(resolved.to_string_lossy().into_owned());
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`. Unset without default becomes empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::BackendKind;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TOOLCHAT_UNSET_VAR__");
        assert_eq!(
            interpolate_env_vars("${__TOOLCHAT_UNSET_VAR__:-/fallback/path}"),
            "/fallback/path"
        );
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__TOOLCHAT_TEST_VAR__", "/custom/path");
        assert_eq!(
            interpolate_env_vars("dir: ${__TOOLCHAT_TEST_VAR__:-/fallback}"),
            "dir: /custom/path"
        );
        std::env::remove_var("__TOOLCHAT_TEST_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain $text with {braces}";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/bin/calc-worker");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/bin/calc-worker"));
        assert_eq!(expand_tilde("/abs/path"), "/abs/path");
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
worker:
  name: calc
  command: calc-worker
  cwd: workers
  request_timeout_ms: 2500
backend:
  kind: openai
  base_url: "http://localhost:8080/v1"
  model: "Qwen3-1.7B"
"#,
        );

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.worker.name, "calc");
        assert_eq!(config.worker.request_timeout_ms, 2500);
        let expected_cwd = dir.path().join("workers").to_string_lossy().into_owned();
        assert_eq!(config.worker.cwd, Some(expected_cwd));
        assert_eq!(config.backend.kind, BackendKind::Openai);
        assert_eq!(config.backend.max_tokens, 500);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "backend:\n  model: llama3.2\n");

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.worker.command, "python3");
        assert_eq!(config.worker.args, vec!["server.py"]);
        assert_eq!(config.backend.model, "llama3.2");
        assert_eq!(config.backend.kind, BackendKind::Ollama);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "worker:\n  command: \"\"\n");
        assert!(matches!(
            load_config_file(&path),
            Err(ConfigError::Invalid { .. })
        ));

        let path = write_config(dir.path(), "worker: [not, a, map]\n");
        assert!(matches!(load_config_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_find_config_searches_upward() {
        let dir = tempfile::tempdir().unwrap();
        let expected = write_config(dir.path(), "{}\n");
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_path(None, &nested).unwrap();
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn test_find_config_explicit_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            find_config_path(Some(&missing), dir.path()),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_find_config_explicit_wins() {
        let dir = tempfile::tempdir().unwrap();
        let custom = dir.path().join("custom.yaml");
        std::fs::write(&custom, "{}\n").unwrap();
        assert_eq!(
            find_config_path(Some(&custom), dir.path()).unwrap(),
            Some(custom)
        );
    }
}
