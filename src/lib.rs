pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};

/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "toolchat=info,warn";

/// Number of rotated log files kept next to the current one.
const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for toolchat.
///
/// - macOS: `~/Library/Application Support/toolchat/`
/// - Windows: `{FOLDERID_RoamingAppData}\toolchat\`
/// - Linux: `$XDG_DATA_HOME/toolchat/` (fallback `~/.local/share/toolchat/`)
///
/// Falls back to `~/.toolchat/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolchat");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolchat")
}

/// Initialize the tracing subscriber, writing structured logs to a file so the
/// terminal stays free for the conversation.
///
/// On each startup:
/// 1. Rotates existing logs (toolchat.log → toolchat.log.1 → .2 → .3).
/// 2. Opens a fresh toolchat.log with a line-flushing writer.
/// 3. Logs a startup banner with the log file path.
///
/// Returns the log file path.
pub fn init_tracing() -> std::io::Result<PathBuf> {
    init_tracing_in(&data_dir())
}

/// [`init_tracing`] with an explicit log directory.
pub fn init_tracing_in(log_dir: &Path) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("toolchat.log");

    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let installed = fmt::fmt()
        .with_env_filter(log_filter())
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init();
    if let Err(e) = installed {
        return Err(std::io::Error::other(format!("tracing already initialized: {e}")));
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== toolchat starting ==="
    );

    Ok(log_path)
}

/// Fallback subscriber on stderr, warnings and above unless `RUST_LOG` says
/// otherwise. Used when the log file cannot be opened.
pub fn init_stderr_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn log_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Rotate log files: `toolchat.log` → `toolchat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so log
/// lines survive a crash or a killed process.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("toolchat.log");
        for (name, body) in [
            ("toolchat.log", "current"),
            ("toolchat.log.1", "one"),
            ("toolchat.log.2", "two"),
            ("toolchat.log.3", "three"),
        ] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |n: &str| std::fs::read_to_string(dir.path().join(n)).unwrap();
        assert_eq!(read("toolchat.log.1"), "current");
        assert_eq!(read("toolchat.log.2"), "one");
        assert_eq!(read("toolchat.log.3"), "two");
    }

    #[test]
    fn test_rotate_log_file_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("toolchat.log");
        std::fs::write(&base, "only").unwrap();

        rotate_log_file(&base, 3);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("toolchat.log.1")).unwrap(),
            "only"
        );
        assert!(!dir.path().join("toolchat.log.2").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);

        writer.write_all(b"line one\n").unwrap();
        let mut clone = writer.clone();
        clone.write_all(b"line two\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "line one\nline two\n"
        );
    }

    #[test]
    fn test_data_dir_is_named_for_app() {
        let dir = data_dir();
        let name = dir.file_name().unwrap().to_string_lossy();
        assert!(name == "toolchat" || name == ".toolchat");
    }
}
