//! DeskPilot tool-server orchestration.
//!
//! The backend subsystem that supervises external tool servers and speaks
//! their request/response protocol: configuration storage, process
//! supervision, the stdio and HTTP call transports, and the orchestration
//! façade the UI layer consumes.

pub mod config;
pub mod errors;
pub mod node_env;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod protocol;
pub mod templates;
pub mod types;

pub use config::{ConfigStore, SYSTEM_SERVER_NAME};
pub use errors::McpError;
pub use orchestrator::ServerOrchestrator;
pub use templates::{builtin_templates, ServerTemplate};
pub use types::{
    ServerDefinition, ServerDefinitionPatch, ServerStatus, ToolCallOutcome, ToolCallRequest,
    TransportConfig,
};

/// Return the platform-standard data directory for DeskPilot.
///
/// - macOS: `~/Library/Application Support/com.deskpilot.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\deskpilot\`
/// - Linux: `$XDG_DATA_HOME/com.deskpilot.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.deskpilot/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.deskpilot.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".deskpilot")
}

/// Initialize the tracing subscriber — writes structured logs to the app data directory.
///
/// On each app startup:
/// 1. Rotates existing logs (mcp.log → mcp.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh mcp.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    let _ = std::fs::create_dir_all(&log_dir);

    let log_path = log_dir.join("mcp.log");

    // Rotate: mcp.log.2 → .3, .1 → .2, mcp.log → .1
    rotate_log_file(&log_path, 3);

    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open {}: {e}", log_path.display());
            return;
        }
    };

    let flushing_writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deskpilot_mcp=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(flushing_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    // Startup banner — makes it easy to find the right log file
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== DeskPilot orchestrator starting ==="
    );
}

/// Rotate log files: `mcp.log` → `mcp.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
/// This wrapper ensures each log line is on disk immediately.
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
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self.file.lock().map_err(|e| {
            std::io::Error::other(format!("lock poisoned: {e}"))
        })?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
