pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};

/// Return the platform-standard data directory for the client.
///
/// - macOS: `~/Library/Application Support/mcp-chat-client/`
/// - Windows: `{FOLDERID_RoamingAppData}\mcp-chat-client\`
/// - Linux: `$XDG_DATA_HOME/mcp-chat-client/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.mcp-chat-client/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-chat-client");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-chat-client")
}

/// Initialize the tracing subscriber.
///
/// By default logs go to `client.log` in [`data_dir`]: existing logs are
/// rotated (keeping the last 3) and a fresh file is opened with a
/// line-flushing writer. With `log_to_stderr` they go to stderr instead.
/// `json` switches the line format to one JSON object per event.
///
/// Returns the log file path, or `None` when logging to stderr.
pub fn init_tracing(log_to_stderr: bool, json: bool) -> std::io::Result<Option<PathBuf>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_chat_client=info,warn"));

    let log_path = if log_to_stderr {
        install(build_subscriber(std::io::stderr, filter, json, true))?;
        None
    } else {
        let log_dir = data_dir();
        std::fs::create_dir_all(&log_dir)?;
        let log_path = log_dir.join("client.log");

        rotate_log_file(&log_path, 3);

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        install(build_subscriber(FlushingWriter::new(log_file), filter, json, false))?;
        Some(log_path)
    };

    log_banner(log_path.as_deref());
    Ok(log_path)
}

type BoxedSubscriber = Box<dyn tracing::Subscriber + Send + Sync>;

fn build_subscriber<W>(
    writer: W,
    filter: tracing_subscriber::EnvFilter,
    json: bool,
    ansi: bool,
) -> BoxedSubscriber
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false);

    if json {
        Box::new(builder.json().finish())
    } else {
        Box::new(builder.finish())
    }
}

fn install(subscriber: BoxedSubscriber) -> std::io::Result<()> {
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| std::io::Error::other(format!("failed to install log subscriber: {e}")))
}

fn log_banner(log_path: Option<&Path>) {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir().display(),
        log_file = ?log_path,
        pid = std::process::id(),
        "=== mcp-chat-client starting ==="
    );
}

/// Rotate log files: `client.log` → `client.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

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

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Each log line reaches the file before the next one is formatted, so a
/// crash never loses buffered entries.
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
