//! Transport establishment and teardown.
//!
//! Turns a `TransportSpec` into a live `McpSession`: spawns the server
//! process (choosing the interpreter from the script extension) or opens
//! the event stream, runs the handshake under a timeout, and shuts the
//! process down again when the session is closed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::errors::McpError;
use super::session::McpSession;
use super::sse::SseTransport;
use super::transport::StdioTransport;
use super::types::InitializeResult;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake.
///
/// Generous because Python servers often import heavy packages at startup.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum stderr captured into a handshake error.
const STDERR_CAPTURE_LIMIT: usize = 2000;

// ─── TransportSpec ───────────────────────────────────────────────────────────

/// How to reach one tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// Launch a local script and talk over its stdin/stdout.
    Stdio { script: PathBuf },
    /// Connect to a remote server's event stream.
    Sse { url: String },
}

impl TransportSpec {
    pub fn stdio(script: impl Into<PathBuf>) -> Self {
        TransportSpec::Stdio {
            script: script.into(),
        }
    }

    pub fn sse(url: impl Into<String>) -> Self {
        TransportSpec::Sse { url: url.into() }
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Stdio { script } => write!(f, "{}", script.display()),
            TransportSpec::Sse { url } => f.write_str(url),
        }
    }
}

/// macOS 12.3+ removed the `python` symlink; only `python3` exists.
/// Windows installs Python as `python.exe` via the official installer.
fn default_python_command() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}

/// Pick the interpreter for a server script from its extension.
pub fn interpreter_for(script: &Path) -> Result<&'static str, McpError> {
    match script.extension().and_then(|ext| ext.to_str()) {
        Some("py") => Ok(default_python_command()),
        Some("js") => Ok("node"),
        _ => Err(McpError::InvalidSpec {
            spec: script.display().to_string(),
            reason: "server script must be a .py or .js file".into(),
        }),
    }
}

// ─── Establishing ────────────────────────────────────────────────────────────

/// Open the transport described by `spec`. No MCP traffic is exchanged yet.
pub async fn open(identity: &str, spec: &TransportSpec) -> Result<McpSession, McpError> {
    match spec {
        TransportSpec::Stdio { script } => spawn_stdio(identity, script),
        TransportSpec::Sse { url } => {
            let transport = SseTransport::connect(identity, url).await?;
            Ok(McpSession::from_sse(identity, transport))
        }
    }
}

/// Spawn a server script with piped stdio.
pub fn spawn_stdio(identity: &str, script: &Path) -> Result<McpSession, McpError> {
    let interpreter = interpreter_for(script)?;

    let mut cmd = Command::new(interpreter);
    cmd.arg(script);

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let connection_failed = |reason: String| McpError::ConnectionFailed {
        name: identity.to_string(),
        reason,
    };

    let mut child = cmd
        .spawn()
        .map_err(|e| connection_failed(format!("failed to launch {interpreter}: {e}")))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| connection_failed("failed to capture stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| connection_failed("failed to capture stdout".into()))?;
    let stderr = child.stderr.take();

    tracing::debug!(
        server = identity,
        interpreter,
        script = %script.display(),
        pid = child.id(),
        "spawned server process"
    );

    let transport = StdioTransport::new(identity, stdin, stdout);
    Ok(McpSession::from_process(identity, transport, child, stderr))
}

/// Run the MCP handshake, bounded by `INIT_TIMEOUT`.
///
/// On failure the server's stderr (if any) is appended to the error. On
/// success stderr is forwarded to the log so the pipe never fills up.
pub async fn handshake(session: &mut McpSession) -> Result<InitializeResult, McpError> {
    handshake_within(session, INIT_TIMEOUT).await
}

pub(crate) async fn handshake_within(
    session: &mut McpSession,
    limit: Duration,
) -> Result<InitializeResult, McpError> {
    let name = session.name().to_string();

    let outcome = tokio::time::timeout(limit, session.initialize()).await;
    let reason = match outcome {
        Ok(Ok(init)) => {
            if let Some(stderr) = session.take_stderr() {
                forward_stderr(&name, stderr);
            }
            return Ok(init);
        }
        Ok(Err(McpError::HandshakeFailed { reason, .. })) => reason,
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("initialization timed out after {}s", limit.as_secs_f32()),
    };

    let stderr_ctx = read_stderr_on_failure(session.take_stderr()).await;
    if !stderr_ctx.is_empty() {
        tracing::warn!(
            server = %name,
            stderr = %stderr_ctx,
            "server stderr captured on failure"
        );
    }

    Err(McpError::HandshakeFailed {
        name,
        reason: format!("{reason}{}", format_stderr_suffix(&stderr_ctx)),
    })
}

/// Read any available stderr output from a failed server process.
///
/// Uses a short timeout to avoid blocking if stderr is empty or the process
/// is still writing.
async fn read_stderr_on_failure(stderr_handle: Option<ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await
    {
        Ok(Ok(_)) => {
            if buf.len() > STDERR_CAPTURE_LIMIT {
                let mut cut = STDERR_CAPTURE_LIMIT;
                while !buf.is_char_boundary(cut) {
                    cut -= 1;
                }
                buf.truncate(cut);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

/// Drain a running server's stderr into the log.
fn forward_stderr(name: &str, stderr: ChildStderr) {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, "stderr: {line}");
        }
    });
}

// ─── Teardown ────────────────────────────────────────────────────────────────

/// Wait for a server process to exit after its input was closed, killing it
/// if it does not exit within `SHUTDOWN_TIMEOUT`.
pub async fn shutdown_process(name: &str, process: &mut Child) -> Result<(), McpError> {
    shutdown_process_within(name, process, SHUTDOWN_TIMEOUT).await
}

pub(crate) async fn shutdown_process_within(
    name: &str,
    process: &mut Child,
    limit: Duration,
) -> Result<(), McpError> {
    match tokio::time::timeout(limit, process.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(server = name, %status, "server process exited");
            Ok(())
        }
        Ok(Err(e)) => Err(McpError::TransportError {
            server: name.to_string(),
            reason: format!("failed to wait for server process: {e}"),
        }),
        Err(_) => {
            tracing::warn!(
                server = name,
                timeout_secs = limit.as_secs_f32(),
                "server did not exit after input closed; killing"
            );
            process.kill().await.map_err(|e| McpError::TransportError {
                server: name.to_string(),
                reason: format!("failed to kill server process: {e}"),
            })
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpreter_by_extension() {
        assert_eq!(
            interpreter_for(Path::new("servers/weather.py")).unwrap(),
            default_python_command()
        );
        assert_eq!(interpreter_for(Path::new("/opt/calc.js")).unwrap(), "node");
    }

    #[test]
    fn test_interpreter_rejects_other_scripts() {
        for script in ["server.rb", "server", "server.PY.txt"] {
            let err = interpreter_for(Path::new(script)).unwrap_err();
            assert!(matches!(err, McpError::InvalidSpec { .. }), "{script}");
        }
    }

    #[tokio::test]
    async fn test_open_invalid_stdio_spec() {
        let err = open("stdio0", &TransportSpec::stdio("server.sh"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidSpec { ref spec, .. } if spec == "server.sh"));
    }

    #[test]
    fn test_spec_display() {
        assert_eq!(TransportSpec::stdio("a/b.py").to_string(), "a/b.py");
        assert_eq!(
            TransportSpec::sse("http://localhost:8080/sse").to_string(),
            "http://localhost:8080/sse"
        );
    }

    #[test]
    fn test_format_stderr_suffix() {
        assert_eq!(format_stderr_suffix(""), "");
        assert_eq!(format_stderr_suffix("  \n"), "");
        assert_eq!(
            format_stderr_suffix("ImportError: mcp\n"),
            " | stderr: ImportError: mcp"
        );
    }

    #[tokio::test]
    async fn test_handshake_times_out_on_silent_server() {
        let (client_out, _server_in) = tokio::io::duplex(4096);
        let (_server_out, client_in) = tokio::io::duplex(4096);
        let mut session = McpSession::from_io("stdio3", client_out, client_in);

        let err = handshake_within(&mut session, Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            McpError::HandshakeFailed { name, reason } => {
                assert_eq!(name, "stdio3");
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected HandshakeFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_waits_for_exit() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("cat > /dev/null")
            .stdin(std::process::Stdio::piped())
            .spawn()
            .unwrap();
        drop(child.stdin.take());

        shutdown_process_within("cat", &mut child, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_lingering_process() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .stdin(std::process::Stdio::null())
            .spawn()
            .unwrap();

        shutdown_process_within("sleeper", &mut child, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }
}
