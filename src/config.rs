//! Server configuration document and fixed client settings.
//!
//! ```json
//! { "stdio_servers": ["calc.py"], "sse_servers": ["http://localhost:8080/"] }
//! ```
//!
//! JSON by default, YAML when the path ends in `.yaml`/`.yml`. String values
//! may use `${VAR}` or `${VAR:-default}`; stdio paths expand a leading `~`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mcp_client::TransportSpec;

/// Default location of the server configuration document.
pub const DEFAULT_SERVER_CONFIG_PATH: &str = "server_config.json";

/// Maximum characters of one tool result kept in the history.
pub const TOOL_RESPONSE_LIMIT: usize = 1000;

/// Messages kept in the history after each turn.
pub const HISTORY_LIMIT: usize = 5;

/// Inputs that end the interactive session.
pub const STOP_WORDS: [&str; 3] = ["stop", "exit", "quit"];

pub const SYSTEM_PROMPT: &str =
    "You need to answer questions using the available tools. Use bullet points.";

/// Path suffix appended to each event-stream base URL.
const SSE_PATH_SUFFIX: &str = "sse";

/// Whether `input` asks to end the session.
pub fn is_stop_word(input: &str) -> bool {
    let trimmed = input.trim();
    STOP_WORDS.iter().any(|w| trimmed.eq_ignore_ascii_case(w))
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// Servers to connect at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub stdio_servers: Vec<String>,
    #[serde(default)]
    pub sse_servers: Vec<String>,
}

impl ServerConfig {
    pub fn is_empty(&self) -> bool {
        self.stdio_servers.is_empty() && self.sse_servers.is_empty()
    }

    /// Identity and transport for every entry: `stdio{i}` first, then
    /// `sse{i}`, each in document order.
    pub fn transport_specs(&self) -> Vec<(String, TransportSpec)> {
        let stdio = self
            .stdio_servers
            .iter()
            .enumerate()
            .map(|(i, script)| {
                (
                    format!("stdio{i}"),
                    TransportSpec::stdio(expand_tilde(script)),
                )
            });
        let sse = self.sse_servers.iter().enumerate().map(|(i, base)| {
            (
                format!("sse{i}"),
                TransportSpec::sse(format!("{base}{SSE_PATH_SUFFIX}")),
            )
        });
        stdio.chain(sse).collect()
    }
}

/// Load and parse a server configuration document.
pub fn load_server_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let interpolated = interpolate_env_vars(&raw);
    let parse_error = |reason: String| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let config: ServerConfig = if is_yaml(path) {
        serde_yaml::from_str(&interpolated).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_json::from_str(&interpolated).map_err(|e| parse_error(e.to_string()))?
    };

    tracing::info!(
        path = %path.display(),
        stdio = config.stdio_servers.len(),
        sse = config.sse_servers.len(),
        "loaded server config"
    );
    Ok(config)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                expr.push(c);
            }
            result.push_str(&resolve_var_expr(&expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return PathBuf::from(format!("{}{rest}", home.display()));
        }
    }
    PathBuf::from(path)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
