//! A connected tool server, independent of how bytes reach it.
//!
//! `McpSession` is a closed enum over the two transports. Everything above
//! this module talks MCP (`initialize`, `tools/list`, `tools/call`) through
//! the session and never branches on the transport kind.

use std::fmt;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStderr};

use super::errors::McpError;
use super::lifecycle;
use super::sse::SseTransport;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    InitializeResult, JsonRpcResponse, ListToolsResult, ToolDescriptor, ToolResult,
    MCP_PROTOCOL_VERSION,
};

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_TOOL_PAGES: usize = 64;

/// Which transport a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Sse => f.write_str("sse"),
        }
    }
}

/// Session over a process pipe (or any in-process byte stream pair).
pub struct StdioSession {
    name: String,
    transport: StdioTransport,
    process: Option<Child>,
    stderr: Option<ChildStderr>,
}

/// Session over an event-stream connection.
pub struct SseSession {
    name: String,
    transport: SseTransport,
}

/// One live channel to a single tool server.
pub enum McpSession {
    Stdio(StdioSession),
    Sse(SseSession),
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl McpSession {
    /// Wrap a spawned server process.
    pub(crate) fn from_process(
        name: &str,
        transport: StdioTransport,
        process: Child,
        stderr: Option<ChildStderr>,
    ) -> Self {
        McpSession::Stdio(StdioSession {
            name: name.to_string(),
            transport,
            process: Some(process),
            stderr,
        })
    }

    /// Talk line-delimited JSON-RPC over an arbitrary stream pair, e.g. a
    /// server running in the same process.
    pub fn from_io<W, R>(name: &str, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        McpSession::Stdio(StdioSession {
            name: name.to_string(),
            transport: StdioTransport::new(name, writer, reader),
            process: None,
            stderr: None,
        })
    }

    pub(crate) fn from_sse(name: &str, transport: SseTransport) -> Self {
        McpSession::Sse(SseSession {
            name: name.to_string(),
            transport,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            McpSession::Stdio(s) => &s.name,
            McpSession::Sse(s) => &s.name,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            McpSession::Stdio(_) => TransportKind::Stdio,
            McpSession::Sse(_) => TransportKind::Sse,
        }
    }

    /// Take the server's stderr pipe, if this session owns a process.
    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        match self {
            McpSession::Stdio(s) => s.stderr.take(),
            McpSession::Sse(_) => None,
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        match self {
            McpSession::Stdio(s) => s.transport.request(method, params).await,
            McpSession::Sse(s) => s.transport.request(method, params).await,
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match self {
            McpSession::Stdio(s) => s.transport.notify(method, params).await,
            McpSession::Sse(s) => s.transport.notify(method, params).await,
        }
    }

    fn malformed(&self, what: &str, e: serde_json::Error) -> McpError {
        McpError::TransportError {
            server: self.name().to_string(),
            reason: format!("malformed {what} response: {e}"),
        }
    }

    // ─── MCP operations ──────────────────────────────────────────────────

    /// Perform the MCP initialization handshake.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let handshake_failed = |reason: String| McpError::HandshakeFailed {
            name: self.name().to_string(),
            reason,
        };

        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;
        let result = extract_result(response).map_err(|e| handshake_failed(e.to_string()))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| handshake_failed(format!("failed to parse initialize response: {e}")))?;

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| handshake_failed(e.to_string()))?;

        Ok(init)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let result = extract_result(self.request("tools/list", params).await?)?;
            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| self.malformed("tools/list", e))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            server = self.name(),
            pages = MAX_TOOL_PAGES,
            "tools/list pagination did not terminate; using what was received"
        );
        Ok(tools)
    }

    /// Invoke a tool and return the raw result payload.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = extract_result(self.request("tools/call", Some(params)).await?)?;
        serde_json::from_value(result).map_err(|e| self.malformed("tools/call", e))
    }

    /// Release the transport. For a process this closes its input, waits
    /// briefly, then kills it.
    pub async fn close(&mut self) -> Result<(), McpError> {
        match self {
            McpSession::Stdio(s) => {
                let closed = s.transport.close().await;
                if let Some(process) = s.process.as_mut() {
                    lifecycle::shutdown_process(&s.name, process).await?;
                }
                closed
            }
            McpSession::Sse(s) => {
                s.transport.close().await;
                Ok(())
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
