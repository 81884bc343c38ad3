//! In-process MCP servers for tests.
//!
//! A `FakeServer` answers `initialize`, `tools/list` (optionally paged) and
//! `tools/call` over a `tokio::io::duplex` pipe, and records what it saw.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};

use super::session::McpSession;
use super::types::{error_codes, ToolDescriptor, MCP_PROTOCOL_VERSION};

#[derive(Clone)]
enum Behavior {
    Echo,
    Adder,
    Fail,
    Text(String),
    ToolError(String),
}

/// A tool the fake server exposes, plus how it answers calls.
#[derive(Clone)]
pub struct FakeTool {
    descriptor: ToolDescriptor,
    behavior: Behavior,
}

impl FakeTool {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            descriptor: ToolDescriptor {
                name: name.to_string(),
                description: format!("{name} tool"),
                input_schema: json!({"type": "object", "properties": {}}),
            },
            behavior,
        }
    }

    /// Answers with its arguments rendered as JSON.
    pub fn echo(name: &str) -> Self {
        Self::new(name, Behavior::Echo)
    }

    /// Answers with the integer sum of arguments `a` and `b`.
    pub fn adder(name: &str) -> Self {
        let mut tool = Self::new(name, Behavior::Adder);
        tool.descriptor.input_schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
            "required": ["a", "b"],
        });
        tool
    }

    /// Answers every call with a JSON-RPC error.
    pub fn failing(name: &str) -> Self {
        Self::new(name, Behavior::Fail)
    }

    /// Answers with fixed text.
    pub fn text(name: &str, text: impl Into<String>) -> Self {
        Self::new(name, Behavior::Text(text.into()))
    }

    /// Answers with a result flagged `isError`.
    pub fn tool_error(name: &str, text: impl Into<String>) -> Self {
        Self::new(name, Behavior::ToolError(text.into()))
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn call(&self, arguments: &Value) -> Result<Value, (i32, String)> {
        let text_result = |text: String, is_error: bool| {
            json!({
                "content": [{"type": "text", "text": text}],
                "isError": is_error,
            })
        };
        match &self.behavior {
            Behavior::Echo => Ok(text_result(arguments.to_string(), false)),
            Behavior::Adder => {
                let sum = arguments["a"].as_i64().unwrap_or(0) + arguments["b"].as_i64().unwrap_or(0);
                Ok(text_result(sum.to_string(), false))
            }
            Behavior::Fail => Err((error_codes::INTERNAL_ERROR, "tool exploded".to_string())),
            Behavior::Text(text) => Ok(text_result(text.clone(), false)),
            Behavior::ToolError(text) => Ok(text_result(text.clone(), true)),
        }
    }
}

struct State {
    server_name: String,
    tools: Vec<FakeTool>,
    page_size: Option<usize>,
    methods: Vec<String>,
    calls: Vec<(String, Value)>,
    /// Send a `ping` request with the same id ahead of every reply.
    ping_first: bool,
    /// Stop serving at the next incoming line.
    crashed: bool,
}

/// Shared handle to a fake server's state. Every session opened from it
/// sees the same tools.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl FakeServer {
    pub fn new(server_name: &str, tools: Vec<FakeTool>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                server_name: server_name.to_string(),
                tools,
                page_size: None,
                methods: Vec::new(),
                calls: Vec::new(),
                ping_first: false,
                crashed: false,
            })),
        }
    }

    /// Serve `tools/list` in pages of `size`.
    pub fn with_page_size(self, size: usize) -> Self {
        self.state.lock().unwrap().page_size = Some(size);
        self
    }

    /// Precede each reply with a server-to-client `ping` carrying the
    /// same id.
    pub fn with_ping_before_replies(self) -> Self {
        self.state.lock().unwrap().ping_first = true;
        self
    }

    /// Make every open session drop its pipes on the next message.
    pub fn crash(&self) {
        self.state.lock().unwrap().crashed = true;
    }

    /// Replace the advertised tools.
    pub fn set_tools(&self, tools: Vec<FakeTool>) {
        self.state.lock().unwrap().tools = tools;
    }

    pub fn saw_method(&self, method: &str) -> bool {
        self.state.lock().unwrap().methods.iter().any(|m| m == method)
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Open a session to this server over an in-memory pipe.
    pub fn session(&self, identity: &str) -> McpSession {
        let (client_out, client_in) = self.serve();
        McpSession::from_io(identity, client_out, client_in)
    }

    /// Like [`FakeServer::session`], but closing the session's input fails.
    pub fn session_with_failing_close(&self, identity: &str) -> McpSession {
        let (client_out, client_in) = self.serve();
        McpSession::from_io(identity, FailingShutdown(client_out), client_in)
    }

    /// Spawn the serving task; returns the client's write and read ends.
    fn serve(&self) -> (DuplexStream, DuplexStream) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (mut server_out, client_in) = tokio::io::duplex(64 * 1024);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if state.lock().unwrap().crashed {
                    break;
                }
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let Some(reply) = respond(&state, &message) else {
                    continue;
                };
                let mut out = String::new();
                if state.lock().unwrap().ping_first {
                    let ping = json!({"jsonrpc": "2.0", "id": reply["id"], "method": "ping"});
                    out.push_str(&ping.to_string());
                    out.push('\n');
                }
                out.push_str(&reply.to_string());
                out.push('\n');
                if server_out.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        (client_out, client_in)
    }

    /// A session whose server end is already gone.
    pub fn dead_session(identity: &str) -> McpSession {
        let (client_out, server_in) = tokio::io::duplex(1024);
        let (server_out, client_in) = tokio::io::duplex(1024);
        drop(server_in);
        drop(server_out);
        McpSession::from_io(identity, client_out, client_in)
    }
}

/// Writer that works normally until it is shut down.
struct FailingShutdown<W>(W);

impl<W: AsyncWrite + Unpin> AsyncWrite for FailingShutdown<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::other("input refused to close")))
    }
}

fn respond(state: &Mutex<State>, message: &Value) -> Option<Value> {
    let method = message["method"].as_str().unwrap_or_default().to_string();
    let mut state = state.lock().unwrap();
    state.methods.push(method.clone());

    // Notifications carry no id and get no reply.
    let id = message.get("id")?.clone();
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let outcome: Result<Value, (i32, String)> = match method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "serverInfo": {"name": state.server_name, "version": "0.1.0"},
        })),
        "tools/list" => {
            let start = params["cursor"]
                .as_str()
                .and_then(|c| c.parse::<usize>().ok())
                .unwrap_or(0);
            let end = match state.page_size {
                Some(size) => (start + size).min(state.tools.len()),
                None => state.tools.len(),
            };
            let page: Vec<&ToolDescriptor> = state.tools[start.min(end)..end]
                .iter()
                .map(FakeTool::descriptor)
                .collect();
            let mut result = json!({ "tools": page });
            if end < state.tools.len() {
                result["nextCursor"] = json!(end.to_string());
            }
            Ok(result)
        }
        "tools/call" => {
            let name = params["name"].as_str().unwrap_or_default().to_string();
            let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
            state.calls.push((name.clone(), arguments.clone()));
            match state.tools.iter().find(|t| t.descriptor.name == name) {
                Some(tool) => tool.call(&arguments),
                None => Err((error_codes::INVALID_PARAMS, format!("no tool named {name}"))),
            }
        }
        _ => Err((error_codes::METHOD_NOT_FOUND, format!("unknown method {method}"))),
    };

    Some(match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        }),
    })
}
