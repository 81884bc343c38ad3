//! Agent Core error types.
//!
//! Every variant aborts the current turn; the caller keeps its pre-turn
//! history and the process carries on.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that can end a turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No connected server offers any tool.
    #[error("no tool servers available")]
    NoServersAvailable,

    /// The model asked for a tool no connected server exposes.
    #[error("no server exposes tool '{name}'")]
    UnknownTool { name: String },

    /// The model's argument document for a call is not a JSON object.
    #[error("malformed arguments for tool '{tool}': {reason}")]
    MalformedArguments { tool: String, reason: String },

    /// The owning server could not complete the call.
    #[error("tool '{tool}' failed: {source}")]
    ToolTransport {
        tool: String,
        #[source]
        source: McpError,
    },

    /// The model endpoint failed.
    #[error("model request failed: {0}")]
    Model(#[from] InferenceError),
}
