//! Shared types for the agent core.
//!
//! Conversation messages and the progress events a turn emits.

use serde::Serialize;

use crate::inference::types::{ChatMessage, Role, ToolCallResponse};

// ─── Conversation Messages ──────────────────────────────────────────────────

/// A single entry in the conversation history, in the order it is shown to
/// the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    /// Assistant output. When the model asked for tools, `tool_calls` holds
    /// the raw request list and `content` its JSON encoding.
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallResponse>,
    },
    /// Text returned by one tool invocation.
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ConversationMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ConversationMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ConversationMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// Assistant record of the tool calls the model requested.
    pub fn tool_calls(calls: Vec<ToolCallResponse>) -> Self {
        let content = serde_json::to_string(&calls).unwrap_or_default();
        ConversationMessage::Assistant {
            content,
            tool_calls: calls,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ConversationMessage::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            ConversationMessage::System { .. } => Role::System,
            ConversationMessage::User { .. } => Role::User,
            ConversationMessage::Assistant { .. } => Role::Assistant,
            ConversationMessage::ToolResult { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ConversationMessage::System { content }
            | ConversationMessage::User { content }
            | ConversationMessage::Assistant { content, .. }
            | ConversationMessage::ToolResult { content, .. } => content,
        }
    }

    /// For tool results: the id of the call this answers.
    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            ConversationMessage::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Whether this is an assistant record of requested tool calls.
    pub fn is_tool_call_record(&self) -> bool {
        matches!(self, ConversationMessage::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    }

    /// Wire form sent to the model endpoint.
    ///
    /// The tool-call record goes out as plain assistant text, never as a
    /// structured `tool_calls` field.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self {
            ConversationMessage::System { content } => ChatMessage::system(content.clone()),
            ConversationMessage::User { content } => ChatMessage::user(content.clone()),
            ConversationMessage::Assistant { content, .. } => {
                ChatMessage::assistant(content.clone())
            }
            ConversationMessage::ToolResult {
                tool_call_id,
                content,
            } => ChatMessage::tool(tool_call_id.clone(), content.clone()),
        }
    }
}

// ─── Turn Events ────────────────────────────────────────────────────────────

/// Progress notifications emitted while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The model asked for these tools, in this order.
    ToolCallsRequested { calls: Vec<ToolCallSummary> },
    /// One tool finished; `content` is what the model will see.
    ToolResult {
        call_id: String,
        tool: String,
        server: String,
        content: String,
        truncated: bool,
        is_error: bool,
    },
}

/// Name and raw arguments of one requested call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallSummary {
    pub call_id: String,
    pub tool: String,
    pub arguments: String,
}

impl From<&ToolCallResponse> for ToolCallSummary {
    fn from(call: &ToolCallResponse) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
