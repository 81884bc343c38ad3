//! Dispatch loop: one conversational turn from user text to answer.
//!
//! ```text
//! AwaitingModel ─┬─ answer ────────────────────────────────────────┐
//!                └─ tool calls ─ for each call, in model order:    │
//!                      resolve → decode args → invoke → fold        │
//!                      → synthesis model call (no tools offered)    │
//!                                                                   ▼
//!                                             truncate history → Done
//! ```
//!
//! The turn works on a copy of the caller's history. Any failure returns
//! an error and the caller's history is left exactly as it was, without
//! the new user message.

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{HISTORY_LIMIT, TOOL_RESPONSE_LIMIT};
use crate::inference::types::{ModelReply, ToolCallResponse, ToolDefinition};
use crate::inference::ChatModel;
use crate::mcp_client::{McpError, SessionRegistry, ToolDescriptor};

use super::conversation::{truncate_chars, ConversationHistory};
use super::errors::AgentError;
use super::types::{ConversationMessage, ToolCallSummary, TurnEvent};

// ─── Settings ───────────────────────────────────────────────────────────────

/// Bounds applied during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Maximum characters of tool output folded into the history.
    pub tool_response_limit: usize,
    /// Messages kept after each completed turn.
    pub history_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            tool_response_limit: TOOL_RESPONSE_LIMIT,
            history_limit: HISTORY_LIMIT,
        }
    }
}

// ─── DispatchLoop ───────────────────────────────────────────────────────────

/// Drives turns between a chat model and the connected tool servers.
pub struct DispatchLoop<M> {
    model: M,
    settings: DispatchSettings,
    events: Option<UnboundedSender<TurnEvent>>,
}

impl<M: ChatModel> DispatchLoop<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            settings: DispatchSettings::default(),
            events: None,
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Send progress events to `tx` while turns run.
    pub fn with_events(mut self, tx: UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run one turn and return the new, truncated history.
    pub async fn run_turn(
        &self,
        registry: &mut SessionRegistry,
        history: &ConversationHistory,
        user_text: &str,
    ) -> Result<ConversationHistory, AgentError> {
        let mut turn = history.clone();
        turn.push(ConversationMessage::user(user_text));

        if registry.session_count() == 0 {
            return Err(AgentError::NoServersAvailable);
        }
        let catalog = registry.catalog().await;
        if catalog.is_empty() {
            return Err(AgentError::NoServersAvailable);
        }
        let tools: Vec<ToolDefinition> = catalog.descriptors().map(tool_definition).collect();

        tracing::info!(
            model = self.model.model_name(),
            history_len = turn.len(),
            tool_count = tools.len(),
            "turn started"
        );

        let reply = self
            .model
            .complete(&turn.to_chat_messages(), Some(&tools))
            .await?;

        match reply {
            ModelReply::Answer(text) => {
                turn.push(ConversationMessage::assistant(text));
            }
            ModelReply::ToolCalls(calls) => {
                tracing::info!(
                    calls = ?calls.iter().map(|c| c.function.name.as_str()).collect::<Vec<_>>(),
                    "model requested tool calls"
                );
                self.emit(TurnEvent::ToolCallsRequested {
                    calls: calls.iter().map(ToolCallSummary::from).collect(),
                });
                turn.push(ConversationMessage::tool_calls(calls.clone()));

                for call in &calls {
                    self.process_call(registry, &mut turn, call).await?;
                }
            }
        }

        let dropped = turn.truncate_to_recent(self.settings.history_limit);
        tracing::debug!(
            history_len = turn.len(),
            dropped,
            "turn completed"
        );
        Ok(turn)
    }

    /// Resolve, invoke and fold one tool call, then ask the model to
    /// synthesize a reply from that result alone.
    async fn process_call(
        &self,
        registry: &SessionRegistry,
        turn: &mut ConversationHistory,
        call: &ToolCallResponse,
    ) -> Result<(), AgentError> {
        let tool = call.function.name.as_str();

        let server = registry
            .resolve(tool)
            .map_err(|_| AgentError::UnknownTool {
                name: tool.to_string(),
            })?
            .to_string();
        let arguments = decode_arguments(tool, &call.function.arguments)?;

        let result = registry
            .invoke(tool, arguments)
            .await
            .map_err(|e| match e {
                McpError::UnknownTool { name } => AgentError::UnknownTool { name },
                source => AgentError::ToolTransport {
                    tool: tool.to_string(),
                    source,
                },
            })?;

        let text = result.to_text();
        let content = truncate_chars(&text, self.settings.tool_response_limit);
        let truncated = content.len() < text.len();

        tracing::info!(
            tool,
            server = %server,
            call_id = %call.id,
            truncated,
            is_error = result.is_error,
            "tool result folded into history"
        );
        self.emit(TurnEvent::ToolResult {
            call_id: call.id.clone(),
            tool: tool.to_string(),
            server,
            content: content.to_string(),
            truncated,
            is_error: result.is_error,
        });
        turn.push(ConversationMessage::tool_result(&call.id, content));

        let synthesis = match self.model.complete(&turn.to_chat_messages(), None).await? {
            ModelReply::Answer(text) => text,
            ModelReply::ToolCalls(calls) => {
                tracing::warn!(
                    count = calls.len(),
                    "model requested tools during synthesis; ignoring them"
                );
                String::new()
            }
        };
        turn.push(ConversationMessage::assistant(synthesis));

        Ok(())
    }
}

/// OpenAI function definition for one catalog entry.
fn tool_definition(descriptor: &ToolDescriptor) -> ToolDefinition {
    ToolDefinition::function(
        descriptor.name.clone(),
        descriptor.description.clone(),
        descriptor.input_schema.clone(),
    )
}

/// Decode a model-supplied argument document into a JSON object.
///
/// An empty string or `null` means "no arguments".
fn decode_arguments(tool: &str, raw: &str) -> Result<Value, AgentError> {
    let malformed = |reason: String| AgentError::MalformedArguments {
        tool: tool.to_string(),
        reason,
    };

    if raw.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(Value::Null) => Ok(Value::Object(serde_json::Map::new())),
        Ok(other) => Err(malformed(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(malformed(e.to_string())),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
