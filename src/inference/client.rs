//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests to the configured endpoint
//! and reduces each response to a `ModelReply`: either a final answer or
//! the list of tool calls the model wants made.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use uuid::Uuid;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionCallResponse, ModelReply,
    ToolCallResponse, ToolDefinition,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// A stateless chat completion endpoint.
///
/// Given the ordered history and, optionally, the tools the model may call,
/// returns the model's decision. Passing `None` for `tools` asks for plain
/// text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
}

impl InferenceClient {
    /// Create a client. Does NOT check connectivity; that happens on the
    /// first request.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tools: tools.map(<[ToolDefinition]>::to_vec),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_completion_tokens: self.config.max_completion_tokens,
        }
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ModelReply, InferenceError> {
        let url = self.config.completions_url();
        let body = self.build_request(messages, tools);

        // Log the request metadata (not the full body; it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            has_tools = body.tools.is_some(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_completion_tokens = body.max_completion_tokens,
            "=== LLM REQUEST ==="
        );

        let start = Instant::now();
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "model endpoint returned an error");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| InferenceError::ResponseError {
            reason: format!("failed to read response body: {e}"),
        })?;

        let reply = parse_completion_response(&body_text)?;
        let tool_calls = match &reply {
            ModelReply::ToolCalls(calls) => calls.len(),
            ModelReply::Answer(_) => 0,
        };
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            tool_calls,
            "=== LLM RESPONSE ==="
        );
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

/// Reduce a chat completion body to the model's decision.
///
/// Only the first choice is considered. Any non-empty `tool_calls` list
/// makes it a tool-call reply regardless of `finish_reason`; calls without
/// an id get a generated `call_<uuid>` so results can still be correlated.
pub fn parse_completion_response(body: &str) -> Result<ModelReply, InferenceError> {
    let resp: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseError {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseError {
            reason: "empty choices array".into(),
        })?;

    let calls: Vec<ToolCallResponse> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallResponse {
            id: tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: tc.function.name,
                arguments: tc.function.arguments.unwrap_or_default(),
            },
        })
        .collect();

    if !calls.is_empty() {
        return Ok(ModelReply::ToolCalls(calls));
    }

    if choice.finish_reason.as_deref() == Some("tool_calls") {
        tracing::warn!("finish_reason is tool_calls but no calls were returned");
    }

    Ok(ModelReply::Answer(choice.message.content.unwrap_or_default()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
