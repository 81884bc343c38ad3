//! Inference Client: OpenAI-compatible chat completions.
//!
//! This module handles all communication with the model endpoint:
//! - Request building (history, tool schema, `tool_choice: auto`)
//! - Bearer authentication and HTTP error mapping
//! - Reducing a response to a final answer or a list of tool calls
//! - Model settings from the environment
//!
//! The dispatch loop only sees the `ChatModel` trait, so the endpoint is
//! interchangeable (and scriptable in tests).

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatModel, InferenceClient};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, ModelReply, Role, ToolCallResponse, ToolDefinition};
