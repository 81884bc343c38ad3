//! Agent Core: conversation state and the per-turn dispatch loop.
//!
//! Submodules:
//! - `conversation`: Bounded conversation history
//! - `dispatch`: One turn from user text through tool calls to an answer
//! - `types`: Conversation messages and turn events
//! - `errors`: Turn-level error types

pub mod conversation;
pub mod dispatch;
pub mod errors;
pub mod types;

pub use conversation::ConversationHistory;
pub use dispatch::{DispatchLoop, DispatchSettings};
pub use errors::AgentError;
pub use types::{ConversationMessage, ToolCallSummary, TurnEvent};
