//! MCP Client: JSON-RPC sessions with one or more tool servers.
//!
//! This module handles:
//! - Spawning local server scripts and talking JSON-RPC over their stdio
//! - Connecting to remote servers over HTTP + server-sent events
//! - The MCP handshake, tool listing and tool invocation
//! - Aggregating every server's tools into one routable catalog
//! - Session teardown
//!
//! `SessionRegistry` is the entry point: the dispatch loop asks it for the
//! catalog and hands it tool calls to route.

pub mod catalog;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use catalog::AggregatedCatalog;
pub use errors::McpError;
pub use lifecycle::TransportSpec;
pub use registry::{SessionRecord, SessionRegistry};
pub use session::{McpSession, TransportKind};
pub use types::{ContentBlock, ServerInfo, ToolDescriptor, ToolResult};
