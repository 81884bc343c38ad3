//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while connecting to, or talking with, a tool server.
#[derive(Debug, Error)]
pub enum McpError {
    /// The transport could not be established (spawn failure, refused
    /// connection, event stream never announced its endpoint).
    #[error("failed to connect to server '{name}': {reason}")]
    ConnectionFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("server '{name}' initialization failed: {reason}")]
    HandshakeFailed {
        name: String,
        reason: String,
    },

    /// The transport spec cannot be turned into a transport.
    #[error("invalid transport spec '{spec}': {reason}")]
    InvalidSpec {
        spec: String,
        reason: String,
    },

    /// An identity was reused while its session is still connected.
    #[error("server identity '{identity}' is already connected")]
    DuplicateServer {
        identity: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Tool not found in the routing map.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// No connected session carries this identity.
    #[error("unknown server: '{identity}'")]
    UnknownServer {
        identity: String,
    },
}

impl McpError {
    /// Whether the failure happened on the wire rather than in routing.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::TransportError { .. } | McpError::ServerError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transport() {
        assert!(McpError::TransportError {
            server: "stdio0".into(),
            reason: "closed".into(),
        }
        .is_transport());
        assert!(McpError::ServerError {
            code: -32603,
            message: "boom".into(),
            data: None,
        }
        .is_transport());
        assert!(!McpError::UnknownTool { name: "add".into() }.is_transport());
    }

    #[test]
    fn test_display_carries_context() {
        let err = McpError::InvalidSpec {
            spec: "server.rb".into(),
            reason: "server script must be a .py or .js file".into(),
        };
        let text = err.to_string();
        assert!(text.contains("server.rb"));
        assert!(text.contains(".py or .js"));
    }
}
