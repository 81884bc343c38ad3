//! Aggregated tool catalog across all connected servers.
//!
//! Provides:
//! - The ordered list of tool descriptors offered to the model
//! - The routing map from tool name to owning server identity
//! - Detection of shadowed names when two servers expose the same tool
//!
//! Tool names share one flat namespace. When two servers expose the same
//! name, the server registered later owns it and the earlier descriptor is
//! dropped from the offered list.

use std::collections::HashMap;

use super::types::ToolDescriptor;

// ─── AggregatedCatalog ───────────────────────────────────────────────────────

/// Snapshot of every tool the model may call and who serves it.
#[derive(Debug, Clone, Default)]
pub struct AggregatedCatalog {
    /// `(server identity, descriptor)` in registration order.
    entries: Vec<(String, ToolDescriptor)>,
    /// `tool name → server identity`.
    owners: HashMap<String, String>,
}

/// A tool name claimed by more than one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowed {
    pub tool: String,
    /// Identity that owned the name before.
    pub previous: String,
    /// Identity that owns it now.
    pub owner: String,
}

impl AggregatedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one server's tools, in listing order.
    ///
    /// Returns the names this registration took over from other servers.
    pub fn register_server_tools(
        &mut self,
        identity: &str,
        tools: impl IntoIterator<Item = ToolDescriptor>,
    ) -> Vec<Shadowed> {
        let mut shadowed = Vec::new();

        for tool in tools {
            if let Some(previous) = self.owners.insert(tool.name.clone(), identity.to_string()) {
                if previous != identity {
                    shadowed.push(Shadowed {
                        tool: tool.name.clone(),
                        previous,
                        owner: identity.to_string(),
                    });
                }
                self.entries.retain(|(_, existing)| existing.name != tool.name);
            }
            self.entries.push((identity.to_string(), tool));
        }

        shadowed
    }

    /// Look up which server identity owns a tool.
    pub fn server_for(&self, tool: &str) -> Option<&str> {
        self.owners.get(tool).map(String::as_str)
    }

    /// Look up a tool's descriptor.
    pub fn get_tool(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.entries
            .iter()
            .find(|(_, def)| def.name == tool)
            .map(|(_, def)| def)
    }

    /// Descriptors in the order they are offered to the model.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|(_, def)| def)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.entries.iter().map(|(_, def)| def.name.as_str()).collect()
    }

    /// Names of the tools a server currently owns.
    pub fn tools_for_server(&self, identity: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(srv, _)| srv == identity)
            .map(|(_, def)| def.name.as_str())
            .collect()
    }

    /// Number of routable tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One-line overview, e.g. `"3 tools across 2 servers: stdio0 (2), sse0 (1)"`.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "no tools available".to_string();
        }

        let mut servers: Vec<&str> = Vec::new();
        for (srv, _) in &self.entries {
            if !servers.contains(&srv.as_str()) {
                servers.push(srv);
            }
        }

        let parts: Vec<String> = servers
            .iter()
            .map(|srv| format!("{srv} ({})", self.tools_for_server(srv).len()))
            .collect();

        format!(
            "{} tools across {} servers: {}",
            self.len(),
            servers.len(),
            parts.join(", ")
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
