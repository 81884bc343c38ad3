//! Session registry: the set of connected tool servers.
//!
//! Owns every live `McpSession` keyed by its identity, keeps the aggregated
//! tool catalog in sync with them, and routes tool invocations to the
//! server that owns the tool name.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::{AggregatedCatalog, Shadowed};
use super::errors::McpError;
use super::lifecycle::{self, TransportSpec};
use super::session::{McpSession, TransportKind};
use super::types::{ServerInfo, ToolDescriptor, ToolResult};

// ─── SessionRecord ───────────────────────────────────────────────────────────

/// What the registry knows about one connected server.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// Unique key, e.g. `"stdio0"` or `"sse1"`.
    pub identity: String,
    pub kind: TransportKind,
    /// Server name and version from the handshake.
    pub server_info: ServerInfo,
    /// Tool names from the most recent listing.
    pub tools: BTreeSet<String>,
    pub connected_at: DateTime<Utc>,
}

struct Connected {
    record: SessionRecord,
    session: McpSession,
    /// Last successful listing, used when a refresh fails.
    listing: Vec<ToolDescriptor>,
}

// ─── SessionRegistry ─────────────────────────────────────────────────────────

/// Connected servers in registration order plus the routing catalog
/// derived from their tool listings.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Vec<Connected>,
    catalog: AggregatedCatalog,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Establish a transport, handshake, list tools and register the server.
    ///
    /// On failure nothing is registered and any spawned process is released.
    pub async fn connect(
        &mut self,
        identity: &str,
        spec: &TransportSpec,
    ) -> Result<SessionRecord, McpError> {
        self.ensure_unused(identity)?;
        let session = lifecycle::open(identity, spec).await?;
        self.attach(identity, session).await
    }

    /// Register an already-open session: handshake, list tools, route.
    pub async fn attach(
        &mut self,
        identity: &str,
        mut session: McpSession,
    ) -> Result<SessionRecord, McpError> {
        self.ensure_unused(identity)?;

        let init = match lifecycle::handshake(&mut session).await {
            Ok(init) => init,
            Err(e) => {
                release(&mut session).await;
                return Err(e);
            }
        };

        let listing = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                release(&mut session).await;
                return Err(McpError::HandshakeFailed {
                    name: identity.to_string(),
                    reason: format!("tools/list failed: {e}"),
                });
            }
        };

        let record = SessionRecord {
            identity: identity.to_string(),
            kind: session.kind(),
            server_info: init.server_info.unwrap_or_default(),
            tools: listing.iter().map(|t| t.name.clone()).collect(),
            connected_at: Utc::now(),
        };

        tracing::info!(
            server = identity,
            kind = %record.kind,
            server_name = record.server_info.name.as_deref().unwrap_or("unknown"),
            tool_count = record.tools.len(),
            "connected to server"
        );

        self.sessions.push(Connected {
            record: record.clone(),
            session,
            listing,
        });
        self.rebuild_catalog();

        Ok(record)
    }

    /// Close one session and drop its routing entries.
    pub async fn disconnect(&mut self, identity: &str) -> Result<(), McpError> {
        let index = self
            .sessions
            .iter()
            .position(|c| c.record.identity == identity)
            .ok_or_else(|| McpError::UnknownServer {
                identity: identity.to_string(),
            })?;

        let mut connected = self.sessions.remove(index);
        self.rebuild_catalog();
        tracing::info!(server = identity, "disconnecting server");
        connected.session.close().await
    }

    /// Close every session in registration order.
    ///
    /// Failures are collected rather than aborting the teardown; the
    /// registry is empty afterwards either way.
    pub async fn close_all(&mut self) -> Vec<(String, McpError)> {
        let mut errors = Vec::new();

        for mut connected in self.sessions.drain(..) {
            let identity = connected.record.identity;
            match connected.session.close().await {
                Ok(()) => tracing::debug!(server = %identity, "session closed"),
                Err(e) => {
                    tracing::warn!(server = %identity, error = %e, "failed to close session");
                    errors.push((identity, e));
                }
            }
        }

        self.catalog = AggregatedCatalog::new();
        errors
    }

    fn ensure_unused(&self, identity: &str) -> Result<(), McpError> {
        if self.sessions.iter().any(|c| c.record.identity == identity) {
            return Err(McpError::DuplicateServer {
                identity: identity.to_string(),
            });
        }
        Ok(())
    }

    // ─── Catalog ─────────────────────────────────────────────────────────

    /// Re-list every session's tools and rebuild the routing map.
    ///
    /// A session whose listing fails keeps its previous tools; it stays
    /// registered until disconnected.
    pub async fn catalog(&mut self) -> AggregatedCatalog {
        self.refresh_listings().await;
        self.rebuild_catalog();
        self.catalog.clone()
    }

    async fn refresh_listings(&mut self) {
        for connected in &mut self.sessions {
            match connected.session.list_tools().await {
                Ok(tools) => {
                    connected.record.tools = tools.iter().map(|t| t.name.clone()).collect();
                    connected.listing = tools;
                }
                Err(e) => {
                    tracing::warn!(
                        server = %connected.record.identity,
                        error = %e,
                        "tool listing failed; keeping previous catalog entries"
                    );
                }
            }
        }
    }

    /// Catalog as of the last connect or refresh, without server traffic.
    pub fn cached_catalog(&self) -> &AggregatedCatalog {
        &self.catalog
    }

    /// Rebuild the routing map from every session's cached listing.
    ///
    /// Returns the shadowings for names whose owner changed since the
    /// previous map; those are logged at `warn`, unchanged ones at `debug`.
    fn rebuild_catalog(&mut self) -> Vec<Shadowed> {
        let mut catalog = AggregatedCatalog::new();
        let mut shadowed = Vec::new();
        for connected in &self.sessions {
            shadowed.extend(
                catalog.register_server_tools(
                    &connected.record.identity,
                    connected.listing.iter().cloned(),
                ),
            );
        }

        let mut changed = Vec::new();
        for s in shadowed {
            if self.catalog.server_for(&s.tool) == catalog.server_for(&s.tool) {
                tracing::debug!(
                    tool = %s.tool,
                    previous = %s.previous,
                    owner = %s.owner,
                    "tool name still shadowed"
                );
            } else {
                tracing::warn!(
                    tool = %s.tool,
                    previous = %s.previous,
                    owner = %s.owner,
                    "tool name exposed by more than one server; later server wins"
                );
                changed.push(s);
            }
        }

        self.catalog = catalog;
        changed
    }

    /// Which server identity owns `tool`.
    pub fn resolve(&self, tool: &str) -> Result<&str, McpError> {
        self.catalog
            .server_for(tool)
            .ok_or_else(|| McpError::UnknownTool {
                name: tool.to_string(),
            })
    }

    // ─── Tool Execution ──────────────────────────────────────────────────

    /// Route a tool call to its owning server and return the raw result.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let start = Instant::now();
        let identity = self.resolve(tool)?;
        let connected = self.find(identity)?;

        let result = connected.session.call_tool(tool, arguments).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(r) => tracing::info!(
                tool,
                server = identity,
                elapsed_ms,
                is_error = r.is_error,
                "tool call completed"
            ),
            Err(e) => tracing::warn!(
                tool,
                server = identity,
                elapsed_ms,
                error = %e,
                "tool call failed"
            ),
        }
        result
    }

    /// Ask one server for its current tools without touching the catalog.
    pub async fn list_server_tools(&self, identity: &str) -> Result<Vec<ToolDescriptor>, McpError> {
        self.find(identity)?.session.list_tools().await
    }

    fn find(&self, identity: &str) -> Result<&Connected, McpError> {
        self.sessions
            .iter()
            .find(|c| c.record.identity == identity)
            .ok_or_else(|| McpError::UnknownServer {
                identity: identity.to_string(),
            })
    }

    // ─── Status ──────────────────────────────────────────────────────────

    /// Records of all connected servers, in registration order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.iter().map(|c| &c.record)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.sessions.iter().any(|c| c.record.identity == identity)
    }

    /// Whether at least one connected server offers at least one tool.
    pub fn has_tools(&self) -> bool {
        !self.catalog.is_empty()
    }
}

/// Best-effort teardown of a session that never made it into the registry.
async fn release(session: &mut McpSession) {
    if let Err(e) = session.close().await {
        tracing::debug!(server = session.name(), error = %e, "cleanup after failed connect");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
