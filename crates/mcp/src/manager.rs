//! McpManager: lifecycle for the pool of MCP server children.
//!
//! Per-server state machine: `stopped → starting → ready → (failed|stopped)`.
//! `ready → stopped` happens only on an explicit stop or helper shutdown; an
//! unexpected child exit marks the server `failed` and a later start retries.
//! The tools cache is filled when a server reaches `ready` and dropped on any
//! transition away from it.

use std::{collections::HashMap, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::RwLock,
    tracing::{info, warn},
};

use crate::{
    client::McpClient,
    error::{McpError, Result},
    types::{McpPromptDef, McpResourceDef, McpToolDef, ToolsCallResult},
};

/// Resolved command line for one server, produced by the installer from the
/// manifest (runtime resolution, env merging — none of that happens here).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Stopped,
    Starting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: String,
    pub state: ServerState,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A tool paired with the server that owns it. The qualified name
/// (`server/tool`) is what pages and the agent loop see.
#[derive(Debug, Clone, Serialize)]
pub struct QualifiedTool {
    pub server_id: String,
    #[serde(flatten)]
    pub tool: McpToolDef,
}

impl QualifiedTool {
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.server_id, self.tool.name)
    }
}

struct ServerEntry {
    spec: LaunchSpec,
    state: ServerState,
    client: Option<Arc<McpClient>>,
    tools: Option<Vec<McpToolDef>>,
    last_started_at: Option<u64>,
    last_error: Option<String>,
}

#[derive(Default)]
pub struct McpManager {
    inner: RwLock<HashMap<String, ServerEntry>>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server without starting it.
    pub async fn configure(&self, id: &str, spec: LaunchSpec) {
        let mut inner = self.inner.write().await;
        inner.insert(id.to_string(), ServerEntry {
            spec,
            state: ServerState::Stopped,
            client: None,
            tools: None,
            last_started_at: None,
            last_error: None,
        });
    }

    /// Replace a server's launch spec. Takes effect on the next start.
    pub async fn reconfigure(&self, id: &str, spec: LaunchSpec) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;
        entry.spec = spec;
        Ok(())
    }

    pub async fn configured_ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Start (or restart) a server: spawn, handshake, fill the tools cache.
    pub async fn start(&self, id: &str) -> Result<()> {
        // Tear down any existing child; a restart always invalidates caches.
        self.stop(id).await?;

        let spec = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .get_mut(id)
                .ok_or_else(|| McpError::NotFound(id.to_string()))?;
            entry.state = ServerState::Starting;
            entry.last_error = None;
            entry.spec.clone()
        };

        // Spawning and the handshake happen outside the lock so a slow server
        // never stalls operations on its peers.
        let connect = McpClient::connect(id, &spec.command, &spec.args, &spec.env).await;
        let client = match connect {
            Ok(client) => Arc::new(client),
            Err(e) => {
                self.mark_failed(id, &e.to_string()).await;
                return Err(e);
            },
        };

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(server = %id, error = %e, "tools/list after handshake failed");
                client.shutdown().await;
                self.mark_failed(id, &e.to_string()).await;
                return Err(e);
            },
        };

        info!(server = %id, tools = tools.len(), "MCP server ready");

        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(id) {
            entry.state = ServerState::Ready;
            entry.client = Some(client);
            entry.tools = Some(tools);
            entry.last_started_at = Some(now_ms());
        }
        Ok(())
    }

    /// Stop a server. Stopping a stopped or unknown-but-configured server is
    /// a no-op; unknown ids error.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let client = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .get_mut(id)
                .ok_or_else(|| McpError::NotFound(id.to_string()))?;
            entry.state = ServerState::Stopped;
            entry.tools = None;
            entry.client.take()
        };
        if let Some(client) = client {
            client.shutdown().await;
        }
        Ok(())
    }

    /// Drop a server from the pool entirely.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.inner.write().await.remove(id);
        Ok(())
    }

    async fn mark_failed(&self, id: &str, message: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.get_mut(id) {
            entry.state = ServerState::Failed;
            entry.client = None;
            entry.tools = None;
            entry.last_error = Some(message.to_string());
        }
    }

    pub async fn status(&self, id: &str) -> Result<ServerStatus> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;
        Ok(entry_status(id, entry))
    }

    pub async fn status_all(&self) -> Vec<ServerStatus> {
        let inner = self.inner.read().await;
        let mut statuses: Vec<ServerStatus> = inner
            .iter()
            .map(|(id, entry)| entry_status(id, entry))
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    /// Cached tool list for one ready server.
    pub async fn server_tools(&self, id: &str) -> Result<Vec<McpToolDef>> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;
        entry
            .tools
            .clone()
            .ok_or_else(|| McpError::NotConnected(id.to_string()))
    }

    /// Every tool on every ready server, qualified with its server id.
    pub async fn all_tools(&self) -> Vec<QualifiedTool> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for (id, entry) in inner.iter() {
            if let Some(tools) = &entry.tools {
                out.extend(tools.iter().cloned().map(|tool| QualifiedTool {
                    server_id: id.clone(),
                    tool,
                }));
            }
        }
        out.sort_by(|a, b| a.qualified_name().cmp(&b.qualified_name()));
        out
    }

    async fn ready_client(&self, id: &str) -> Result<Arc<McpClient>> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;
        match (entry.state, &entry.client) {
            (ServerState::Ready, Some(client)) => Ok(Arc::clone(client)),
            _ => Err(McpError::NotConnected(id.to_string())),
        }
    }

    /// Route one tool call to its server child.
    pub async fn call_tool(
        &self,
        id: &str,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolsCallResult> {
        let client = self.ready_client(id).await?;
        match client.call_tool(name, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // Distinguish a dead child from an in-protocol error: only the
                // former moves the state machine.
                if !client.is_alive().await {
                    warn!(server = %id, error = %e, "MCP child died during call");
                    self.mark_failed(id, &e.to_string()).await;
                    return Err(McpError::NotConnected(id.to_string()));
                }
                Err(e)
            },
        }
    }

    pub async fn list_resources(&self, id: &str) -> Result<Vec<McpResourceDef>> {
        self.ready_client(id).await?.list_resources().await
    }

    pub async fn list_prompts(&self, id: &str) -> Result<Vec<McpPromptDef>> {
        self.ready_client(id).await?.list_prompts().await
    }

    /// Helper exit: stop every child.
    pub async fn shutdown_all(&self) {
        let ids = self.configured_ids().await;
        for id in ids {
            let _ = self.stop(&id).await;
        }
    }
}

fn entry_status(id: &str, entry: &ServerEntry) -> ServerStatus {
    ServerStatus {
        id: id.to_string(),
        state: entry.state,
        tool_count: entry.tools.as_ref().map_or(0, Vec::len),
        pid: entry.client.as_ref().and_then(|c| c.pid()),
        last_started_at: entry.last_started_at,
        last_error: entry.last_error.clone(),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str) -> LaunchSpec {
        LaunchSpec {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_server_not_found() {
        let mgr = McpManager::new();
        assert!(matches!(
            mgr.start("ghost").await,
            Err(McpError::NotFound(_))
        ));
        assert!(matches!(
            mgr.call_tool("ghost", "t", serde_json::json!({})).await,
            Err(McpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_starts_stopped() {
        let mgr = McpManager::new();
        mgr.configure("srv", spec("echo")).await;
        let status = mgr.status("srv").await.unwrap();
        assert_eq!(status.state, ServerState::Stopped);
        assert_eq!(status.tool_count, 0);
    }

    #[tokio::test]
    async fn test_failed_spawn_marks_failed() {
        let mgr = McpManager::new();
        mgr.configure("srv", spec("nonexistent_command_xyz_42")).await;
        assert!(mgr.start("srv").await.is_err());
        let status = mgr.status("srv").await.unwrap();
        assert_eq!(status.state, ServerState::Failed);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_retry_after_failure_allowed() {
        let mgr = McpManager::new();
        mgr.configure("srv", spec("nonexistent_command_xyz_42")).await;
        assert!(mgr.start("srv").await.is_err());
        // A later start attempt runs the machine again rather than being
        // rejected outright.
        assert!(mgr.start("srv").await.is_err());
        assert_eq!(
            mgr.status("srv").await.unwrap().state,
            ServerState::Failed
        );
    }

    #[tokio::test]
    async fn test_call_on_stopped_is_not_connected() {
        let mgr = McpManager::new();
        mgr.configure("srv", spec("echo")).await;
        assert!(matches!(
            mgr.call_tool("srv", "t", serde_json::json!({})).await,
            Err(McpError::NotConnected(_))
        ));
        assert!(matches!(
            mgr.server_tools("srv").await,
            Err(McpError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_remove_drops() {
        let mgr = McpManager::new();
        mgr.configure("srv", spec("echo")).await;
        mgr.stop("srv").await.unwrap();
        mgr.stop("srv").await.unwrap();
        mgr.remove("srv").await.unwrap();
        assert!(matches!(
            mgr.status("srv").await,
            Err(McpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_all_tools_empty_when_nothing_ready() {
        let mgr = McpManager::new();
        mgr.configure("a", spec("echo")).await;
        mgr.configure("b", spec("echo")).await;
        assert!(mgr.all_tools().await.is_empty());
    }

    #[test]
    fn test_qualified_name() {
        let qt = QualifiedTool {
            server_id: "time-wasm".into(),
            tool: McpToolDef {
                name: "time.now".into(),
                description: None,
                input_schema: serde_json::json!({"type": "object"}),
            },
        };
        assert_eq!(qt.qualified_name(), "time-wasm/time.now");
    }
}
