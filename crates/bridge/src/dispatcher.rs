//! The bridge's [`ToolDispatcher`]: every agent-loop tool call passes through
//! the permission broker before reaching the MCP pool.

use std::sync::Arc;

use async_trait::async_trait;

use {
    harbor_agents::{ToolDescriptor, ToolDispatcher},
    harbor_broker::PermissionBroker,
    harbor_mcp::McpManager,
};

pub struct BrokeredDispatcher {
    broker: Arc<PermissionBroker>,
    mcp: Arc<McpManager>,
    origin: String,
    /// Broker session charged for each call (implicit or explicit).
    session_id: String,
}

impl BrokeredDispatcher {
    pub fn new(
        broker: Arc<PermissionBroker>,
        mcp: Arc<McpManager>,
        origin: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            mcp,
            origin: origin.into(),
            session_id: session_id.into(),
        }
    }

    fn split_qualified(name: &str) -> anyhow::Result<(&str, &str)> {
        name.split_once('/')
            .ok_or_else(|| anyhow::anyhow!("tool name '{name}' is not server-qualified"))
    }
}

#[async_trait]
impl ToolDispatcher for BrokeredDispatcher {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
        let session = self.broker.sessions().get(&self.session_id).await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        // Explicit sessions run on their snapshot; implicit ones consult the
        // live grants. A missing list grant degrades the run to zero tools
        // rather than failing it.
        if session.kind == harbor_broker::SessionKind::Implicit
            && self.broker.check_tool_list(&self.origin).await.is_err()
        {
            return Ok(Vec::new());
        }
        // Implicit sessions fall back to the origin's allow-list; explicit
        // sessions filter on their declared capability set.
        let allow_list = self
            .broker
            .permissions_list(&self.origin)
            .await
            .allowed_tools;

        Ok(self
            .mcp
            .all_tools()
            .await
            .into_iter()
            .filter(|qt| {
                let name = qt.qualified_name();
                session.allows_tool(&name)
                    && allow_list
                        .as_ref()
                        .is_none_or(|allowed| allowed.iter().any(|t| *t == name))
            })
            .map(|qt| ToolDescriptor {
                name: qt.qualified_name(),
                description: qt.tool.description.clone().unwrap_or_default(),
                parameters: qt.tool.input_schema.clone(),
            })
            .collect())
    }

    async fn call(&self, name: &str, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.broker
            .admit_session_tool_call(&self.session_id, name)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let (server_id, tool) = Self::split_qualified(name)?;
        let result = self
            .mcp
            .call_tool(server_id, tool, args)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        if result.is_error {
            anyhow::bail!("{}", result.text());
        }
        Ok(serde_json::Value::String(result.text()))
    }
}
