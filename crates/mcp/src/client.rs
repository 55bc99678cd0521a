//! MCP client: the protocol handshake and tool/resource/prompt calls against
//! one server child.

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    error::{McpError, Result},
    transport::StdioTransport,
    types::{
        ClientCapabilities, ClientInfo, InitializeParams, InitializeResult, McpPromptDef,
        McpResourceDef, McpToolDef, PROTOCOL_VERSION, PromptsListResult, ResourcesListResult,
        ToolsCallParams, ToolsCallResult, ToolsListResult,
    },
};

pub struct McpClient {
    server_id: String,
    transport: Arc<StdioTransport>,
    server_info: Option<InitializeResult>,
}

impl McpClient {
    /// Spawn the server process and complete the MCP handshake
    /// (`initialize` + `notifications/initialized`).
    pub async fn connect(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let transport = StdioTransport::spawn(server_id, command, args, env).await?;

        let mut client = Self {
            server_id: server_id.to_string(),
            transport,
            server_info: None,
        };

        if let Err(e) = client.initialize().await {
            warn!(server = %server_id, error = %e, "MCP initialize handshake failed");
            client.transport.kill().await;
            return Err(e);
        }

        Ok(client)
    }

    async fn initialize(&mut self) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "harbor".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request(
                "initialize",
                Some(serde_json::to_value(&params).map_err(|e| McpError::Protocol(e.to_string()))?),
            )
            .await?;

        let result: InitializeResult = serde_json::from_value(
            resp.result
                .ok_or_else(|| McpError::Protocol("initialize returned no result".into()))?,
        )
        .map_err(|e| McpError::Protocol(format!("bad initialize result: {e}")))?;

        info!(
            server = %self.server_id,
            protocol = %result.protocol_version,
            server_name = %result.server_info.name,
            "MCP server initialized"
        );
        self.server_info = Some(result);

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(())
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let resp = self.transport.request("tools/list", None).await?;
        let result: ToolsListResult = parse_result(resp.result, "tools/list")?;
        debug!(server = %self.server_id, count = result.tools.len(), "fetched MCP tools");
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolsCallResult> {
        let params = ToolsCallParams {
            name: name.into(),
            arguments,
        };
        let resp = self
            .transport
            .request(
                "tools/call",
                Some(serde_json::to_value(&params).map_err(|e| McpError::Protocol(e.to_string()))?),
            )
            .await?;
        parse_result(resp.result, "tools/call")
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResourceDef>> {
        let resp = self.transport.request("resources/list", None).await?;
        let result: ResourcesListResult = parse_result(resp.result, "resources/list")?;
        Ok(result.resources)
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPromptDef>> {
        let resp = self.transport.request("prompts/list", None).await?;
        let result: PromptsListResult = parse_result(resp.result, "prompts/list")?;
        Ok(result.prompts)
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    pub async fn shutdown(&self) {
        self.transport.kill().await;
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(
    result: Option<serde_json::Value>,
    method: &str,
) -> Result<T> {
    let value = result.ok_or_else(|| McpError::Protocol(format!("{method} returned no result")))?;
    serde_json::from_value(value)
        .map_err(|e| McpError::Protocol(format!("bad {method} result: {e}")))
}
