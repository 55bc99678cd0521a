use {async_trait::async_trait, serde::Serialize};

/// A tool the current run may call, under its qualified name
/// (`server/tool`).
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Executes tool calls for the orchestrator. The bridge's implementation
/// routes through the permission broker and the MCP manager; tests use
/// in-memory fakes.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Tools the session (or origin) is permitted to call.
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;

    /// Dispatch one call. A tool-level failure comes back as `Err`; the
    /// orchestrator converts it into a `tool_result` event with an `error`
    /// field so the loop can recover.
    async fn call(&self, name: &str, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}
