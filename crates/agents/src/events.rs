use serde::{Deserialize, Serialize};

/// Events emitted by one `agent.run` call. The stream ends after exactly one
/// `Final` or `Error` (or silently on abort).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model produced reasoning text alongside (or before) a tool call.
    Thinking { text: String },
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    ToolResult {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Final { text: String },
    Error { message: String },
}
