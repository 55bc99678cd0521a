use std::pin::Pin;

use {async_trait::async_trait, tokio_stream::Stream};

use crate::error::Result;

/// One chat completion request, normalized across providers.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    /// OpenAI-shaped message objects (`{role, content, ...}`).
    pub messages: Vec<serde_json::Value>,
    /// Tool schemas (`{name, description, parameters}`); empty for plain chat.
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl ChatRequest {
    /// Messages with the system prompt (when set) prepended.
    pub fn full_messages(&self) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            out.push(serde_json::json!({"role": "system", "content": system}));
        }
        out.extend(self.messages.iter().cloned());
        out
    }
}

/// A structured tool call extracted from a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Normalized completion result.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<String>,
    pub model: String,
}

/// Streaming token events.
#[derive(Debug, Clone)]
pub enum TokenEvent {
    Delta(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}

pub type TokenStream = Pin<Box<dyn Stream<Item = TokenEvent> + Send>>;

/// A model provider adapter.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider key (`"openai"`, `"ollama"`, …) used for routing and
    /// the native-tools classifier.
    fn name(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Stream completion tokens. Tools are not supported on the streaming
    /// path; the agent loop uses `chat`.
    fn chat_streaming(&self, request: ChatRequest) -> TokenStream;
}
