//! Adapter for a local Ollama runtime.

use {async_stream::stream, futures::StreamExt, tracing::trace};

use crate::{
    error::{ModelError, Result},
    model::{
        ChatRequest, ChatResponse, LlmProvider, ModelInfo, TokenEvent, TokenStream,
        ToolCallRequest,
    },
    shared_http_client,
};

pub struct OllamaProvider {
    base_url: String,
}

impl OllamaProvider {
    pub const DEFAULT_BASE_URL: &'static str = "http://127.0.0.1:11434";

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn request_body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.full_messages(),
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["options"] = serde_json::json!({"temperature": temperature});
        }
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| serde_json::json!({"type": "function", "function": t}))
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let resp: serde_json::Value = shared_http_client()
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(ModelInfo::new)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        trace!(model = %request.model, "ollama chat request");

        let resp = shared_http_client()
            .post(&url)
            .json(&Self::request_body(request, false))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::LlmFailed(format!("{status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await?;
        let message = &value["message"];

        let content = message["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string);

        let tool_calls: Vec<ToolCallRequest> = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .enumerate()
                    .filter_map(|(i, call)| {
                        let function = &call["function"];
                        Some(ToolCallRequest {
                            id: format!("ollama-{i}"),
                            name: function["name"].as_str()?.to_string(),
                            arguments: function
                                .get("arguments")
                                .cloned()
                                .unwrap_or(serde_json::json!({})),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if content.is_none() && tool_calls.is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason: value["done_reason"].as_str().map(ToString::to_string),
            model: value["model"].as_str().unwrap_or(&request.model).to_string(),
        })
    }

    fn chat_streaming(&self, request: ChatRequest) -> TokenStream {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::request_body(&request, true);

        Box::pin(stream! {
            let resp = match shared_http_client().post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    yield TokenEvent::Error(format!("stream request failed: {}", resp.status()));
                    return;
                },
                Err(e) => {
                    yield TokenEvent::Error(e.to_string());
                    return;
                },
            };

            // Ollama streams newline-delimited JSON objects.
            let mut bytes = resp.bytes_stream();
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield TokenEvent::Error(e.to_string());
                        return;
                    },
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                        continue;
                    };
                    if let Some(delta) = value["message"]["content"].as_str() {
                        if !delta.is_empty() {
                            yield TokenEvent::Delta(delta.to_string());
                        }
                    }
                    if value["done"].as_bool() == Some(true) {
                        yield TokenEvent::Done;
                        return;
                    }
                }
            }
            yield TokenEvent::Done;
        })
    }
}
