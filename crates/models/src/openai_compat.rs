//! Adapter for OpenAI-compatible chat completion APIs.
//!
//! "Compatible" in practice means several response dialects: the full
//! `choices[0].message` shape, a bare `{content}`, or a nested `{message}`.
//! [`normalize_response`] coalesces all three.

use {
    async_stream::stream,
    futures::StreamExt,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, trace},
};

use crate::{
    error::{ModelError, Result},
    model::{
        ChatRequest, ChatResponse, LlmProvider, ModelInfo, TokenEvent, TokenStream,
        ToolCallRequest,
    },
    shared_http_client,
};

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.full_messages(),
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
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

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/v1/models", self.base_url);
        let resp: serde_json::Value = self
            .authorized(shared_http_client().get(&url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(ModelInfo::new)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(request, false);
        trace!(provider = %self.name, model = %request.model, "chat request");

        let resp = self
            .authorized(shared_http_client().post(&url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ModelError::LlmFailed(format!("{status}: {text}")));
        }

        let value: serde_json::Value = resp.json().await?;
        let response = normalize_response(&value, &request.model)?;
        debug!(
            provider = %self.name,
            tool_calls = response.tool_calls.len(),
            has_content = response.content.is_some(),
            "chat response"
        );
        Ok(response)
    }

    fn chat_streaming(&self, request: ChatRequest) -> TokenStream {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(&request, true);
        let builder = self.authorized(shared_http_client().post(&url)).json(&body);

        Box::pin(stream! {
            let resp = match builder.send().await {
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

                // SSE frames are newline-delimited `data: {...}` lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        yield TokenEvent::Done;
                        return;
                    }
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                            if !delta.is_empty() {
                                yield TokenEvent::Delta(delta.to_string());
                            }
                        }
                    }
                }
            }
            yield TokenEvent::Done;
        })
    }
}

/// Coalesce the response dialects into one shape.
pub fn normalize_response(value: &serde_json::Value, model: &str) -> Result<ChatResponse> {
    // Full OpenAI shape.
    let (message, finish_reason) = if let Some(choice) = value["choices"][0].as_object() {
        (
            choice.get("message").cloned().unwrap_or_default(),
            choice
                .get("finish_reason")
                .and_then(|f| f.as_str())
                .map(ToString::to_string),
        )
    } else if value.get("message").is_some() {
        // Nested `{message: {...}}`.
        (value["message"].clone(), None)
    } else {
        // Bare `{content: ...}`.
        (value.clone(), None)
    };

    let content = message["content"]
        .as_str()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToString::to_string);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, call)| {
                    let function = &call["function"];
                    let name = function["name"].as_str()?.to_string();
                    // Arguments arrive as a JSON-encoded string in the OpenAI
                    // dialect, or already structured elsewhere.
                    let arguments = match &function["arguments"] {
                        serde_json::Value::String(s) => {
                            serde_json::from_str(s).unwrap_or(serde_json::json!({}))
                        },
                        other if !other.is_null() => other.clone(),
                        _ => serde_json::json!({}),
                    };
                    Some(ToolCallRequest {
                        id: call["id"]
                            .as_str()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| format!("call-{i}")),
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let response = ChatResponse {
        content,
        tool_calls,
        finish_reason,
        model: value["model"].as_str().unwrap_or(model).to_string(),
    };

    if response.content.is_none() && response.tool_calls.is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    Ok(response)
}
