//! The reason–act loop.

use std::sync::Arc;

use {
    async_stream::stream,
    tokio_stream::Stream,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use harbor_models::{ChatRequest, LlmProvider, supports_native_tools};

use crate::{
    dispatch::ToolDispatcher,
    events::AgentEvent,
    parse::extract_tool_call_from_text,
    prompt::build_system_prompt,
    resolve::resolve_tool_name,
};

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub task: String,
    pub model: String,
    pub max_tool_calls: u32,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl RunConfig {
    pub fn new(task: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            model: model.into(),
            max_tool_calls: 10,
            system_prompt: None,
            temperature: None,
        }
    }
}

/// One tool call the model asked for, whichever path it came in on.
struct RequestedCall {
    name: String,
    args: serde_json::Value,
    /// Native call id, threaded back as `tool_call_id`.
    native_id: Option<String>,
}

/// Drive one `run(task)` to completion. The returned stream emits at most
/// `max_tool_calls` tool_call events and exactly one `final` or `error` —
/// unless `cancel` fires, which ends the stream at the next safe boundary
/// with nothing further.
pub fn run_agent(
    provider: Arc<dyn LlmProvider>,
    dispatcher: Arc<dyn ToolDispatcher>,
    config: RunConfig,
    cancel: CancellationToken,
) -> impl Stream<Item = AgentEvent> {
    stream! {
        let native = supports_native_tools(provider.name(), &config.model);

        let tools = match dispatcher.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                yield AgentEvent::Error { message: format!("failed to list tools: {e}") };
                return;
            },
        };

        let system_prompt =
            build_system_prompt(&tools, native, config.system_prompt.as_deref());
        let tool_schemas: Vec<serde_json::Value> = if native {
            tools
                .iter()
                .map(|t| serde_json::to_value(t).unwrap_or_default())
                .collect()
        } else {
            Vec::new()
        };

        info!(
            provider = provider.name(),
            model = %config.model,
            native_tools = native,
            tools = tools.len(),
            max_tool_calls = config.max_tool_calls,
            "starting agent run"
        );

        let mut messages = vec![serde_json::json!({"role": "user", "content": config.task})];
        let mut tool_calls_made = 0u32;
        let mut last_call_key: Option<String> = None;
        let mut last_assistant_text = String::new();

        // Feedback rounds (tool-not-found, duplicate hints) consume model
        // iterations without consuming tool budget; this caps the whole loop.
        let max_iterations = config.max_tool_calls * 2 + 2;

        for iteration in 1..=max_iterations {
            let request = ChatRequest {
                model: config.model.clone(),
                messages: messages.clone(),
                tools: tool_schemas.clone(),
                temperature: config.temperature,
                system_prompt: Some(system_prompt.clone()),
            };

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(iteration, "agent run aborted");
                    return;
                }
                response = provider.chat(&request) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(iteration, error = %e, "model call failed");
                    yield AgentEvent::Error { message: e.to_string() };
                    return;
                },
            };

            if let Some(text) = &response.content {
                last_assistant_text = text.clone();
            }

            // Extract at most one tool call per iteration.
            let requested = if native {
                response.tool_calls.first().map(|tc| RequestedCall {
                    name: tc.name.clone(),
                    args: tc.arguments.clone(),
                    native_id: Some(tc.id.clone()),
                })
            } else {
                response.content.as_deref().and_then(extract_tool_call_from_text).map(
                    |(name, args)| RequestedCall {
                        name,
                        args,
                        native_id: None,
                    },
                )
            };

            let Some(requested) = requested else {
                yield AgentEvent::Final {
                    text: response.content.unwrap_or_default(),
                };
                return;
            };

            // Reasoning text alongside a native tool call surfaces as a
            // thinking event. On the text path the content *is* the call.
            if native {
                if let Some(text) = response.content.as_deref().map(str::trim) {
                    if !text.is_empty() {
                        yield AgentEvent::Thinking { text: text.to_string() };
                    }
                }
            }

            let Some(resolved) = resolve_tool_name(&requested.name, &tools) else {
                debug!(tool = %requested.name, "tool not found, feeding error back");
                push_assistant_turn(&mut messages, native, &response.content, &requested);
                push_feedback(
                    &mut messages,
                    native,
                    &requested,
                    &format!(
                        "tool-not-found: no tool named '{}'. Available tools: {}. \
                         Use an exact name from the list, or answer without a tool.",
                        requested.name,
                        tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", "),
                    ),
                );
                continue;
            };

            let call_key = format!("{resolved}:{}", requested.args);
            if last_call_key.as_deref() == Some(call_key.as_str()) {
                debug!(tool = %resolved, "duplicate tool call suppressed");
                push_assistant_turn(&mut messages, native, &response.content, &requested);
                push_feedback(
                    &mut messages,
                    native,
                    &requested,
                    "You already received the result of that exact tool call above. \
                     Answer the user's question from it; do not call the tool again.",
                );
                continue;
            }

            if tool_calls_made >= config.max_tool_calls {
                info!(tool_calls_made, "tool budget exhausted");
                yield AgentEvent::Final { text: budget_apology(&last_assistant_text) };
                return;
            }

            yield AgentEvent::ToolCall {
                tool: resolved.clone(),
                args: requested.args.clone(),
            };
            tool_calls_made += 1;
            last_call_key = Some(call_key);

            let outcome = dispatcher.call(&resolved, requested.args.clone()).await;
            push_assistant_turn(&mut messages, native, &response.content, &requested);

            match outcome {
                Ok(result) => {
                    yield AgentEvent::ToolResult {
                        tool: resolved.clone(),
                        result: Some(result.clone()),
                        error: None,
                    };
                    push_feedback(
                        &mut messages,
                        native,
                        &requested,
                        &format!(
                            "Tool result: {result}\n\nProduce a user-facing answer from this \
                             result. Do not call another tool unless it is necessary.",
                        ),
                    );
                },
                Err(e) => {
                    let message = e.to_string();
                    warn!(tool = %resolved, error = %message, "tool call failed");
                    yield AgentEvent::ToolResult {
                        tool: resolved.clone(),
                        result: None,
                        error: Some(message.clone()),
                    };
                    push_feedback(
                        &mut messages,
                        native,
                        &requested,
                        &format!(
                            "Tool error: {message}\nRecover if you can: try a different \
                             approach or explain the failure to the user.",
                        ),
                    );
                },
            }
        }

        yield AgentEvent::Final { text: budget_apology(&last_assistant_text) };
    }
}

/// Record the assistant's turn that asked for the call.
fn push_assistant_turn(
    messages: &mut Vec<serde_json::Value>,
    native: bool,
    content: &Option<String>,
    requested: &RequestedCall,
) {
    if native {
        let mut msg = serde_json::json!({
            "role": "assistant",
            "tool_calls": [{
                "id": requested.native_id.clone().unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": requested.name,
                    "arguments": requested.args.to_string(),
                },
            }],
        });
        if let Some(text) = content {
            msg["content"] = serde_json::Value::String(text.clone());
        }
        messages.push(msg);
    } else {
        messages.push(serde_json::json!({
            "role": "assistant",
            "content": content.clone().unwrap_or_default(),
        }));
    }
}

/// Feed a result / error / hint back in the shape the dispatch mode expects.
fn push_feedback(
    messages: &mut Vec<serde_json::Value>,
    native: bool,
    requested: &RequestedCall,
    content: &str,
) {
    if native {
        messages.push(serde_json::json!({
            "role": "tool",
            "tool_call_id": requested.native_id.clone().unwrap_or_default(),
            "content": content,
        }));
    } else {
        messages.push(serde_json::json!({"role": "user", "content": content}));
    }
}

fn budget_apology(last_assistant_text: &str) -> String {
    if last_assistant_text.trim().is_empty() {
        "I wasn't able to finish within the allowed number of tool calls.".to_string()
    } else {
        format!(
            "I ran out of tool calls before finishing. Based on what I found so far: {}",
            last_assistant_text.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::dispatch::{ToolDescriptor, ToolDispatcher},
        async_trait::async_trait,
        futures::StreamExt,
        harbor_models::{ChatResponse, ModelInfo, TokenStream, ToolCallRequest},
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Provider that plays back scripted responses.
    struct ScriptedProvider {
        name: &'static str,
        responses: Mutex<Vec<ChatResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                name,
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn list_models(&self) -> harbor_models::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }

        async fn chat(&self, _request: &ChatRequest) -> harbor_models::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(harbor_models::ModelError::EmptyResponse);
            }
            Ok(responses.remove(0))
        }

        fn chat_streaming(&self, _request: ChatRequest) -> TokenStream {
            Box::pin(tokio_stream::empty())
        }
    }

    struct TimeDispatcher {
        calls: AtomicUsize,
    }

    impl TimeDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolDispatcher for TimeDispatcher {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor {
                name: "time-wasm/time.now".into(),
                description: "Current UTC time".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }])
        }

        async fn call(
            &self,
            name: &str,
            _args: serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(name, "time-wasm/time.now");
            Ok(serde_json::json!("2024-01-15T10:30:00Z"))
        }
    }

    fn tool_call(name: &str) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "call-1".into(),
                name: name.into(),
                arguments: serde_json::json!({}),
            }],
            finish_reason: Some("tool_calls".into()),
            model: "gpt-4o".into(),
        }
    }

    fn text(content: &str) -> ChatResponse {
        ChatResponse {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".into()),
            model: "gpt-4o".into(),
        }
    }

    async fn collect(
        provider: Arc<dyn LlmProvider>,
        dispatcher: Arc<dyn ToolDispatcher>,
        config: RunConfig,
    ) -> Vec<AgentEvent> {
        run_agent(provider, dispatcher, config, CancellationToken::new())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_single_tool_call_then_final() {
        let provider = ScriptedProvider::new("openai", vec![
            tool_call("time.now"),
            text("The current time is 10:30 UTC."),
        ]);
        let dispatcher = TimeDispatcher::new();

        let events = collect(
            provider.clone(),
            dispatcher.clone(),
            RunConfig {
                max_tool_calls: 3,
                ..RunConfig::new("What time is it?", "gpt-4o")
            },
        )
        .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AgentEvent::ToolCall { tool, .. }
            if tool == "time-wasm/time.now"));
        assert!(matches!(&events[1], AgentEvent::ToolResult { error: None, .. }));
        assert!(matches!(&events[2], AgentEvent::Final { text }
            if text.contains("10:30")));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_call_suppressed() {
        let provider = ScriptedProvider::new("openai", vec![
            tool_call("time.now"),
            tool_call("time.now"),
            text("It is 10:30 UTC."),
        ]);
        let dispatcher = TimeDispatcher::new();

        let events = collect(
            provider.clone(),
            dispatcher.clone(),
            RunConfig {
                max_tool_calls: 3,
                ..RunConfig::new("What time is it?", "gpt-4o")
            },
        )
        .await;

        let tool_calls = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 1, "second identical call is replaced by a hint");
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(events.last().unwrap(), AgentEvent::Final { .. }));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_apologizes() {
        // The model asks for a (different) tool call every turn and never
        // produces a final.
        let mut responses = Vec::new();
        for i in 0..10 {
            let mut call = tool_call("time.now");
            call.tool_calls[0].arguments = serde_json::json!({"turn": i});
            responses.push(call);
        }
        let provider = ScriptedProvider::new("openai", responses);
        let dispatcher = TimeDispatcher::new();

        let events = collect(
            provider.clone(),
            dispatcher.clone(),
            RunConfig {
                max_tool_calls: 2,
                ..RunConfig::new("What time is it?", "gpt-4o")
            },
        )
        .await;

        let tool_calls = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolCall { .. }))
            .count();
        assert_eq!(tool_calls, 2);
        assert!(matches!(events.last().unwrap(), AgentEvent::Final { text }
            if text.contains("tool calls")));
    }

    #[tokio::test]
    async fn test_text_path_parses_and_dispatches() {
        // Unknown provider name → text-emulated dispatch.
        let provider = ScriptedProvider::new("textrun", vec![
            text(r#"{"tool": "time.now", "args": {}}"#),
            text("It is 10:30 UTC."),
        ]);
        let dispatcher = TimeDispatcher::new();

        let events = collect(
            provider.clone(),
            dispatcher.clone(),
            RunConfig {
                max_tool_calls: 3,
                ..RunConfig::new("What time is it?", "some-local-model")
            },
        )
        .await;

        assert!(matches!(&events[0], AgentEvent::ToolCall { .. }));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(events.last().unwrap(), AgentEvent::Final { .. }));
    }

    #[tokio::test]
    async fn test_tool_not_found_feeds_back_and_recovers() {
        let provider = ScriptedProvider::new("openai", vec![
            tool_call("weather.lookup"),
            text("I don't have a weather tool; I can tell you the time instead."),
        ]);
        let dispatcher = TimeDispatcher::new();

        let events = collect(
            provider.clone(),
            dispatcher.clone(),
            RunConfig {
                max_tool_calls: 3,
                ..RunConfig::new("Weather?", "gpt-4o")
            },
        )
        .await;

        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert!(events.iter().all(|e| !matches!(e, AgentEvent::ToolCall { .. })));
        assert!(matches!(events.last().unwrap(), AgentEvent::Final { .. }));
    }

    #[tokio::test]
    async fn test_tool_error_surfaces_in_result_event() {
        struct FailingDispatcher;

        #[async_trait]
        impl ToolDispatcher for FailingDispatcher {
            async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
                Ok(vec![ToolDescriptor {
                    name: "fs/read".into(),
                    description: String::new(),
                    parameters: serde_json::json!({}),
                }])
            }

            async fn call(
                &self,
                _name: &str,
                _args: serde_json::Value,
            ) -> anyhow::Result<serde_json::Value> {
                anyhow::bail!("permission denied by sandbox")
            }
        }

        let provider = ScriptedProvider::new("openai", vec![
            tool_call("fs/read"),
            text("I could not read the file."),
        ]);

        let events = collect(
            provider,
            Arc::new(FailingDispatcher),
            RunConfig {
                max_tool_calls: 3,
                ..RunConfig::new("Read it", "gpt-4o")
            },
        )
        .await;

        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolResult {
            error: Some(message), ..
        } if message.contains("sandbox"))));
        assert!(matches!(events.last().unwrap(), AgentEvent::Final { .. }));
    }

    #[tokio::test]
    async fn test_provider_error_emits_error_event() {
        let provider = ScriptedProvider::new("openai", Vec::new());
        let events = collect(
            provider,
            TimeDispatcher::new(),
            RunConfig::new("hi", "gpt-4o"),
        )
        .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], AgentEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_abort_ends_stream_without_final() {
        let provider = ScriptedProvider::new("openai", vec![text("unreached")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events: Vec<AgentEvent> = run_agent(
            provider,
            TimeDispatcher::new(),
            RunConfig::new("hi", "gpt-4o"),
            cancel,
        )
        .collect()
        .await;
        assert!(events.is_empty());
    }
}
