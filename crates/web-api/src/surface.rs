//! The injected facades: what page code sees as `window.ai` and
//! `window.agent`.
//!
//! Handles enforce their declared capabilities client-side before crossing
//! the transport, so a disallowed call fails fast without a round trip.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use harbor_protocol::{ErrorShape, PageResponse, error_codes, native::msg};

use crate::router::{PageRouter, StreamHandle};

fn unwrap_response(response: PageResponse) -> Result<serde_json::Value, ErrorShape> {
    if response.ok {
        Ok(response.result.unwrap_or_default())
    } else {
        Err(response
            .error
            .unwrap_or_else(|| ErrorShape::internal("response carried no error")))
    }
}

// ── window.ai ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct TextSessionOptions {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    /// Only honored by `ai.languageModel.create`.
    pub top_k: Option<u32>,
}

impl TextSessionOptions {
    fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "provider": self.provider,
            "temperature": self.temperature,
            "systemPrompt": self.system_prompt,
            "topK": self.top_k,
        })
    }
}

pub struct Ai {
    router: Arc<PageRouter>,
    origin: String,
}

impl Ai {
    pub fn new(router: Arc<PageRouter>, origin: impl Into<String>) -> Self {
        Self {
            router,
            origin: origin.into(),
        }
    }

    pub async fn can_create_text_session(&self) -> Result<String, ErrorShape> {
        let result = unwrap_response(
            self.router
                .request(&self.origin, msg::AI_CAN_CREATE_TEXT_SESSION, serde_json::json!({}))
                .await,
        )?;
        Ok(result.as_str().unwrap_or("no").to_string())
    }

    pub async fn create_text_session(
        &self,
        options: TextSessionOptions,
    ) -> Result<TextSession, ErrorShape> {
        self.create_session_inner(msg::AI_CREATE_TEXT_SESSION, options).await
    }

    pub async fn language_model_capabilities(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(
                    &self.origin,
                    msg::AI_LANGUAGE_MODEL_CAPABILITIES,
                    serde_json::json!({}),
                )
                .await,
        )
    }

    /// The `ai.languageModel.create` parallel surface (adds `topK`).
    pub async fn language_model_create(
        &self,
        options: TextSessionOptions,
    ) -> Result<TextSession, ErrorShape> {
        self.create_session_inner(msg::AI_LANGUAGE_MODEL_CREATE, options).await
    }

    async fn create_session_inner(
        &self,
        request_type: &str,
        options: TextSessionOptions,
    ) -> Result<TextSession, ErrorShape> {
        let result = unwrap_response(
            self.router
                .request(&self.origin, request_type, options.to_payload())
                .await,
        )?;
        let id = result["sessionId"]
            .as_str()
            .ok_or_else(|| ErrorShape::internal("missing sessionId"))?
            .to_string();
        Ok(TextSession {
            id,
            origin: self.origin.clone(),
            router: Arc::clone(&self.router),
            destroyed: AtomicBool::new(false),
        })
    }

    pub async fn providers_list(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AI_PROVIDERS_LIST, serde_json::json!({}))
                .await,
        )
    }

    pub async fn providers_get_active(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AI_PROVIDERS_GET_ACTIVE, serde_json::json!({}))
                .await,
        )
    }
}

/// Opaque handle returned by `createTextSession`.
pub struct TextSession {
    id: String,
    origin: String,
    router: Arc<PageRouter>,
    destroyed: AtomicBool,
}

impl TextSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn ensure_live(&self) -> Result<(), ErrorShape> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ErrorShape::invalid_params("session is destroyed"));
        }
        Ok(())
    }

    pub async fn prompt(&self, input: &str) -> Result<String, ErrorShape> {
        self.ensure_live()?;
        let result = unwrap_response(
            self.router
                .request(&self.origin, msg::SESSION_PROMPT, serde_json::json!({
                    "sessionId": self.id,
                    "input": input,
                }))
                .await,
        )?;
        Ok(result["text"].as_str().unwrap_or_default().to_string())
    }

    /// Lazy token stream; abort via the returned handle.
    pub async fn prompt_streaming(&self, input: &str) -> Result<StreamHandle, ErrorShape> {
        self.ensure_live()?;
        self.router
            .request_streaming(&self.origin, msg::SESSION_PROMPT_STREAMING, serde_json::json!({
                "sessionId": self.id,
                "input": input,
            }))
            .await
    }

    /// Idempotent.
    pub async fn destroy(&self) -> Result<(), ErrorShape> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        unwrap_response(
            self.router
                .request(&self.origin, msg::SESSION_DESTROY, serde_json::json!({
                    "sessionId": self.id,
                }))
                .await,
        )?;
        Ok(())
    }
}

// ── window.agent ────────────────────────────────────────────────────

pub struct Agent {
    router: Arc<PageRouter>,
    origin: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub task: String,
    pub max_tool_calls: Option<u32>,
    pub system_prompt: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionDeclaration {
    pub llm: bool,
    pub tools: Vec<String>,
    pub browser: Vec<String>,
    pub max_tool_calls: Option<u32>,
    pub ttl_minutes: Option<u32>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
}

impl Agent {
    pub fn new(router: Arc<PageRouter>, origin: impl Into<String>) -> Self {
        Self {
            router,
            origin: origin.into(),
        }
    }

    pub async fn request_permissions(
        &self,
        scopes: &[&str],
        reason: Option<&str>,
        tools: &[&str],
    ) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_REQUEST_PERMISSIONS, serde_json::json!({
                    "scopes": scopes,
                    "reason": reason,
                    "tools": tools,
                }))
                .await,
        )
    }

    pub async fn permissions_list(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_PERMISSIONS_LIST, serde_json::json!({}))
                .await,
        )
    }

    pub async fn tools_list(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_TOOLS_LIST, serde_json::json!({}))
                .await,
        )
    }

    pub async fn tools_call(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_TOOLS_CALL, serde_json::json!({
                    "tool": tool,
                    "args": args,
                }))
                .await,
        )
    }

    /// `agent.run`: lazy sequence of thinking / tool_call / tool_result /
    /// final / error events.
    pub async fn run(&self, options: RunOptions) -> Result<StreamHandle, ErrorShape> {
        self.router
            .request_streaming(&self.origin, msg::AGENT_RUN, serde_json::json!({
                "task": options.task,
                "maxToolCalls": options.max_tool_calls,
                "systemPrompt": options.system_prompt,
                "provider": options.provider,
            }))
            .await
    }

    pub async fn sessions_create(
        &self,
        declaration: SessionDeclaration,
    ) -> Result<AgentSession, ErrorShape> {
        let result = unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_SESSIONS_CREATE, serde_json::json!({
                    "capabilities": {
                        "llm": declaration.llm,
                        "tools": declaration.tools,
                        "browser": declaration.browser,
                    },
                    "maxToolCalls": declaration.max_tool_calls,
                    "ttlMinutes": declaration.ttl_minutes,
                    "systemPrompt": declaration.system_prompt,
                    "temperature": declaration.temperature,
                }))
                .await,
        )?;
        let id = result["id"]
            .as_str()
            .ok_or_else(|| ErrorShape::internal("missing session id"))?
            .to_string();
        Ok(AgentSession {
            id,
            origin: self.origin.clone(),
            allowed_tools: declaration.tools,
            router: Arc::clone(&self.router),
            terminated: AtomicBool::new(false),
        })
    }

    pub async fn sessions_get(&self, id: &str) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_SESSIONS_GET, serde_json::json!({
                    "sessionId": id,
                }))
                .await,
        )
    }

    pub async fn sessions_list(&self) -> Result<serde_json::Value, ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_SESSIONS_LIST, serde_json::json!({}))
                .await,
        )
    }

    pub async fn sessions_terminate(&self, id: &str) -> Result<(), ErrorShape> {
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_SESSIONS_TERMINATE, serde_json::json!({
                    "sessionId": id,
                }))
                .await,
        )?;
        Ok(())
    }
}

/// Handle for an explicit session; enforces its declared tool set before the
/// call leaves the page.
pub struct AgentSession {
    id: String,
    origin: String,
    allowed_tools: Vec<String>,
    router: Arc<PageRouter>,
    terminated: AtomicBool,
}

impl AgentSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn list_allowed_tools(&self) -> Vec<String> {
        self.allowed_tools.clone()
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ErrorShape> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(ErrorShape::new(
                error_codes::ERR_PERMISSION_DENIED,
                "session is terminated",
            ));
        }
        // Fail fast: the snapshot is known client-side.
        if !self.allowed_tools.iter().any(|t| t == tool) {
            return Err(ErrorShape::new(
                error_codes::ERR_PERMISSION_DENIED,
                format!("session does not declare tool '{tool}'"),
            ));
        }

        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_TOOLS_CALL, serde_json::json!({
                    "tool": tool,
                    "args": args,
                    "sessionId": self.id,
                }))
                .await,
        )
    }

    pub async fn terminate(&self) -> Result<(), ErrorShape> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        unwrap_response(
            self.router
                .request(&self.origin, msg::AGENT_SESSIONS_TERMINATE, serde_json::json!({
                    "sessionId": self.id,
                }))
                .await,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tokio::sync::mpsc};

    fn spawn_helper(
        router: Arc<PageRouter>,
        mut rx: mpsc::Receiver<serde_json::Value>,
        reply: impl Fn(&serde_json::Value) -> serde_json::Value + Send + 'static,
    ) {
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let out = reply(&frame);
                router.handle_helper_frame(out).await;
            }
        });
    }

    #[tokio::test]
    async fn test_session_call_tool_fails_fast_without_transport() {
        // No helper connected; the client-side check must reject before any
        // ERR_HARBOR_NOT_FOUND could surface.
        let router = PageRouter::new();
        let session = AgentSession {
            id: "s1".into(),
            origin: "https://example.com".into(),
            allowed_tools: vec!["time-wasm/time.now".into()],
            router,
            terminated: AtomicBool::new(false),
        };

        let err = session
            .call_tool("fs/read", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::ERR_PERMISSION_DENIED);
        assert!(err.message.contains("does not declare"));
    }

    #[tokio::test]
    async fn test_terminated_session_rejects_client_side() {
        let router = PageRouter::new();
        let session = AgentSession {
            id: "s1".into(),
            origin: "https://example.com".into(),
            allowed_tools: vec!["t/a".into()],
            router,
            terminated: AtomicBool::new(true),
        };
        let err = session.call_tool("t/a", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.code, error_codes::ERR_PERMISSION_DENIED);
    }

    #[tokio::test]
    async fn test_text_session_prompt_round_trip() {
        let router = PageRouter::new();
        let rx = router.connect_helper().await;
        spawn_helper(Arc::clone(&router), rx, |frame| {
            match frame["type"].as_str().unwrap() {
                "ai.createTextSession" => serde_json::json!({
                    "type": "response",
                    "request_id": frame["request_id"],
                    "result": {"sessionId": "ts-1"},
                }),
                "session.prompt" => {
                    assert_eq!(frame["sessionId"], "ts-1");
                    serde_json::json!({
                        "type": "response",
                        "request_id": frame["request_id"],
                        "result": {"text": "hello back"},
                    })
                },
                "session.destroy" => serde_json::json!({
                    "type": "response",
                    "request_id": frame["request_id"],
                    "result": {"destroyed": true},
                }),
                other => panic!("unexpected type {other}"),
            }
        });

        let ai = Ai::new(Arc::clone(&router), "https://example.com");
        let session = ai.create_text_session(TextSessionOptions::default()).await.unwrap();
        assert_eq!(session.prompt("hi").await.unwrap(), "hello back");

        session.destroy().await.unwrap();
        // Destroyed handles fail fast, no transport hop.
        let err = session.prompt("again").await.unwrap_err();
        assert!(err.message.contains("destroyed"));
        // Idempotent destroy.
        session.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_run_event_stream() {
        use tokio_stream::StreamExt;

        let router = PageRouter::new();
        let rx = router.connect_helper().await;
        spawn_helper(Arc::clone(&router), rx, |frame| {
            assert_eq!(frame["type"], "agent.run");
            serde_json::json!({
                "type": "stream_event",
                "request_id": frame["request_id"],
                "event": {"type": "final", "text": "42"},
                "done": true,
            })
        });

        let agent = Agent::new(router, "https://example.com");
        let stream = agent
            .run(RunOptions {
                task: "meaning of life".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event["type"], "final");
    }
}
