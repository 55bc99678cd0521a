//! `agent.*` handlers, including the streaming `agent.run`.

use std::sync::Arc;

use {
    serde::Deserialize,
    tokio::sync::mpsc,
    tokio_stream::StreamExt,
    tracing::{debug, info},
};

use {
    harbor_agents::{AgentEvent, RunConfig, run_agent},
    harbor_broker::{Capabilities, SessionLimits},
    harbor_protocol::{ErrorShape, NativeErrorFrame, NativeEvent, NativeRequest},
};

use crate::{dispatcher::BrokeredDispatcher, methods::parse_payload, services::Services};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPermissionsPayload {
    origin: String,
    scopes: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
}

pub async fn request_permissions(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: RequestPermissionsPayload = parse_payload(request)?;
    let result = services
        .broker
        .request_permissions(&payload.origin, &payload.scopes, payload.reason, payload.tools)
        .await
        .map_err(|e| e.to_error_shape())?;
    serde_json::to_value(&result).map_err(|e| ErrorShape::internal(e.to_string()))
}

#[derive(Deserialize)]
struct OriginPayload {
    origin: String,
}

pub async fn permissions_list(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: OriginPayload = parse_payload(request)?;
    let grants = services.broker.permissions_list(&payload.origin).await;
    serde_json::to_value(&grants).map_err(|e| ErrorShape::internal(e.to_string()))
}

pub async fn tools_list(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: OriginPayload = parse_payload(request)?;
    services
        .broker
        .check_tool_list(&payload.origin)
        .await
        .map_err(|e| e.to_error_shape())?;

    let allow_list = services
        .broker
        .permissions_list(&payload.origin)
        .await
        .allowed_tools;

    let tools: Vec<serde_json::Value> = services
        .mcp
        .all_tools()
        .await
        .into_iter()
        .filter(|qt| {
            allow_list
                .as_ref()
                .is_none_or(|allowed| allowed.iter().any(|t| *t == qt.qualified_name()))
        })
        .map(|qt| {
            serde_json::json!({
                "name": qt.qualified_name(),
                "description": qt.tool.description,
                "parameters": qt.tool.input_schema,
            })
        })
        .collect();
    Ok(serde_json::json!(tools))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsCallPayload {
    origin: String,
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
    /// Explicit session charged for the call; defaults to the origin's
    /// implicit one.
    #[serde(default)]
    session_id: Option<String>,
}

pub async fn tools_call(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: ToolsCallPayload = parse_payload(request)?;

    let session_id = match payload.session_id {
        Some(id) => id,
        None => services.broker.sessions().implicit_for(&payload.origin).await.id,
    };
    services
        .broker
        .admit_session_tool_call(&session_id, &payload.tool)
        .await
        .map_err(|e| e.to_error_shape())?;

    let (server_id, tool) = payload
        .tool
        .split_once('/')
        .ok_or_else(|| ErrorShape::invalid_params(format!(
            "tool name '{}' is not server-qualified",
            payload.tool
        )))?;

    let result = services
        .mcp
        .call_tool(server_id, tool, payload.args)
        .await
        .map_err(|e| e.to_error_shape())?;

    Ok(serde_json::json!({
        "content": result.text(),
        "isError": result.is_error,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionsCreatePayload {
    origin: String,
    #[serde(default)]
    capabilities: Capabilities,
    #[serde(default)]
    max_tool_calls: Option<u32>,
    #[serde(default)]
    ttl_minutes: Option<u32>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

pub async fn sessions_create(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: SessionsCreatePayload = parse_payload(request)?;
    let session = services
        .broker
        .create_session(
            &payload.origin,
            payload.capabilities,
            SessionLimits {
                max_tool_calls: payload.max_tool_calls,
                ttl_minutes: payload.ttl_minutes,
            },
            payload.system_prompt,
            payload.temperature,
        )
        .await
        .map_err(|e| e.to_error_shape())?;
    serde_json::to_value(&session).map_err(|e| ErrorShape::internal(e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIdPayload {
    session_id: String,
}

pub async fn sessions_get(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: SessionIdPayload = parse_payload(request)?;
    let session = services
        .broker
        .sessions()
        .get(&payload.session_id)
        .await
        .map_err(|e| e.to_error_shape())?;
    serde_json::to_value(&session).map_err(|e| ErrorShape::internal(e.to_string()))
}

pub async fn sessions_list(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: OriginPayload = parse_payload(request)?;
    let sessions = services.broker.sessions().list(&payload.origin).await;
    serde_json::to_value(&sessions).map_err(|e| ErrorShape::internal(e.to_string()))
}

pub async fn sessions_terminate(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: SessionIdPayload = parse_payload(request)?;
    services
        .broker
        .sessions()
        .terminate(&payload.session_id)
        .await
        .map_err(|e| e.to_error_shape())?;
    Ok(serde_json::json!({"terminated": true}))
}

// ── agent.run ───────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunPayload {
    origin: String,
    task: String,
    #[serde(default)]
    max_tool_calls: Option<u32>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

async fn send_error(out: &mpsc::Sender<serde_json::Value>, request_id: &str, error: ErrorShape) {
    let frame = NativeErrorFrame::new(request_id, error);
    let _ = out.send(serde_json::to_value(&frame).unwrap_or_default()).await;
}

/// Streaming `agent.run`: a lazy sequence of thinking / tool_call /
/// tool_result / final / error events, then a done marker.
pub async fn run_streaming(
    services: Arc<Services>,
    request: NativeRequest,
    out: mpsc::Sender<serde_json::Value>,
) {
    let request_id = request.request_id.clone();

    let payload: RunPayload = match parse_payload(&request) {
        Ok(payload) => payload,
        Err(error) => return send_error(&out, &request_id, error).await,
    };

    // Resolve the session: explicit when given, otherwise the origin's
    // implicit one. Model permission comes from the session's snapshot for
    // explicit sessions, the live grants otherwise.
    let session = match &payload.session_id {
        Some(id) => match services.broker.sessions().get(id).await {
            Ok(session) if session.capabilities.llm => session,
            Ok(_) => {
                return send_error(
                    &out,
                    &request_id,
                    ErrorShape::new(
                        harbor_protocol::error_codes::ERR_INSUFFICIENT_SCOPE,
                        "session does not declare the llm capability",
                    ),
                )
                .await;
            },
            Err(e) => return send_error(&out, &request_id, e.to_error_shape()).await,
        },
        None => {
            if let Err(e) = services.broker.check_model(&payload.origin).await {
                return send_error(&out, &request_id, e.to_error_shape()).await;
            }
            services.broker.sessions().implicit_for(&payload.origin).await
        },
    };

    if let Err(e) = services.broker.sessions().record_prompt(&session.id).await {
        return send_error(&out, &request_id, e.to_error_shape()).await;
    }

    let provider = match services.models.resolve(payload.provider.as_deref()) {
        Ok(provider) => provider,
        Err(e) => return send_error(&out, &request_id, e.to_error_shape()).await,
    };
    let model = match payload.model {
        Some(model) => model,
        None => match crate::methods::ai::default_model(&*provider).await {
            Ok(model) => model,
            Err(error) => return send_error(&out, &request_id, error).await,
        },
    };

    let config = RunConfig {
        task: payload.task,
        model,
        max_tool_calls: payload
            .max_tool_calls
            .or(session.limits.max_tool_calls)
            .unwrap_or(10),
        system_prompt: payload.system_prompt.or(session.system_prompt.clone()),
        temperature: session.temperature,
    };

    info!(
        request_id = %request_id,
        origin = %payload.origin,
        session = %session.id,
        max_tool_calls = config.max_tool_calls,
        "agent run starting"
    );

    let dispatcher = Arc::new(BrokeredDispatcher::new(
        Arc::clone(&services.broker),
        Arc::clone(&services.mcp),
        payload.origin.clone(),
        session.id.clone(),
    ));

    let cancel = services.aborts.register(&request_id).await;
    let mut events = Box::pin(run_agent(provider, dispatcher, config, cancel.clone()));

    while let Some(event) = events.next().await {
        let finished = matches!(event, AgentEvent::Final { .. } | AgentEvent::Error { .. });
        let frame = NativeEvent::new(&request_id, serde_json::to_value(&event).unwrap_or_default());
        if out
            .send(serde_json::to_value(&frame).unwrap_or_default())
            .await
            .is_err()
        {
            debug!(request_id = %request_id, "event consumer gone, stopping run");
            cancel.cancel();
            break;
        }
        if finished {
            break;
        }
    }

    services.aborts.forget(&request_id).await;
    let done = NativeEvent::done(&request_id);
    let _ = out.send(serde_json::to_value(&done).unwrap_or_default()).await;
}
