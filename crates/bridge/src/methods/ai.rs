//! `ai.*` and `session.*` handlers.

use std::sync::Arc;

use {
    serde::Deserialize,
    tokio::sync::mpsc,
    tokio_stream::StreamExt,
    tracing::debug,
};

use harbor_models::{ChatRequest, TokenEvent};
use harbor_protocol::{ErrorShape, NativeErrorFrame, NativeEvent, NativeRequest, error_codes};

use crate::{methods::parse_payload, services::Services};

pub async fn can_create_text_session(
    services: &Arc<Services>,
) -> Result<serde_json::Value, ErrorShape> {
    let availability = if services.models.is_empty() {
        "no"
    } else {
        "readily"
    };
    Ok(serde_json::json!(availability))
}

pub async fn language_model_capabilities(
    services: &Arc<Services>,
) -> Result<serde_json::Value, ErrorShape> {
    let available = if services.models.is_empty() { "no" } else { "readily" };
    Ok(serde_json::json!({
        "available": available,
        "defaultTemperature": 0.7,
        "defaultTopK": 3,
        "maxTopK": 8,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionPayload {
    origin: String,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Accepted from `ai.languageModel.create`; sampling is provider-side so
    /// this is recorded but unused by the HTTP adapters.
    #[serde(default)]
    top_k: Option<u32>,
}

pub async fn create_text_session(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: CreateSessionPayload = parse_payload(request)?;
    services
        .broker
        .check_model(&payload.origin)
        .await
        .map_err(|e| e.to_error_shape())?;

    // Fail early on an unknown provider rather than at first prompt.
    services
        .models
        .resolve(payload.provider.as_deref())
        .map_err(|e| e.to_error_shape())?;

    let _ = payload.top_k;
    let state = services
        .text_sessions
        .create(
            &payload.origin,
            payload.provider,
            payload.model,
            payload.temperature,
            payload.system_prompt,
        )
        .await;
    Ok(serde_json::json!({"sessionId": state.id}))
}

pub async fn providers_list(services: &Arc<Services>) -> Result<serde_json::Value, ErrorShape> {
    let providers = services.models.list_all_models().await;
    let list: Vec<serde_json::Value> = providers
        .into_iter()
        .map(|(name, models)| {
            serde_json::json!({
                "name": name,
                "models": models.iter().map(|m| &m.id).collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(serde_json::json!(list))
}

pub async fn providers_get_active(
    services: &Arc<Services>,
) -> Result<serde_json::Value, ErrorShape> {
    let provider = services.models.active().map_err(|e| e.to_error_shape())?;
    Ok(serde_json::json!({"name": provider.name()}))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptPayload {
    session_id: String,
    input: String,
}

/// Resolve the provider + model + request for one session prompt.
async fn prepare_chat(
    services: &Arc<Services>,
    session_id: &str,
    input: &str,
) -> Result<(Arc<dyn harbor_models::LlmProvider>, ChatRequest), ErrorShape> {
    let state = services
        .text_sessions
        .get(session_id)
        .await
        .ok_or_else(|| ErrorShape::new(error_codes::NOT_FOUND, format!(
            "no text session '{session_id}'"
        )))?;

    services
        .broker
        .check_model(&state.origin)
        .await
        .map_err(|e| e.to_error_shape())?;

    let provider = services
        .models
        .resolve(state.provider.as_deref())
        .map_err(|e| e.to_error_shape())?;

    let model = match state.model.clone() {
        Some(model) => model,
        None => default_model(&*provider).await?,
    };

    let mut messages = state.messages.clone();
    messages.push(serde_json::json!({"role": "user", "content": input}));

    Ok((provider, ChatRequest {
        model,
        messages,
        tools: Vec::new(),
        temperature: state.temperature,
        system_prompt: state.system_prompt.clone(),
    }))
}

pub(crate) async fn default_model(
    provider: &dyn harbor_models::LlmProvider,
) -> Result<String, ErrorShape> {
    let models = provider
        .list_models()
        .await
        .map_err(|e| e.to_error_shape())?;
    models
        .first()
        .map(|m| m.id.clone())
        .ok_or_else(|| ErrorShape::new(
            error_codes::ERR_LLM_FAILED,
            format!("provider '{}' reports no models", provider.name()),
        ))
}

pub async fn session_prompt(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: PromptPayload = parse_payload(request)?;
    let (provider, chat) = prepare_chat(services, &payload.session_id, &payload.input).await?;

    let response = provider.chat(&chat).await.map_err(|e| e.to_error_shape())?;
    let text = response.content.unwrap_or_default();

    services
        .text_sessions
        .record_exchange(&payload.session_id, &payload.input, &text)
        .await;

    Ok(serde_json::json!({"text": text}))
}

/// `session.promptStreaming`: token events until done, honoring abort.
pub async fn session_prompt_streaming(
    services: Arc<Services>,
    request: NativeRequest,
    out: mpsc::Sender<serde_json::Value>,
) {
    let request_id = request.request_id.clone();

    let payload: PromptPayload = match parse_payload(&request) {
        Ok(payload) => payload,
        Err(error) => {
            let frame = NativeErrorFrame::new(&request_id, error);
            let _ = out.send(serde_json::to_value(&frame).unwrap_or_default()).await;
            return;
        },
    };

    let (provider, chat) = match prepare_chat(&services, &payload.session_id, &payload.input).await
    {
        Ok(prepared) => prepared,
        Err(error) => {
            let frame = NativeErrorFrame::new(&request_id, error);
            let _ = out.send(serde_json::to_value(&frame).unwrap_or_default()).await;
            return;
        },
    };

    let cancel = services.aborts.register(&request_id).await;
    let mut stream = provider.chat_streaming(chat);
    let mut collected = String::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(request_id = %request_id, "prompt stream aborted");
                break;
            }
            event = stream.next() => event,
        };
        match event {
            Some(TokenEvent::Delta(token)) => {
                collected.push_str(&token);
                let frame = NativeEvent::new(&request_id, serde_json::json!({
                    "type": "token",
                    "value": token,
                }));
                if out
                    .send(serde_json::to_value(&frame).unwrap_or_default())
                    .await
                    .is_err()
                {
                    break;
                }
            },
            Some(TokenEvent::Error(message)) => {
                let frame = NativeErrorFrame::new(
                    &request_id,
                    ErrorShape::new(error_codes::ERR_LLM_FAILED, message),
                );
                let _ = out.send(serde_json::to_value(&frame).unwrap_or_default()).await;
                services.aborts.forget(&request_id).await;
                return;
            },
            Some(TokenEvent::Done) | None => break,
        }
    }

    services
        .text_sessions
        .record_exchange(&payload.session_id, &payload.input, &collected)
        .await;
    services.aborts.forget(&request_id).await;

    let done = NativeEvent::done(&request_id);
    let _ = out.send(serde_json::to_value(&done).unwrap_or_default()).await;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DestroyPayload {
    session_id: String,
}

pub async fn session_destroy(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: DestroyPayload = parse_payload(request)?;
    let destroyed = services.text_sessions.destroy(&payload.session_id).await;
    Ok(serde_json::json!({"destroyed": destroyed}))
}
