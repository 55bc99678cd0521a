//! Request dispatch: one handler per wire `type`.

pub mod agent;
pub mod ai;
pub mod catalog;
pub mod servers;

use std::sync::Arc;

use harbor_protocol::{ErrorShape, NativeRequest, native::msg};

use crate::services::Services;

pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    request: &NativeRequest,
) -> Result<T, ErrorShape> {
    serde_json::from_value(request.payload_value())
        .map_err(|e| ErrorShape::invalid_params(e.to_string()))
}

/// Whether a request type produces stream events rather than one response.
pub fn is_streaming(request_type: &str) -> bool {
    matches!(
        request_type,
        msg::AGENT_RUN | msg::SESSION_PROMPT_STREAMING
    )
}

/// Dispatch one non-streaming request.
pub async fn dispatch(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    match request.request_type.as_str() {
        msg::SYSTEM_GET_VERSION => Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        })),

        msg::AI_CAN_CREATE_TEXT_SESSION => ai::can_create_text_session(services).await,
        msg::AI_CREATE_TEXT_SESSION | msg::AI_LANGUAGE_MODEL_CREATE => {
            ai::create_text_session(services, request).await
        },
        msg::AI_LANGUAGE_MODEL_CAPABILITIES => ai::language_model_capabilities(services).await,
        msg::AI_PROVIDERS_LIST => ai::providers_list(services).await,
        msg::AI_PROVIDERS_GET_ACTIVE => ai::providers_get_active(services).await,
        msg::SESSION_PROMPT => ai::session_prompt(services, request).await,
        msg::SESSION_DESTROY => ai::session_destroy(services, request).await,

        msg::AGENT_REQUEST_PERMISSIONS => agent::request_permissions(services, request).await,
        msg::AGENT_PERMISSIONS_LIST => agent::permissions_list(services, request).await,
        msg::AGENT_TOOLS_LIST => agent::tools_list(services, request).await,
        msg::AGENT_TOOLS_CALL => agent::tools_call(services, request).await,
        msg::AGENT_SESSIONS_CREATE => agent::sessions_create(services, request).await,
        msg::AGENT_SESSIONS_GET => agent::sessions_get(services, request).await,
        msg::AGENT_SESSIONS_LIST => agent::sessions_list(services, request).await,
        msg::AGENT_SESSIONS_TERMINATE => agent::sessions_terminate(services, request).await,

        msg::CATALOG_GET => catalog::get(services).await,
        msg::CATALOG_REFRESH => catalog::refresh(services, request).await,
        msg::CATALOG_SEARCH => catalog::search(services, request).await,

        msg::CHECK_RUNTIMES => servers::check_runtimes(services).await,
        msg::INSTALL_SERVER => servers::install(services, request).await,
        msg::UNINSTALL_SERVER => servers::uninstall(services, request).await,
        msg::LIST_INSTALLED => servers::list_installed(services).await,
        msg::START_INSTALLED => servers::start_installed(services, request).await,
        msg::STOP_INSTALLED => servers::stop_installed(services, request).await,
        msg::SET_SERVER_SECRETS => servers::set_secrets(services, request).await,
        msg::GET_SERVER_STATUS => servers::get_status(services, request).await,

        other => Err(ErrorShape::invalid_params(format!(
            "unknown request type: {other}"
        ))),
    }
}
