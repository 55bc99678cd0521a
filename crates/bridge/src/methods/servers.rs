//! Installer-surface handlers: runtimes, install lifecycle, secrets, status.

use std::{collections::HashMap, sync::Arc};

use {serde::Deserialize, tracing::info};

use {
    harbor_installer::{InstallState, ServerManifest},
    harbor_mcp::ServerState,
    harbor_oauth::TokenSource,
    harbor_protocol::{ErrorShape, NativeRequest, error_codes},
};

use crate::{methods::parse_payload, services::Services};

pub async fn check_runtimes(services: &Arc<Services>) -> Result<serde_json::Value, ErrorShape> {
    let report = services.installer.runtimes().report().await;
    Ok(serde_json::json!({"runtimes": report}))
}

#[derive(Deserialize)]
struct InstallPayload {
    manifest: ServerManifest,
}

pub async fn install(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: InstallPayload = parse_payload(request)?;

    // An unhandleable OAuth manifest blocks install outright.
    let oauth_source = match &payload.manifest.oauth {
        Some(oauth) => Some(
            services
                .oauth
                .check_oauth_capabilities(oauth)
                .map_err(|e| ErrorShape::invalid_params(e.to_string()))?,
        ),
        None => None,
    };

    let id = payload.manifest.id.clone();
    services
        .installer
        .install(payload.manifest)
        .await
        .map_err(|e| ErrorShape::invalid_params(e.to_string()))?;

    info!(server = %id, ?oauth_source, "server installed");
    Ok(serde_json::json!({
        "id": id,
        "installState": InstallState::Installed,
        "oauthSource": oauth_source,
    }))
}

#[derive(Deserialize)]
struct IdPayload {
    id: String,
}

pub async fn uninstall(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: IdPayload = parse_payload(request)?;
    // Stop and drop any live child first; unknown-to-mcp is fine.
    let _ = services.mcp.remove(&payload.id).await;
    let removed = services
        .installer
        .uninstall(&payload.id)
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    Ok(serde_json::json!({"removed": removed}))
}

pub async fn list_installed(services: &Arc<Services>) -> Result<serde_json::Value, ErrorShape> {
    let mut out = Vec::new();
    for server in services.installer.list().await {
        let state = combined_state(services, &server.manifest.id).await;
        out.push(serde_json::json!({
            "id": server.manifest.id,
            "name": server.manifest.name,
            "installState": state,
            "installedAt": server.installed_at,
        }));
    }
    Ok(serde_json::json!({"servers": out}))
}

pub async fn start_installed(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: IdPayload = parse_payload(request)?;
    let server = services
        .installer
        .get(&payload.id)
        .await
        .ok_or_else(|| ErrorShape::new(error_codes::NOT_FOUND, format!(
            "server '{}' is not installed",
            payload.id
        )))?;

    let oauth_env = match &server.manifest.oauth {
        Some(oauth) => {
            let source = services
                .oauth
                .check_oauth_capabilities(oauth)
                .map_err(|e| ErrorShape::invalid_params(e.to_string()))?;
            if source == TokenSource::Host || source == TokenSource::User {
                services
                    .oauth
                    .env_vars_for_server(&payload.id, oauth)
                    .await
                    .map_err(|e| ErrorShape::new(
                        error_codes::CONNECTION_FAILED,
                        format!("OAuth credentials unavailable: {e}"),
                    ))?
            } else {
                HashMap::new()
            }
        },
        None => HashMap::new(),
    };

    let secrets = services.secrets.get(&payload.id).await;
    let spec = services
        .installer
        .launch_spec(&payload.id, secrets, oauth_env)
        .await
        .map_err(|e| ErrorShape::invalid_params(e.to_string()))?;

    services.mcp.configure(&payload.id, spec).await;
    services
        .mcp
        .start(&payload.id)
        .await
        .map_err(|e| e.to_error_shape())?;

    let status = services
        .mcp
        .status(&payload.id)
        .await
        .map_err(|e| e.to_error_shape())?;
    Ok(serde_json::json!({
        "id": payload.id,
        "installState": InstallState::Running,
        "toolCount": status.tool_count,
        "pid": status.pid,
    }))
}

pub async fn stop_installed(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: IdPayload = parse_payload(request)?;
    services
        .mcp
        .stop(&payload.id)
        .await
        .map_err(|e| e.to_error_shape())?;
    Ok(serde_json::json!({
        "id": payload.id,
        "installState": InstallState::Installed,
    }))
}

#[derive(Deserialize)]
struct SecretsPayload {
    id: String,
    secrets: HashMap<String, String>,
}

pub async fn set_secrets(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: SecretsPayload = parse_payload(request)?;
    services
        .secrets
        .set(&payload.id, payload.secrets)
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    Ok(serde_json::json!({"ok": true}))
}

pub async fn get_status(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: IdPayload = parse_payload(request)?;
    let installed = services.installer.get(&payload.id).await;
    let state = combined_state(services, &payload.id).await;

    let mcp_status = services.mcp.status(&payload.id).await.ok();
    Ok(serde_json::json!({
        "id": payload.id,
        "installState": state,
        "installed": installed.is_some(),
        "toolCount": mcp_status.as_ref().map_or(0, |s| s.tool_count),
        "pid": mcp_status.as_ref().and_then(|s| s.pid),
        "lastError": mcp_status.and_then(|s| s.last_error),
    }))
}

/// Install store + MCP state machine, folded into the wire-visible state.
async fn combined_state(services: &Arc<Services>, id: &str) -> InstallState {
    if services.installer.get(id).await.is_none() {
        return InstallState::Absent;
    }
    match services.mcp.status(id).await {
        Ok(status) => match status.state {
            ServerState::Ready | ServerState::Starting => InstallState::Running,
            ServerState::Failed => InstallState::Failed,
            ServerState::Stopped => InstallState::Installed,
        },
        Err(_) => InstallState::Installed,
    }
}
