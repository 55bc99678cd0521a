//! `catalog_*` handlers.

use std::sync::Arc;

use serde::Deserialize;

use harbor_protocol::{ErrorShape, NativeRequest};

use crate::{methods::parse_payload, services::Services};

pub async fn get(services: &Arc<Services>) -> Result<serde_json::Value, ErrorShape> {
    let entries = services
        .catalog
        .get_all()
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    let stale = services
        .catalog
        .is_stale()
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    Ok(serde_json::json!({"entries": entries, "stale": stale}))
}

#[derive(Deserialize)]
struct RefreshPayload {
    #[serde(default)]
    force: bool,
}

pub async fn refresh(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: RefreshPayload = parse_payload(request)?;
    let changes = services
        .catalog
        .refresh(payload.force)
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    Ok(serde_json::json!({"changes": changes}))
}

#[derive(Deserialize)]
struct SearchPayload {
    query: String,
}

pub async fn search(
    services: &Arc<Services>,
    request: &NativeRequest,
) -> Result<serde_json::Value, ErrorShape> {
    let payload: SearchPayload = parse_payload(request)?;
    let entries = services
        .catalog
        .search(&payload.query)
        .await
        .map_err(|e| ErrorShape::internal(e.to_string()))?;
    Ok(serde_json::json!({"entries": entries}))
}
