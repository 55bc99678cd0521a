//! Native-messaging envelope: background ↔ helper.
//!
//! Every frame is a JSON object with `type` plus `request_id`; responses and
//! stream events echo the request's id. Unsolicited framing errors carry an
//! empty `request_id`.

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorShape;

/// Router surface: every `type` the helper dispatches on.
pub mod msg {
    pub const SYSTEM_GET_VERSION: &str = "system.getVersion";

    pub const AI_CAN_CREATE_TEXT_SESSION: &str = "ai.canCreateTextSession";
    pub const AI_CREATE_TEXT_SESSION: &str = "ai.createTextSession";
    pub const AI_LANGUAGE_MODEL_CAPABILITIES: &str = "ai.languageModel.capabilities";
    pub const AI_LANGUAGE_MODEL_CREATE: &str = "ai.languageModel.create";
    pub const AI_PROVIDERS_LIST: &str = "ai.providers.list";
    pub const AI_PROVIDERS_GET_ACTIVE: &str = "ai.providers.getActive";
    pub const SESSION_PROMPT: &str = "session.prompt";
    pub const SESSION_PROMPT_STREAMING: &str = "session.promptStreaming";
    pub const SESSION_DESTROY: &str = "session.destroy";

    pub const AGENT_REQUEST_PERMISSIONS: &str = "agent.requestPermissions";
    pub const AGENT_PERMISSIONS_LIST: &str = "agent.permissions.list";
    pub const AGENT_TOOLS_LIST: &str = "agent.tools.list";
    pub const AGENT_TOOLS_CALL: &str = "agent.tools.call";
    pub const AGENT_RUN: &str = "agent.run";
    pub const AGENT_SESSIONS_CREATE: &str = "agent.sessions.create";
    pub const AGENT_SESSIONS_GET: &str = "agent.sessions.get";
    pub const AGENT_SESSIONS_LIST: &str = "agent.sessions.list";
    pub const AGENT_SESSIONS_TERMINATE: &str = "agent.sessions.terminate";

    pub const CATALOG_GET: &str = "catalog_get";
    pub const CATALOG_REFRESH: &str = "catalog_refresh";
    pub const CATALOG_SEARCH: &str = "catalog_search";

    pub const CHECK_RUNTIMES: &str = "check_runtimes";
    pub const INSTALL_SERVER: &str = "install_server";
    pub const UNINSTALL_SERVER: &str = "uninstall_server";
    pub const LIST_INSTALLED: &str = "list_installed";
    pub const START_INSTALLED: &str = "start_installed";
    pub const STOP_INSTALLED: &str = "stop_installed";
    pub const SET_SERVER_SECRETS: &str = "set_server_secrets";
    pub const GET_SERVER_STATUS: &str = "get_server_status";

    /// Decision frame sent by the extension to resolve a pending permission prompt.
    pub const PERMISSION_DECISION: &str = "permission_decision";
    /// Abort frame cancelling an in-flight request by id.
    pub const ABORT: &str = "abort";
    /// A page navigated or its tab closed: page-lifetime grants for the
    /// origin are consumed and implicit sessions end.
    pub const PAGE_RESET: &str = "page_reset";
}

/// Background → helper request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeRequest {
    #[serde(rename = "type")]
    pub request_type: String,
    pub request_id: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl NativeRequest {
    pub fn new(
        request_type: impl Into<String>,
        request_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".into(), other);
                map
            },
        };
        Self {
            request_type: request_type.into(),
            request_id: request_id.into(),
            payload,
        }
    }

    /// Reassemble the payload fields as a `Value` for handler-side parsing.
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.payload.clone())
    }
}

/// Helper → background success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub result: serde_json::Value,
}

impl NativeResponse {
    pub fn ok(request_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            response_type: "response".into(),
            request_id: request_id.into(),
            result,
        }
    }
}

/// Helper → background stream event for a streaming request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub request_id: String,
    pub event: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl NativeEvent {
    pub fn new(request_id: impl Into<String>, event: serde_json::Value) -> Self {
        Self {
            event_type: "stream_event".into(),
            request_id: request_id.into(),
            event,
            done: None,
        }
    }

    pub fn done(request_id: impl Into<String>) -> Self {
        Self {
            event_type: "stream_event".into(),
            request_id: request_id.into(),
            event: serde_json::Value::Null,
            done: Some(true),
        }
    }
}

/// Helper → background error frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub request_id: String,
    pub error: ErrorShape,
}

impl NativeErrorFrame {
    pub fn new(request_id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            frame_type: "error".into(),
            request_id: request_id.into(),
            error,
        }
    }

    /// Framing faults have no correlatable request.
    pub fn unsolicited(error: ErrorShape) -> Self {
        Self::new("", error)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::error_codes};

    #[test]
    fn test_request_payload_flattened() {
        let req = NativeRequest::new(
            msg::AGENT_TOOLS_CALL,
            "req-1",
            serde_json::json!({"tool": "time.now", "args": {}}),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], msg::AGENT_TOOLS_CALL);
        assert_eq!(json["request_id"], "req-1");
        assert_eq!(json["tool"], "time.now");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn test_request_round_trip_preserves_payload() {
        let json = serde_json::json!({
            "type": "session.prompt",
            "request_id": "abc",
            "sessionId": "s1",
            "input": "hello",
        });
        let req: NativeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.request_type, "session.prompt");
        assert_eq!(req.payload_value()["input"], "hello");
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = NativeErrorFrame::unsolicited(ErrorShape::new(
            error_codes::MESSAGE_TOO_LARGE,
            "frame of 2097152 bytes exceeds limit",
        ));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["request_id"], "");
        assert_eq!(json["error"]["code"], "message_too_large");
    }

    #[test]
    fn test_event_done_marker() {
        let done = NativeEvent::done("r9");
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["done"], true);
        let mid = NativeEvent::new("r9", serde_json::json!({"type": "thinking"}));
        let json = serde_json::to_value(&mid).unwrap();
        assert!(json.get("done").is_none());
    }
}
