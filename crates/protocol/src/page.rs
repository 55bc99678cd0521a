//! In-page transport envelope: page ↔ content script ↔ background.
//!
//! Every message is a single JSON object tagged with the shared channel name
//! and carrying exactly one frame kind. `id` is a per-request UUID; stream
//! events for a given id are strictly ordered, responses may interleave.

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorShape;

pub const PAGE_CHANNEL: &str = "web_agents_api";

/// Envelope for all page-transport messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMessage {
    pub channel: String,
    #[serde(flatten)]
    pub frame: PageFrame,
}

impl PageMessage {
    pub fn new(frame: PageFrame) -> Self {
        Self {
            channel: PAGE_CHANNEL.into(),
            frame,
        }
    }

    /// Whether this message belongs to the harbor channel at all.
    pub fn is_ours(&self) -> bool {
        self.channel == PAGE_CHANNEL
    }
}

/// One of the four frame kinds. Exactly one key is present in the envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageFrame {
    Request(PageRequest),
    Response(PageResponse),
    StreamEvent(PageStreamEvent),
    Abort(PageAbort),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl PageResponse {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageStreamEvent {
    pub id: String,
    pub event: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageAbort {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_shape() {
        let msg = PageMessage::new(PageFrame::Request(PageRequest {
            id: "r1".into(),
            request_type: "agent.tools.list".into(),
            payload: serde_json::json!({}),
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["channel"], "web_agents_api");
        assert_eq!(json["request"]["type"], "agent.tools.list");
        assert_eq!(json["request"]["id"], "r1");
    }

    #[test]
    fn test_stream_event_key_is_camel_case() {
        let msg = PageMessage::new(PageFrame::StreamEvent(PageStreamEvent {
            id: "r2".into(),
            event: serde_json::json!({"type": "thinking"}),
            done: None,
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("streamEvent").is_some());
        assert!(json.get("stream_event").is_none());
    }

    #[test]
    fn test_round_trip_all_frames() {
        let frames = vec![
            PageFrame::Request(PageRequest {
                id: "a".into(),
                request_type: "ai.createTextSession".into(),
                payload: serde_json::json!({"temperature": 0.2}),
            }),
            PageFrame::Response(PageResponse::err(
                "a",
                ErrorShape::permission_denied("denied"),
            )),
            PageFrame::StreamEvent(PageStreamEvent {
                id: "a".into(),
                event: serde_json::json!("token"),
                done: Some(true),
            }),
            PageFrame::Abort(PageAbort { id: "a".into() }),
        ];
        for frame in frames {
            let msg = PageMessage::new(frame);
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: PageMessage = serde_json::from_str(&json).unwrap();
            assert!(parsed.is_ours());
        }
    }

    #[test]
    fn test_foreign_channel_detected() {
        let json = r#"{"channel":"other_api","abort":{"id":"x"}}"#;
        let parsed: PageMessage = serde_json::from_str(json).unwrap();
        assert!(!parsed.is_ours());
    }
}
