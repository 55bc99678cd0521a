//! Error taxonomy. The codes are part of the wire surface — spellings are
//! frozen, including the mixed upper/lower casing inherited from the two
//! transports.

use serde::{Deserialize, Serialize};

pub const ERR_TIMEOUT: &str = "ERR_TIMEOUT";
pub const ERR_PERMISSION_DENIED: &str = "ERR_PERMISSION_DENIED";
pub const ERR_INSUFFICIENT_SCOPE: &str = "ERR_INSUFFICIENT_SCOPE";
pub const ERR_HARBOR_NOT_FOUND: &str = "ERR_HARBOR_NOT_FOUND";
pub const ERR_TOOL_NOT_FOUND: &str = "ERR_TOOL_NOT_FOUND";
pub const ERR_TOOL_FAILED: &str = "ERR_TOOL_FAILED";
pub const ERR_LLM_FAILED: &str = "ERR_LLM_FAILED";
pub const ERR_EMPTY_RESPONSE: &str = "ERR_EMPTY_RESPONSE";

// Native-channel framing and dispatch faults.
pub const INVALID_MESSAGE: &str = "invalid_message";
pub const MESSAGE_TOO_LARGE: &str = "message_too_large";
pub const INVALID_PARAMS: &str = "invalid_params";
pub const NOT_FOUND: &str = "not_found";
pub const NOT_CONNECTED: &str = "not_connected";
pub const CONNECTION_FAILED: &str = "connection_failed";
pub const INTERNAL_ERROR: &str = "internal_error";

/// Structured error payload carried by both envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorShape {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ERR_PERMISSION_DENIED, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ERR_TIMEOUT, message)
    }
}

impl std::fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_shape_round_trip() {
        let err = ErrorShape::permission_denied("mcp:tools.call not granted")
            .with_details(serde_json::json!({"origin": "https://example.com"}));
        let json = serde_json::to_string(&err).unwrap();
        let parsed: ErrorShape = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
        assert_eq!(parsed.code, ERR_PERMISSION_DENIED);
    }

    #[test]
    fn test_details_omitted_when_none() {
        let err = ErrorShape::timeout("request exceeded 30s");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("details"));
    }
}
