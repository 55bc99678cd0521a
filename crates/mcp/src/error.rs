use {
    harbor_protocol::{ErrorShape, error_codes},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum McpError {
    #[error("MCP server '{0}' is not configured")]
    NotFound(String),

    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),

    #[error("failed to connect to MCP server '{server}': {message}")]
    ConnectionFailed { server: String, message: String },

    #[error("MCP request '{method}' timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    #[error("MCP server returned error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl McpError {
    pub fn to_error_shape(&self) -> ErrorShape {
        match self {
            McpError::NotFound(_) => ErrorShape::new(error_codes::NOT_FOUND, self.to_string()),
            McpError::NotConnected(_) => {
                ErrorShape::new(error_codes::NOT_CONNECTED, self.to_string())
            },
            McpError::ConnectionFailed { .. } => {
                ErrorShape::new(error_codes::CONNECTION_FAILED, self.to_string())
            },
            McpError::Timeout { .. } => {
                ErrorShape::new(error_codes::ERR_TIMEOUT, self.to_string())
            },
            McpError::Server { .. } | McpError::Protocol(_) => {
                ErrorShape::new(error_codes::ERR_TOOL_FAILED, self.to_string())
            },
            McpError::Io(_) => ErrorShape::new(error_codes::INTERNAL_ERROR, self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
