use {
    harbor_protocol::{ErrorShape, Scope, error_codes},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session creation requires scope {0}")]
    InsufficientScope(Scope),

    #[error("unknown scope: {0}")]
    UnknownScope(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} is terminated")]
    SessionTerminated(String),

    #[error("session {0} exhausted its tool-call quota")]
    QuotaExceeded(String),

    #[error("permission prompt failed: {0}")]
    PromptFailed(String),

    #[error(transparent)]
    Store(#[from] harbor_common::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl BrokerError {
    /// Wire representation. Quota exhaustion is deliberately surfaced as a
    /// permission denial so callers handle one rejection path.
    pub fn to_error_shape(&self) -> ErrorShape {
        match self {
            BrokerError::PermissionDenied(_) | BrokerError::QuotaExceeded(_) => {
                ErrorShape::new(error_codes::ERR_PERMISSION_DENIED, self.to_string())
            },
            BrokerError::InsufficientScope(_) => {
                ErrorShape::new(error_codes::ERR_INSUFFICIENT_SCOPE, self.to_string())
            },
            BrokerError::UnknownScope(_) => {
                ErrorShape::new(error_codes::INVALID_PARAMS, self.to_string())
            },
            BrokerError::SessionNotFound(_) => {
                ErrorShape::new(error_codes::NOT_FOUND, self.to_string())
            },
            BrokerError::SessionTerminated(_) => {
                ErrorShape::new(error_codes::ERR_PERMISSION_DENIED, self.to_string())
            },
            BrokerError::PromptFailed(_)
            | BrokerError::Store(_)
            | BrokerError::Io(_)
            | BrokerError::Message(_) => {
                ErrorShape::new(error_codes::INTERNAL_ERROR, self.to_string())
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
