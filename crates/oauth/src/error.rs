use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("OAuth provider '{0}' is not supported")]
    UnknownProvider(String),

    #[error("no usable OAuth source for provider '{provider}': {reason}")]
    Unhandleable { provider: String, reason: String },

    #[error("state mismatch in OAuth callback")]
    StateMismatch,

    #[error("no tokens stored for server '{0}'")]
    NoTokens(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] harbor_common::StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
