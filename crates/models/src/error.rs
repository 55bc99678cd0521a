use {
    harbor_protocol::{ErrorShape, error_codes},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("LLM request failed: {0}")]
    LlmFailed(String),

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("no LLM providers are configured")]
    NoProviders,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ModelError {
    pub fn to_error_shape(&self) -> ErrorShape {
        match self {
            ModelError::EmptyResponse => {
                ErrorShape::new(error_codes::ERR_EMPTY_RESPONSE, self.to_string())
            },
            ModelError::UnknownProvider(_) | ModelError::NoProviders => {
                ErrorShape::new(error_codes::INVALID_PARAMS, self.to_string())
            },
            ModelError::LlmFailed(_) | ModelError::Http(_) => {
                ErrorShape::new(error_codes::ERR_LLM_FAILED, self.to_string())
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
