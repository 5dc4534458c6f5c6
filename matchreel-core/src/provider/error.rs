use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider api returned {status_code}: {body}")]
    Api { status_code: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider response missing {0}")]
    MissingField(&'static str),
    #[error("cannot build input url for {0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Failures that may succeed on another attempt: timeouts, throttling,
    /// server errors and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Api { status_code, .. } => {
                matches!(status_code, 408 | 429) || (500..=599).contains(status_code)
            }
            ProviderError::Transport(err) => !(err.is_builder() || err.is_decode()),
            ProviderError::MissingField(_) | ProviderError::InvalidInput(_) => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Api { status_code, .. } => Some(*status_code),
            ProviderError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
