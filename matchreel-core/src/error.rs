use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::stream::{StoreError, StreamStatus};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Coarse failure classes surfaced to callers of the pipeline.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Processing,
    Persistence,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Provider => "provider",
            ErrorKind::Processing => "processing",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("provider failed to process asset: {0}")]
    Processing(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("stream {stream_id} not found")]
    NotFound { stream_id: String },
    #[error("stream {stream_id} cannot move from {from} to {to}")]
    InvalidTransition {
        stream_id: String,
        from: StreamStatus,
        to: StreamStatus,
    },
    #[error("webhook signature rejected: {0}")]
    Signature(String),
    #[error("malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_)
            | IngestError::Read { .. }
            | IngestError::NotFound { .. }
            | IngestError::InvalidTransition { .. }
            | IngestError::Signature(_)
            | IngestError::Payload(_) => ErrorKind::Validation,
            IngestError::Provider(_) => ErrorKind::Provider,
            IngestError::Processing(_) => ErrorKind::Processing,
            IngestError::Persistence(_) => ErrorKind::Persistence,
            IngestError::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Provider(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures_by_origin() {
        assert_eq!(
            IngestError::Validation("unsupported format".into()).kind(),
            ErrorKind::Validation
        );
        let provider = IngestError::from(ProviderError::Api {
            status_code: 503,
            body: "unavailable".into(),
        });
        assert_eq!(provider.kind(), ErrorKind::Provider);
        assert!(provider.is_retryable());
        assert_eq!(
            IngestError::from(StoreError::MissingStore).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            IngestError::Processing("invalid_input: corrupt".into()).kind(),
            ErrorKind::Processing
        );
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = IngestError::from(ProviderError::Api {
            status_code: 400,
            body: "bad request".into(),
        });
        assert!(!err.is_retryable());
        assert!(!IngestError::Validation("too large".into()).is_retryable());
    }
}
