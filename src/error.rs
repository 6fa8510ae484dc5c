//! Error types shared across the crate.

use crate::domain::state::{VideoEvent, VideoState};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the job-processing core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid transition from {from}: {reason}")]
    InvalidTransition { from: VideoState, reason: String },

    #[error("encode failed: {0}")]
    EncodeFailure(String),

    #[error("encode timed out after {0:?}")]
    EncodeTimeout(std::time::Duration),

    #[error("download failed: {0}")]
    DownloadFailure(#[from] DownloadError),

    #[error("entity store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn rejected_event(from: VideoState, event: VideoEvent) -> Self {
        Error::InvalidTransition {
            from,
            reason: format!("{event} is not accepted"),
        }
    }

    /// Whether the failure comes from the persistence layer being unreachable.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// Errors reported by an `EntityStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("video {id} is {actual}, expected {expected}")]
    StateMismatch {
        id: String,
        expected: VideoState,
        actual: VideoState,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Error::NotFound { kind, id },
            // Losing a compare-and-transition race means the event no longer
            // applies to the state the caller observed.
            StoreError::StateMismatch { id, expected, actual } => Error::InvalidTransition {
                from: actual,
                reason: format!("video {id} is no longer {expected}"),
            },
            StoreError::Unavailable(msg) => Error::StoreUnavailable(msg),
            StoreError::Serialization(e) => Error::StoreUnavailable(e.to_string()),
            StoreError::Io(e) => Error::StoreUnavailable(e.to_string()),
        }
    }
}

/// Errors reported by an `EncoderRunner`.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The source file is missing or cannot be decoded; sibling tasks are skipped.
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("encoder exited with {status}: {detail}")]
    Failed { status: String, detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a remote `Transport`.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("remote responded with status {0}")]
    Status(u16),

    #[error("truncated body: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("transfer timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration problems that must halt startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not valid: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("download storage path is not configured")]
    MissingStoragePath,
}
