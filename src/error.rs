use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Central error type for the stem-remix-core crate.
#[derive(Debug, Error)]
pub enum RemixError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No track found for `{0}`")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Track is {duration_secs:.0}s long, the limit is {max_secs}s")]
    TooLong { duration_secs: f64, max_secs: u64 },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Separation failed: {0}")]
    Separation(String),

    #[error("Output is {size_bytes} bytes even at {bitrate_kbps} kbps, the limit is {max_bytes} bytes")]
    SizeExceeded {
        size_bytes: u64,
        bitrate_kbps: u32,
        max_bytes: u64,
    },

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for RemixError {
    fn from(e: toml::de::Error) -> Self {
        RemixError::Config(e.to_string())
    }
}

/// Stable, serializable classification of a [`RemixError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    NotFound,
    FetchError,
    TooLong,
    UnsupportedFormat,
    SeparationError,
    SizeExceeded,
    EncodeError,
    Cancelled,
    InternalError,
}

impl RemixError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemixError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RemixError::NotFound(_) => ErrorKind::NotFound,
            RemixError::Fetch(_) => ErrorKind::FetchError,
            RemixError::TooLong { .. } => ErrorKind::TooLong,
            RemixError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            RemixError::Separation(_) => ErrorKind::SeparationError,
            RemixError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            RemixError::Encode(_) => ErrorKind::EncodeError,
            RemixError::Cancelled => ErrorKind::Cancelled,
            RemixError::Config(_) | RemixError::Internal(_) | RemixError::Io(_) => {
                ErrorKind::InternalError
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RemixError>;
