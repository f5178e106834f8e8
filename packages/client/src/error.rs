use common::hash::HashParseError;
use thiserror::Error;

/// Errors from the content store and catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid content hash: {0}")]
    InvalidHash(#[from] HashParseError),

    #[error("blob exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("catalog encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors from the write buffer journal.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("journal IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors talking to the sync server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

/// Errors from device agent operations that span store and buffer.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}
