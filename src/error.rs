use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

/// Rejected option values, reported when a component is constructed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Failure of a call to the remote backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No remote endpoint for key: {0}")]
    UnknownEndpoint(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        };
        RemoteError::Status { status, message }
    }

    /// Service unavailable, rate limited, request timeout and client-side
    /// timeouts are worth another attempt. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => matches!(status, 408 | 429 | 503),
            RemoteError::Timeout => true,
            RemoteError::Malformed(_)
            | RemoteError::UnknownEndpoint(_)
            | RemoteError::Cancelled => false,
        }
    }
}
