use std::fmt;
use thiserror::Error;

/// Result type alias for DriftQ client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Structured error returned by the broker for a non-success HTTP status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Broker error code (the `error` field of the body)
    pub code: String,
    /// Human readable message (the `message` field of the body)
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "driftq api error: status={} code={:?} message={:?}",
            self.status, self.code, self.message
        )
    }
}

impl std::error::Error for ApiError {}

/// Errors that can occur in the DriftQ client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request rejected locally before being sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Broker answered with a non-success status
    #[error(transparent)]
    Api(ApiError),

    /// Message serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Stream read failure
    #[error("Stream error: {0}")]
    Stream(String),

    /// The governing context was cancelled
    #[error("context canceled")]
    Canceled,

    /// The governing context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// Internal client error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ApiError> for ClientError {
    fn from(err: ApiError) -> Self {
        ClientError::Api(err)
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidConfig(format!("Invalid URL: {}", err))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            ClientError::Deserialization(err.to_string())
        } else {
            ClientError::Connection(format!("HTTP request failed: {}", err))
        }
    }
}

impl From<tokio_util::codec::LinesCodecError> for ClientError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        ClientError::Stream(err.to_string())
    }
}

/// Status codes worth another attempt on a retry-safe request
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl ClientError {
    /// Get the error category for logs
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::InvalidConfig(_) => "configuration",
            ClientError::InvalidRequest(_) => "request",
            ClientError::Connection(_) => "connection",
            ClientError::Api(_) => "api",
            ClientError::Serialization(_) | ClientError::Deserialization(_) => "serialization",
            ClientError::Stream(_) => "stream",
            ClientError::Canceled => "canceled",
            ClientError::DeadlineExceeded => "deadline",
            ClientError::Internal(_) => "internal",
        }
    }

    /// Check if the error is retryable.
    ///
    /// Transport failures are treated permissively: anything that is not a
    /// cancellation, an expired deadline or a locally rejected request is
    /// worth another attempt, bounded by the retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Canceled
            | ClientError::DeadlineExceeded
            | ClientError::InvalidConfig(_)
            | ClientError::InvalidRequest(_)
            | ClientError::Serialization(_) => false,

            ClientError::Api(api) => is_retryable_status(api.status),

            _ => true,
        }
    }

    /// True for cancellation and deadline expiry
    pub fn is_context_error(&self) -> bool {
        matches!(self, ClientError::Canceled | ClientError::DeadlineExceeded)
    }

    /// The broker error, if this is one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(api) => Some(api),
            _ => None,
        }
    }
}
