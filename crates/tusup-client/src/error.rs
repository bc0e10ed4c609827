//! Error types for upload operations

use thiserror::Error;

/// Result type alias for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Errors surfaced to the caller of an upload
///
/// Offset conflicts are recovered internally and never appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The upload request was rejected before anything was sent
    #[error("Invalid upload configuration: {0}")]
    InvalidConfig(String),

    /// The endpoint answered with an unexpected status, or the request never completed
    #[error("{message}")]
    Transport {
        status: Option<u16>,
        message: String,
        url: String,
        offset: u64,
    },

    /// A bounded retry loop gave up
    #[error("Gave up on {operation} after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },
}

impl UploadError {
    /// Create a configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// HTTP status returned by the endpoint, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Offset the failed request was sent from
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Transport { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Failures below the protocol layer: the request did not yield an HTTP response
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP request {}", describe_http(.0))]
    Http(#[from] reqwest::Error),

    /// No body bytes moved and no answer arrived within the idle limit
    #[error("PATCH stalled: no progress for {}ms", .0.as_millis())]
    Stalled(std::time::Duration),

    /// Reading the byte source failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport could not produce a response for this request
    #[error("Request failed: {0}")]
    Request(String),
}

/// Name the failure class and append the cause chain, which reqwest's own
/// message leaves out.
fn describe_http(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else if err.is_body() {
        "body failed"
    } else {
        "failed"
    };

    let mut message = format!("{}: {}", kind, err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
