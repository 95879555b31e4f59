//! Error types for telemetry sinks

use thiserror::Error;

/// Errors that can occur while delivering a batch
#[derive(Error, Debug)]
pub enum SinkError {
    /// Sink is missing required configuration
    #[error("Sink is not configured: {0}")]
    Config(String),

    /// Transport-level failure (connect, timeout, body)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Endpoint answered with a non-success status
    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Records could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing to a local sink failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Http(_) => true,
            SinkError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err.to_string())
    }
}

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let status = |status| SinkError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(SinkError::Http("connection reset".into()).is_retryable());
        assert!(!SinkError::Config("endpoint".into()).is_retryable());
    }
}
