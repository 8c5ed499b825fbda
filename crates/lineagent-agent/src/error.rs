//! Error types for agent runtime invocation

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised while invoking the agent runtime or consuming its stream
#[derive(Error, Debug)]
pub enum AgentError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Runtime answered with a non-success status
    #[error("Agent runtime error ({status}): {message}")]
    Api { status: u16, message: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Endpoint URL could not be built
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Request could not be signed with the hosting environment's credentials
    #[error("Request signing failed: {0}")]
    Signing(String),

    /// Transport failed mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// Runtime reported an error inside the stream
    #[error("Agent runtime reported an error: {0}")]
    Runtime(String),

    /// A chunk arrived with an unexpected sequence position
    #[error("Out-of-order chunk: expected sequence {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    /// A chunk arrived after the end-of-stream marker
    #[error("Chunk {0} received after end of stream")]
    AfterEnd(u64),

    /// The stream closed without an end-of-stream marker
    #[error("Stream ended without an end-of-stream marker")]
    Incomplete,

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether the runtime stream violated the chunk ordering contract
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AgentError::OutOfOrder { .. } | AgentError::AfterEnd(_) | AgentError::Incomplete
        )
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AgentError::Api { status, .. } => Some(*status),
            AgentError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_classification() {
        assert!(AgentError::OutOfOrder { expected: 1, got: 3 }.is_protocol_violation());
        assert!(AgentError::AfterEnd(4).is_protocol_violation());
        assert!(AgentError::Incomplete.is_protocol_violation());
        assert!(!AgentError::Stream("reset".to_string()).is_protocol_violation());
    }

    #[test]
    fn test_status_code() {
        let err = AgentError::Api {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(AgentError::Incomplete.status_code(), None);
    }
}
