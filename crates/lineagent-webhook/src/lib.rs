//! LINE webhook side of the agent bridge
//!
//! This crate provides:
//! - Inbound webhook intake with `X-Line-Signature` verification
//! - Parsing of LINE webhook payloads into chat messages
//! - Reply dispatch with push fallback and bounded retries
//! - Orchestration of invocation, aggregation and dispatch per message
//!
//! # Example
//!
//! ```rust,ignore
//! use lineagent_webhook::{create_webhook_router, Bridge, BridgeQueue, WebhookState};
//! use std::sync::Arc;
//!
//! let bridge = Arc::new(Bridge::new(invoker, sessions, dispatcher, settings));
//! let (queue, processor) = BridgeQueue::new(bridge, 1024);
//! tokio::spawn(processor.run());
//!
//! let state = Arc::new(WebhookState::new(verifier, queue, extract_options));
//! let app = create_webhook_router(state);
//! ```

// Module order matters due to dependencies
pub mod signature;
pub mod events;
pub mod delivery;
pub mod outbound;
pub mod bridge;
pub mod inbound;

pub use signature::*;
pub use events::*;
pub use delivery::*;
pub use outbound::*;
pub use bridge::*;
pub use inbound::*;

use lineagent_agent::AgentError;
use std::time::Duration;
use thiserror::Error;

/// Bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Malformed payload: {0}")]
    PayloadMalformed(String),

    #[error("Agent invocation timed out after {0:?}")]
    InvocationTimeout(Duration),

    #[error("Agent invocation failed: {0}")]
    Invocation(#[from] AgentError),

    #[error("Reply token expired or invalid")]
    ReplyTokenExpired,

    #[error("Dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("LINE API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Processing queue full")]
    QueueFull,

    #[error("Processing queue closed")]
    QueueClosed,
}

impl BridgeError {
    /// Whether a send that failed with this error may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Api { status, .. } => *status == 429 || *status >= 500,
            BridgeError::Http(e) => !e.is_builder() && !e.is_decode(),
            _ => false,
        }
    }

    /// HTTP status from the provider, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BridgeError::Api { status, .. } => Some(*status),
            BridgeError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
