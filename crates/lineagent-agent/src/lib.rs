//! Agent runtime side of the LINE agent bridge
//!
//! - Streaming invocation of the hosted agent runtime over Server-Sent Events
//! - SigV4 signing with the hosting environment's AWS credentials
//! - Ordered chunk model with an explicit end-of-stream marker
//! - Aggregation of streamed text into size-limited replies
//! - Conversation to session resolution

pub mod aggregator;
pub mod client;
pub mod error;
pub mod session;
pub mod signing;
pub mod streaming;

pub use aggregator::{AggregateStep, ResponseAggregator};
pub use client::{AgentInvoker, AgentRuntimeClient, AgentRuntimeClientBuilder};
pub use error::{AgentError, Result};
pub use session::{ConversationSessions, SessionResolver};
pub use signing::RequestSigner;
pub use streaming::{AgentStream, ChunkKind, RuntimeEvent, ScriptedStreamBuilder, StreamChunk};
