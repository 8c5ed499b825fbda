//! Agent session resolution
//!
//! Conversations map onto runtime sessions deterministically, so repeated
//! messages from the same chat reach the same agent memory without any
//! bridge-side storage.

use async_trait::async_trait;
use lineagent_core::AgentSession;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Shortest session id the runtime accepts
pub const MIN_SESSION_ID_LEN: usize = 33;

const SESSION_PREFIX: &str = "line-";

/// Resolves the agent session for a conversation
#[async_trait]
pub trait SessionResolver: Send + Sync {
    /// Return the session bound to `conversation_id`, minting a fresh one when absent
    async fn resolve(&self, conversation_id: Option<&str>) -> AgentSession;
}

/// Derives session ids from conversation ids
#[derive(Debug, Clone, Default)]
pub struct ConversationSessions;

impl ConversationSessions {
    pub fn new() -> Self {
        Self
    }

    /// Session id for a conversation, padded with a digest when too short
    pub fn session_id_for(conversation_id: &str) -> String {
        let id = format!("{}{}", SESSION_PREFIX, conversation_id);
        if id.len() >= MIN_SESSION_ID_LEN {
            return id;
        }
        let digest = Sha256::digest(conversation_id.as_bytes());
        format!("{}-{}", id, hex::encode(digest))
    }

    fn minted() -> String {
        format!("{}{}", SESSION_PREFIX, Uuid::new_v4().simple())
    }
}

#[async_trait]
impl SessionResolver for ConversationSessions {
    async fn resolve(&self, conversation_id: Option<&str>) -> AgentSession {
        match conversation_id.filter(|id| !id.is_empty()) {
            Some(id) => AgentSession {
                session_id: Self::session_id_for(id),
                conversation_id: Some(id.to_string()),
                minted: false,
            },
            None => AgentSession {
                session_id: Self::minted(),
                conversation_id: None,
                minted: true,
            },
        }
    }
}
