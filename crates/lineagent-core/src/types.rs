use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Maximum characters LINE accepts in a single text message.
pub const LINE_MAX_TEXT_CHARS: usize = 5000;

/// Maximum message objects LINE accepts in one reply or push request.
pub const LINE_MAX_MESSAGES_PER_REQUEST: usize = 5;

/// Kind of chat the event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    User,
    Group,
    Room,
}

impl SourceKind {
    pub fn is_multi_party(&self) -> bool {
        matches!(self, Self::Group | Self::Room)
    }
}

/// Webhook event type as far as the bridge cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum EventKind {
    /// A `message` event; carries the message content type (`text`, `sticker`, ...).
    Message(String),
    /// Any other event type (`follow`, `postback`, ...).
    NonMessage(String),
}

/// One chat message extracted from an inbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Provider-assigned webhook event id, if present
    pub event_id: Option<String>,
    /// Event type
    pub kind: EventKind,
    /// Source chat kind
    pub source: SourceKind,
    /// Sending user, when the provider discloses it
    pub user_id: Option<String>,
    /// Group id, room id or user id that replies are addressed to
    pub destination: String,
    /// Single-use reply token
    pub reply_token: Option<String>,
    /// Message text with bot self-mentions removed
    pub text: String,
    /// Whether the bot itself was mentioned
    pub mentions_bot: bool,
    /// Set when the provider is redelivering a previously failed webhook
    pub is_redelivery: bool,
    /// Receipt timestamp
    pub received_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_text_message(&self) -> bool {
        matches!(&self.kind, EventKind::Message(content) if content == "text")
    }

    /// Identifier used to correlate this chat with an agent session.
    pub fn conversation_id(&self) -> &str {
        &self.destination
    }

    /// Short identifier for log lines.
    pub fn log_id(&self) -> &str {
        self.event_id.as_deref().unwrap_or("-")
    }
}

/// Agent-runtime session bound to a conversation for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: String,
    pub conversation_id: Option<String>,
    /// True when no conversation id was available and the id was freshly generated
    pub minted: bool,
}

/// How the aggregator handles text longer than one provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Single message, cut at the length limit
    #[default]
    Truncate,
    /// Several messages (up to the per-request cap), the last one cut if needed
    Split,
}

#[derive(Debug, Error)]
#[error("Unknown overflow policy: {0}")]
pub struct UnknownOverflowPolicy(pub String);

impl FromStr for OverflowPolicy {
    type Err = UnknownOverflowPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "split" => Ok(Self::Split),
            other => Err(UnknownOverflowPolicy(other.to_string())),
        }
    }
}

/// Size policy applied while aggregating a streamed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyPolicy {
    /// Per-message limit in characters
    pub max_chars: usize,
    pub overflow: OverflowPolicy,
    /// Message cap for the split policy
    pub max_segments: usize,
}

impl Default for ReplyPolicy {
    fn default() -> Self {
        Self {
            max_chars: LINE_MAX_TEXT_CHARS,
            overflow: OverflowPolicy::Truncate,
            max_segments: LINE_MAX_MESSAGES_PER_REQUEST,
        }
    }
}

impl ReplyPolicy {
    pub fn new(max_chars: usize, overflow: OverflowPolicy) -> Self {
        Self {
            max_chars,
            overflow,
            ..Self::default()
        }
    }

    /// Total characters one reply can carry under this policy.
    pub fn capacity(&self) -> usize {
        match self.overflow {
            OverflowPolicy::Truncate => self.max_chars,
            OverflowPolicy::Split => self.max_chars.saturating_mul(self.max_segments.max(1)),
        }
    }
}

/// Why a reply was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The runtime's end-of-stream marker was observed
    EndOfStream,
    /// The size limit was reached before the stream ended
    LengthLimit,
    /// The invocation failed or timed out; the reply holds partial content
    Interrupted,
    /// No agent content; the reply is the configured fallback text
    Fallback,
}

/// Aggregated reply ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReply {
    /// Reply token captured from the originating message
    pub reply_token: Option<String>,
    /// Push target if the reply token cannot be used
    pub destination: String,
    /// Provider messages, each within the length limit
    pub segments: Vec<String>,
    /// Whether text was dropped to honor the size policy
    pub truncated: bool,
    pub completion: Completion,
}

impl FinalReply {
    /// Fallback reply for a message whose invocation produced nothing usable.
    pub fn fallback(message: &ChatMessage, text: &str) -> Self {
        Self {
            reply_token: message.reply_token.clone(),
            destination: message.destination.clone(),
            segments: vec![text.to_string()],
            truncated: false,
            completion: Completion::Fallback,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.trim().is_empty())
    }

    /// Full reply text, segments joined by newlines.
    pub fn text(&self) -> String {
        self.segments.join("\n")
    }
}
