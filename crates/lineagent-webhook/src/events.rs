//! LINE webhook payload model
//!
//! Deliveries look like `{"destination": "U...", "events": [...]}`. Events are
//! decoded one at a time so a single malformed event never hides its siblings.

use crate::{BridgeError, Result};
use chrono::{DateTime, Utc};
use lineagent_core::{ChatMessage, EventKind, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Top-level webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Bot user id the delivery was addressed to
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<Value>,
}

/// One webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub delivery_context: Option<DeliveryContext>,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Chat the event came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventSource {
    User {
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
    Room {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
    },
}

impl EventSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::User { .. } => SourceKind::User,
            Self::Group { .. } => SourceKind::Group,
            Self::Room { .. } => SourceKind::Room,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User { user_id } | Self::Group { user_id, .. } | Self::Room { user_id, .. } => {
                user_id.as_deref()
            }
        }
    }

    /// Where replies go: the group or room when there is one, otherwise the user
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Group { group_id, .. } => Some(group_id.as_str()),
            Self::Room { room_id, .. } => Some(room_id.as_str()),
            Self::User { user_id } => user_id.as_deref(),
        }
    }
}

/// Message object of a `message` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mention: Option<Mention>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mention {
    #[serde(default)]
    pub mentionees: Vec<Mentionee>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentionee {
    pub index: usize,
    pub length: usize,
    #[serde(rename = "type", default)]
    pub mention_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Set when the mentioned user is this bot
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

/// Filters applied when turning events into actionable messages
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Answer group and room messages only when the bot is mentioned
    pub require_mention_in_groups: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            require_mention_in_groups: true,
        }
    }
}

/// Decode a verified body into events, skipping events that fail to decode
pub fn parse_events(body: &[u8]) -> Result<Vec<LineEvent>> {
    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| BridgeError::PayloadMalformed(e.to_string()))?;

    let events = payload
        .events
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| match serde_json::from_value::<LineEvent>(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed webhook event");
                None
            }
        })
        .collect();

    Ok(events)
}

impl LineEvent {
    /// Convert into a chat message; `None` when the event has no addressable source
    pub fn into_chat_message(self, received_at: DateTime<Utc>) -> Option<ChatMessage> {
        let Some(source) = self.source else {
            warn!(event_type = %self.event_type, "Skipping event without source");
            return None;
        };
        let Some(destination) = source.destination().map(str::to_string) else {
            warn!(event_type = %self.event_type, "Skipping event without addressable source");
            return None;
        };

        let (kind, text, mentions_bot) = match (self.event_type.as_str(), self.message) {
            ("message", Some(message)) => {
                let mentionees = message
                    .mention
                    .map(|m| m.mentionees)
                    .unwrap_or_default();
                let mentions_bot = mentionees.iter().any(|m| m.is_self);
                let text = message
                    .text
                    .as_deref()
                    .map(|t| strip_self_mentions(t, &mentionees))
                    .unwrap_or_default();
                (EventKind::Message(message.content_type), text, mentions_bot)
            }
            (other, _) => (EventKind::NonMessage(other.to_string()), String::new(), false),
        };

        Some(ChatMessage {
            event_id: self.webhook_event_id,
            kind,
            source: source.kind(),
            user_id: source.user_id().map(str::to_string),
            destination,
            reply_token: self.reply_token,
            text,
            mentions_bot,
            is_redelivery: self
                .delivery_context
                .map(|c| c.is_redelivery)
                .unwrap_or(false),
            received_at,
        })
    }
}

/// Remove the bot's own mention spans from `text`, then trim.
///
/// Spans are character offsets and are cut from the highest index down so
/// earlier offsets stay valid. Out-of-range spans are ignored.
pub fn strip_self_mentions(text: &str, mentionees: &[Mentionee]) -> String {
    let mut spans: Vec<(usize, usize)> = mentionees
        .iter()
        .filter(|m| m.is_self)
        .map(|m| (m.index, m.length))
        .collect();
    spans.sort_by(|a, b| b.0.cmp(&a.0));

    let mut chars: Vec<char> = text.chars().collect();
    for (index, length) in spans {
        let end = index.saturating_add(length);
        if end > chars.len() {
            debug!(index, length, "Ignoring out-of-range mention span");
            continue;
        }
        chars.drain(index..end);
    }

    chars.into_iter().collect::<String>().trim().to_string()
}

/// Whether a message should be forwarded to the agent
pub fn is_actionable(message: &ChatMessage, options: &ExtractOptions) -> bool {
    if !message.is_text_message() {
        return false;
    }
    if message.source.is_multi_party() && options.require_mention_in_groups && !message.mentions_bot {
        return false;
    }
    !message.text.is_empty()
}

/// Parse a verified body and keep the messages the bridge should answer
pub fn extract_messages(body: &[u8], options: &ExtractOptions) -> Result<Vec<ChatMessage>> {
    let received_at = Utc::now();
    let messages = parse_events(body)?
        .into_iter()
        .filter_map(|event| event.into_chat_message(received_at))
        .filter(|message| {
            let keep = is_actionable(message, options);
            if !keep {
                debug!(
                    event_id = %message.log_id(),
                    kind = ?message.kind,
                    source = ?message.source,
                    "Skipping non-actionable event"
                );
            }
            keep
        })
        .collect();
    Ok(messages)
}
