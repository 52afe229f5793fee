use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::mentions;

/// Unique identifier for a message (UUIDv7 — time-sortable for easier log
/// correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    User,
    Agent,
    System,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A single chat message. Immutable once enqueued with the broker.
///
/// Mention fields are derived from `content` at construction time, so they
/// always agree with what a fresh extraction would produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,

    /// Human-readable display name of the sender.
    pub sender: String,

    pub sender_kind: SenderKind,

    pub content: String,

    pub room_id: String,

    /// Epoch milliseconds. Zero means "not yet stamped"; the broker stamps
    /// it at enqueue time.
    #[serde(default)]
    pub timestamp_ms: i64,

    /// Explicit delivery priority. `None` lets the broker pick the default
    /// for the sender kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Set when `sender_kind` is `Agent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_key: Option<String>,

    /// Agent handle with the leading `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_alias: Option<String>,

    /// Raw `@token` captures from `content`, in order of first appearance,
    /// deduplicated by normalized form. Stored without the leading `@`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,

    /// Normalized forms of `mentions`, empties dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions_normalized: Vec<String>,

    /// When set on a user message, the orchestrator must not schedule agent
    /// replies for it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub suppress_agent_responses: bool,

    /// Marks messages produced by internal helper responders so they do not
    /// feed back into scheduling bookkeeping.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_internal_responder: bool,

    /// "user-response" or "background" on agent messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,

    /// Strategy tag attached to agent messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_strategy: Option<String>,

    /// Provenance: the message that triggered this reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_sender: Option<String>,
}

impl Message {
    /// Build a message of the given kind, deriving mention fields from the
    /// content. The timestamp is stamped immediately; the broker re-stamps
    /// only if it is still zero.
    pub fn new(sender: &str, sender_kind: SenderKind, content: &str, room_id: &str) -> Self {
        let mentions = mentions::extract_mentions(content);
        let mentions_normalized = mentions::normalize_all(&mentions);
        Self {
            id: MessageId::new(),
            sender: sender.to_string(),
            sender_kind,
            content: content.to_string(),
            room_id: room_id.to_string(),
            timestamp_ms: now_ms(),
            priority: None,
            agent_id: None,
            provider_key: None,
            model_key: None,
            alias: None,
            normalized_alias: None,
            mentions,
            mentions_normalized,
            suppress_agent_responses: false,
            is_internal_responder: false,
            response_type: None,
            interaction_strategy: None,
            trigger_message_id: None,
            trigger_sender: None,
        }
    }

    pub fn user(sender: &str, content: &str, room_id: &str) -> Self {
        Self::new(sender, SenderKind::User, content, room_id)
    }

    pub fn system(sender: &str, content: &str, room_id: &str) -> Self {
        Self::new(sender, SenderKind::System, content, room_id)
    }

    pub fn agent(sender: &str, content: &str, room_id: &str) -> Self {
        Self::new(sender, SenderKind::Agent, content, room_id)
    }

    /// True when the given normalized alias appears in this message's
    /// mentions.
    pub fn mentions_alias(&self, normalized_alias: &str) -> bool {
        self.mentions_normalized
            .iter()
            .any(|m| m == normalized_alias)
    }
}

/// A message as stored in a room transcript. Internal entries (system
/// instructions injected for the agents) are visible to prompts but never
/// broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub message: Message,
    #[serde(default)]
    pub is_internal: bool,
}

impl ContextMessage {
    pub fn visible(message: Message) -> Self {
        Self {
            message,
            is_internal: false,
        }
    }

    pub fn internal(message: Message) -> Self {
        Self {
            message,
            is_internal: true,
        }
    }
}

impl From<Message> for ContextMessage {
    fn from(message: Message) -> Self {
        Self::visible(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_derives_mentions() {
        let m = Message::user("dana", "Hey @Alice, ask @bob. Also @alice again", "default");
        assert_eq!(m.mentions, vec!["Alice,", "bob."]);
        assert_eq!(m.mentions_normalized, vec!["alice", "bob"]);
        assert!(m.mentions_alias("alice"));
        assert!(!m.mentions_alias("carol"));
    }

    #[test]
    fn message_without_mentions_has_empty_fields() {
        let m = Message::user("dana", "no handles here", "default");
        assert!(m.mentions.is_empty());
        assert!(m.mentions_normalized.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }
}
