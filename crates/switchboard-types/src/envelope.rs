//! Topic payload schemas.
//!
//! Each topic carries exactly one payload shape, encoded as JSON inside
//! `BusMessage::payload`. `TopicPayload` is the decoded, topic-tagged form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::Topic;

/// Decoded payload for chat-message-shaped topics (`chat-message`, `dm-reply`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Agent session; always a UUIDv7.
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl MessageEnvelope {
    /// Build an envelope stamped with the current time.
    pub fn new(message_id: impl Into<String>, text: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            message_id: message_id.into(),
            text: text.into(),
            sent_at: Utc::now(),
            session_id,
            reply_to: None,
        }
    }
}

/// Payload for `dm-checkin`: the agent nudging a user in a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmCheckin {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
}

/// Payload for `proactive-share`: something the agent decided to surface unprompted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProactiveShare {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// A payload decoded under the schema bound to its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPayload {
    ProactiveShare(ProactiveShare),
    DmCheckin(DmCheckin),
    DmReply(MessageEnvelope),
    ChatMessage(MessageEnvelope),
}

impl TopicPayload {
    /// Decode raw payload bytes under `topic`'s schema.
    pub fn decode(topic: Topic, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match topic {
            Topic::ProactiveShare => TopicPayload::ProactiveShare(serde_json::from_slice(bytes)?),
            Topic::DmCheckin => TopicPayload::DmCheckin(serde_json::from_slice(bytes)?),
            Topic::DmReply => TopicPayload::DmReply(serde_json::from_slice(bytes)?),
            Topic::ChatMessage => TopicPayload::ChatMessage(serde_json::from_slice(bytes)?),
        })
    }

    /// The topic this payload belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            TopicPayload::ProactiveShare(_) => Topic::ProactiveShare,
            TopicPayload::DmCheckin(_) => Topic::DmCheckin,
            TopicPayload::DmReply(_) => Topic::DmReply,
            TopicPayload::ChatMessage(_) => Topic::ChatMessage,
        }
    }

    /// The envelope for chat-message-shaped payloads.
    pub fn envelope(&self) -> Option<&MessageEnvelope> {
        match self {
            TopicPayload::DmReply(env) | TopicPayload::ChatMessage(env) => Some(env),
            _ => None,
        }
    }

    /// The user-visible text, whatever the topic.
    pub fn text(&self) -> &str {
        match self {
            TopicPayload::ProactiveShare(p) => &p.text,
            TopicPayload::DmCheckin(p) => &p.text,
            TopicPayload::DmReply(env) | TopicPayload::ChatMessage(env) => &env.text,
        }
    }
}
