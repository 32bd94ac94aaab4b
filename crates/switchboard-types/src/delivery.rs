//! Inbox and outbox records for the idempotent delivery layer.
//!
//! Inbox records make re-delivered upstream events a no-op; outbox records
//! track the lifecycle of an outbound send across retries. Both are persisted
//! by a collaborator-owned store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::bus::Channel;

/// Marks an upstream event as already published.
///
/// Keyed by `(channel, platform_message_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusInboxRecord {
    pub channel: Channel,
    pub platform_message_id: String,
    pub conversation_key: String,
    pub seen_at: DateTime<Utc>,
}

/// Outbound delivery states.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('pending', 'sent', 'failed'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxStatus::Pending => write!(f, "pending"),
            OutboxStatus::Sent => write!(f, "sent"),
            OutboxStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OutboxStatus::Pending),
            "sent" => Ok(OutboxStatus::Sent),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("invalid outbox status: '{other}'")),
        }
    }
}

/// The last known state of an outbound send.
///
/// Keyed by `(channel, idempotency_key)`. Updated in place by the outbox state
/// machine; holds the latest terminal state only, not a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusOutboxRecord {
    pub channel: Channel,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// The platform acknowledged the send.
    pub accepted: bool,
    /// The platform reported the send as a duplicate of an earlier one.
    pub deduped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Caller-supplied description of an outbound send.
///
/// Carries the record identity plus the descriptive fields copied into the
/// record on every `start_attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxDraft {
    pub channel: Channel,
    pub idempotency_key: String,
    pub contact_id: Option<String>,
    pub peer_id: Option<String>,
    pub item_id: Option<String>,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
}

impl OutboxDraft {
    pub fn new(channel: Channel, idempotency_key: impl Into<String>) -> Self {
        Self {
            channel,
            idempotency_key: idempotency_key.into(),
            contact_id: None,
            peer_id: None,
            item_id: None,
            content_type: None,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, content_type: impl Into<String>, payload: Vec<u8>) -> Self {
        self.content_type = Some(content_type.into());
        self.payload = payload;
        self
    }

    pub fn with_contact(mut self, contact_id: impl Into<String>) -> Self {
        self.contact_id = Some(contact_id.into());
        self
    }

    pub fn with_peer(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}
