//! Message bus domain types for Switchboard.
//!
//! Defines the `BusMessage` unit of work that channel adapters publish onto the
//! bus, the closed enums it is built from (`Channel`, `Direction`, `Topic`),
//! and the `DeliveryError` reported when a handler fails after admission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Chat platform a message originates from or is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Slack,
    Discord,
    /// Bot-to-bot peer protocol. Also accepts the long name `peer-protocol`.
    #[serde(alias = "peer-protocol")]
    Peer,
}

impl Channel {
    /// All known channels.
    pub const ALL: [Channel; 4] = [
        Channel::Telegram,
        Channel::Slack,
        Channel::Discord,
        Channel::Peer,
    ];

    /// Stable lowercase name used in conversation keys and storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Slack => "slack",
            Channel::Discord => "discord",
            Channel::Peer => "peer",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "telegram" => Ok(Channel::Telegram),
            "slack" => Ok(Channel::Slack),
            "discord" => Ok(Channel::Discord),
            "peer" | "peer-protocol" => Ok(Channel::Peer),
            other => Err(format!("invalid channel: '{other}'")),
        }
    }
}

/// Whether a message is coming into the agent or going out to a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("invalid direction: '{other}'")),
        }
    }
}

/// The closed set of topics the bus accepts.
///
/// Each topic has exactly one payload schema and at most one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    ProactiveShare,
    DmCheckin,
    DmReply,
    ChatMessage,
}

impl Topic {
    /// Every registered topic.
    pub const ALL: [Topic; 4] = [
        Topic::ProactiveShare,
        Topic::DmCheckin,
        Topic::DmReply,
        Topic::ChatMessage,
    ];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ProactiveShare => "proactive-share",
            Topic::DmCheckin => "dm-checkin",
            Topic::DmReply => "dm-reply",
            Topic::ChatMessage => "chat-message",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    /// Exact match only: topic names are case-sensitive wire identifiers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| format!("unknown topic: '{s}'"))
    }
}

/// Channel-specific metadata carried alongside a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageExtensions {
    /// Platform-native message id (Telegram `message_id`, Slack `ts`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
    /// Platform-native id of the message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Agent session id. Must be a UUIDv7 when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Slack workspace id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Telegram chat id / Slack channel id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_users: Vec<String>,
}

/// A unit of work in flight on the bus.
///
/// `topic` is kept as the raw wire string so that unknown topics can be
/// rejected with a precise error instead of failing deserialization. The
/// payload is opaque JSON bytes whose schema is bound to the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Optional diagnostic id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub topic: String,
    /// Partitioning key; messages sharing it are delivered in order.
    pub conversation_key: String,
    /// Identifies a remote party (user, peer bot).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_key: Option<String>,
    /// Identity of the logical send, used for dedup and retries.
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extensions: MessageExtensions,
}

impl BusMessage {
    /// Build a message with the required fields; everything else is empty.
    pub fn new(
        topic: impl Into<String>,
        conversation_key: impl Into<String>,
        idempotency_key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            direction: None,
            channel: None,
            topic: topic.into(),
            conversation_key: conversation_key.into(),
            participant_key: None,
            idempotency_key: idempotency_key.into(),
            correlation_id: None,
            causation_id: None,
            payload,
            created_at: Utc::now(),
            extensions: MessageExtensions::default(),
        }
    }

    /// Build a message whose payload is the JSON encoding of `payload`.
    pub fn with_json<T: Serialize>(
        topic: Topic,
        conversation_key: impl Into<String>,
        idempotency_key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(topic.as_str(), conversation_key, idempotency_key, bytes))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_participant(mut self, participant_key: impl Into<String>) -> Self {
        self.participant_key = Some(participant_key.into());
        self
    }

    pub fn with_extensions(mut self, extensions: MessageExtensions) -> Self {
        self.extensions = extensions;
        self
    }
}

/// Where in the delivery pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStage {
    /// The dispatcher could not hand the message to its conversation worker.
    Dispatch,
    /// The topic handler returned an error or panicked.
    Handler,
}

impl fmt::Display for DeliveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStage::Dispatch => write!(f, "dispatch"),
            DeliveryStage::Handler => write!(f, "handler"),
        }
    }
}

/// An asynchronous, non-retried failure of an admitted message.
///
/// Consumed by operators; the bus never re-queues the message itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryError {
    pub message: BusMessage,
    pub error: String,
    pub stage: DeliveryStage,
    pub occurred_at: DateTime<Utc>,
}

impl DeliveryError {
    pub fn new(message: BusMessage, stage: DeliveryStage, error: impl Into<String>) -> Self {
        Self {
            message,
            error: error.into(),
            stage,
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure on topic '{}' (conversation '{}'): {}",
            self.stage, self.message.topic, self.message.conversation_key, self.error
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_wire_names_are_exact() {
        assert_eq!("chat-message".parse::<Topic>().unwrap(), Topic::ChatMessage);
        assert_eq!("dm-checkin".parse::<Topic>().unwrap(), Topic::DmCheckin);
        assert!("Chat-Message".parse::<Topic>().is_err());
        assert!("chat_message".parse::<Topic>().is_err());
    }

    #[test]
    fn test_topic_serde_matches_as_str() {
        for topic in Topic::ALL {
            let json = serde_json::to_string(&topic).unwrap();
            assert_eq!(json, format!("\"{}\"", topic.as_str()));
        }
    }

    #[test]
    fn test_channel_accepts_peer_protocol_alias() {
        let channel: Channel = serde_json::from_str("\"peer-protocol\"").unwrap();
        assert_eq!(channel, Channel::Peer);
        assert_eq!(serde_json::to_string(&channel).unwrap(), "\"peer\"");
    }

    #[test]
    fn test_channel_from_str_is_case_insensitive() {
        assert_eq!("Telegram".parse::<Channel>().unwrap(), Channel::Telegram);
        assert_eq!("peer".parse::<Channel>().unwrap(), Channel::Peer);
        assert_eq!("Peer-Protocol".parse::<Channel>().unwrap(), Channel::Peer);
        let err = "matrix".parse::<Channel>().unwrap_err();
        assert!(err.contains("matrix"));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.to_string(), "outbound");
    }

    #[test]
    fn test_with_json_encodes_payload() {
        let msg = BusMessage::with_json(
            Topic::ProactiveShare,
            "slack:channel:C1",
            "share-1",
            &json!({"text": "look at this"}),
        )
        .unwrap()
        .with_channel(Channel::Slack)
        .with_direction(Direction::Outbound);

        assert_eq!(msg.topic, "proactive-share");
        assert_eq!(msg.channel, Some(Channel::Slack));
        let decoded: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(decoded["text"], "look at this");
    }

    #[test]
    fn test_bus_message_omits_empty_optionals() {
        let msg = BusMessage::new("chat-message", "conv:a", "a1", b"{}".to_vec());
        let json_str = serde_json::to_string(&msg).unwrap();
        assert!(!json_str.contains("participant_key"));
        assert!(!json_str.contains("mentioned_users"));

        let parsed: BusMessage = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_delivery_error_display() {
        let msg = BusMessage::new("dm-reply", "slack:dm:D1", "r1", Vec::new());
        let err = DeliveryError::new(msg, DeliveryStage::Handler, "boom");
        let text = err.to_string();
        assert!(text.starts_with("handler failure"));
        assert!(text.contains("dm-reply"));
        assert!(text.contains("boom"));
    }
}
