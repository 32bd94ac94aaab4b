//! Conversation key construction.
//!
//! A conversation key (`channel:scope:id`) is the bus's partitioning key: all
//! messages sharing a key are delivered in order by one worker. Keys must be
//! deterministic, so the builders are pure and reject ambiguous input.

use std::fmt;
use std::str::FromStr;

use switchboard_types::bus::Channel;
use thiserror::Error;

/// What kind of conversation the raw id identifies on its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A group or private chat (Telegram chat id).
    Chat,
    /// A shared channel (Slack/Discord channel id).
    Channel,
    /// A direct-message channel.
    Dm,
    /// A thread inside a channel.
    Thread,
    /// A peer bot.
    Peer,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Chat => "chat",
            Scope::Channel => "channel",
            Scope::Dm => "dm",
            Scope::Thread => "thread",
            Scope::Peer => "peer",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Scope::Chat),
            "channel" => Ok(Scope::Channel),
            "dm" => Ok(Scope::Dm),
            "thread" => Ok(Scope::Thread),
            "peer" => Ok(Scope::Peer),
            other => Err(KeyError::InvalidScope(other.to_string())),
        }
    }
}

/// Errors from building or parsing a conversation key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid channel: '{0}'")]
    InvalidChannel(String),

    #[error("invalid scope: '{0}'")]
    InvalidScope(String),

    #[error("conversation id is empty")]
    EmptyId,

    #[error("conversation id '{0}' contains whitespace")]
    WhitespaceInId(String),

    #[error("malformed conversation key: '{0}'")]
    Malformed(String),
}

/// Build `channel:scope:id`.
///
/// The id must be non-empty and contain no whitespace. Colons inside the id
/// are allowed (Slack thread timestamps, compound ids) because the channel
/// and scope segments never contain one.
pub fn build_conversation_key(
    channel: Channel,
    scope: Scope,
    id: &str,
) -> Result<String, KeyError> {
    if id.is_empty() {
        return Err(KeyError::EmptyId);
    }
    if id.chars().any(char::is_whitespace) {
        return Err(KeyError::WhitespaceInId(id.to_string()));
    }
    Ok(format!("{}:{}:{}", channel.as_str(), scope.as_str(), id))
}

/// Build a key from unparsed channel and scope names (CLI and config input).
pub fn build_conversation_key_from_parts(
    channel: &str,
    scope: &str,
    id: &str,
) -> Result<String, KeyError> {
    let channel = channel
        .parse::<Channel>()
        .map_err(|_| KeyError::InvalidChannel(channel.to_string()))?;
    let scope = scope.parse::<Scope>()?;
    build_conversation_key(channel, scope, id)
}

/// Key for a chat on `channel` (`telegram:chat:<id>`).
pub fn chat_key(channel: Channel, chat_id: &str) -> Result<String, KeyError> {
    build_conversation_key(channel, Scope::Chat, chat_id)
}

/// Key for a direct-message channel (`slack:dm:<id>`).
pub fn dm_channel_key(channel: Channel, dm_channel_id: &str) -> Result<String, KeyError> {
    build_conversation_key(channel, Scope::Dm, dm_channel_id)
}

/// Key for a peer-protocol conversation (`peer:peer:<id>`).
pub fn peer_key(peer_id: &str) -> Result<String, KeyError> {
    build_conversation_key(Channel::Peer, Scope::Peer, peer_id)
}

/// Split a key produced by [`build_conversation_key`] back into its parts.
pub fn parse_conversation_key(key: &str) -> Result<(Channel, Scope, String), KeyError> {
    let mut parts = key.splitn(3, ':');
    let (Some(channel), Some(scope), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(KeyError::Malformed(key.to_string()));
    };
    let channel = channel
        .parse::<Channel>()
        .map_err(|_| KeyError::InvalidChannel(channel.to_string()))?;
    let scope = scope.parse::<Scope>()?;
    // Re-run the builder so parse accepts exactly what build produces.
    build_conversation_key(channel, scope, id)?;
    Ok((channel, scope, id.to_string()))
}
