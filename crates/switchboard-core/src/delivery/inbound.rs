//! Inbound deduplication.
//!
//! Chat platforms redeliver webhook events (retries, reconnect replays). The
//! `InboundDedup` flow publishes each `(channel, platform_message_id)` at most
//! once per successful inbox write: the inbox record is written only after the
//! bus accepted the message, so a crash between the two yields a duplicate
//! rather than a loss.

use chrono::Utc;
use switchboard_types::bus::{BusMessage, Channel, Direction};
use switchboard_types::delivery::BusInboxRecord;
use switchboard_types::error::RepositoryError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::{BusError, MessagePublisher};
use crate::repository::BusStore;

/// Errors from [`InboundDedup::publish_validated_inbound`].
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("platform message id is empty")]
    EmptyPlatformMessageId,

    #[error("channel mismatch: flow handles '{expected}', message is for '{actual}'")]
    ChannelMismatch { expected: Channel, actual: Channel },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("inbox store error: {0}")]
    Store(#[from] RepositoryError),
}

impl InboundError {
    /// Stable error code; bus errors keep their own code.
    pub fn code(&self) -> &'static str {
        match self {
            InboundError::EmptyPlatformMessageId | InboundError::ChannelMismatch { .. } => {
                "INVALID_MESSAGE"
            }
            InboundError::Bus(e) => e.code(),
            InboundError::Store(_) => "STORE_ERROR",
        }
    }
}

/// Deduplicating publisher for one channel's inbound events.
pub struct InboundDedup<P, S> {
    channel: Channel,
    publisher: P,
    store: S,
}

impl<P: MessagePublisher, S: BusStore> InboundDedup<P, S> {
    pub fn new(channel: Channel, publisher: P, store: S) -> Self {
        Self {
            channel,
            publisher,
            store,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Publish `message` unless this platform event was already delivered.
    ///
    /// Returns `Ok(true)` when the message was published and recorded,
    /// `Ok(false)` when an inbox record already existed. An unset
    /// `channel`/`direction` is stamped from the flow, and an unset
    /// `extensions.platform_message_id` is filled with the dedup id.
    ///
    /// A store failure after a successful publish is returned as
    /// [`InboundError::Store`]; the message has been delivered and a retry
    /// will publish it again.
    pub async fn publish_validated_inbound(
        &self,
        cancel: &CancellationToken,
        platform_message_id: &str,
        mut message: BusMessage,
    ) -> Result<bool, InboundError> {
        if platform_message_id.trim().is_empty() {
            return Err(InboundError::EmptyPlatformMessageId);
        }
        match message.channel {
            Some(actual) if actual != self.channel => {
                return Err(InboundError::ChannelMismatch {
                    expected: self.channel,
                    actual,
                });
            }
            Some(_) => {}
            None => message.channel = Some(self.channel),
        }

        if self
            .store
            .get_bus_inbox_record(self.channel, platform_message_id)
            .await?
            .is_some()
        {
            debug!(
                channel = %self.channel,
                platform_message_id,
                "inbound event already delivered, skipping"
            );
            return Ok(false);
        }

        message.direction.get_or_insert(Direction::Inbound);
        message
            .extensions
            .platform_message_id
            .get_or_insert_with(|| platform_message_id.to_string());
        let conversation_key = message.conversation_key.clone();

        self.publisher.publish(cancel, message).await?;

        let record = BusInboxRecord {
            channel: self.channel,
            platform_message_id: platform_message_id.to_string(),
            conversation_key,
            seen_at: Utc::now(),
        };
        self.store.put_bus_inbox_record(&record).await?;

        debug!(
            channel = %self.channel,
            platform_message_id,
            conversation_key = %record.conversation_key,
            "inbound event published"
        );
        Ok(true)
    }
}
