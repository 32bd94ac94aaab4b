//! In-memory bus store.
//!
//! Backed by two `DashMap`s; suitable for tests and single-process
//! deployments where dedup state may be lost on restart.

use dashmap::DashMap;
use switchboard_core::repository::BusStore;
use switchboard_types::bus::Channel;
use switchboard_types::delivery::{BusInboxRecord, BusOutboxRecord};
use switchboard_types::error::RepositoryError;

/// Non-persistent `BusStore`.
#[derive(Debug, Default)]
pub struct InMemoryBusStore {
    inbox: DashMap<(Channel, String), BusInboxRecord>,
    outbox: DashMap<(Channel, String), BusOutboxRecord>,
}

impl InMemoryBusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

impl BusStore for InMemoryBusStore {
    async fn get_bus_inbox_record(
        &self,
        channel: Channel,
        platform_message_id: &str,
    ) -> Result<Option<BusInboxRecord>, RepositoryError> {
        Ok(self
            .inbox
            .get(&(channel, platform_message_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put_bus_inbox_record(&self, record: &BusInboxRecord) -> Result<(), RepositoryError> {
        self.inbox.insert(
            (record.channel, record.platform_message_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn get_bus_outbox_record(
        &self,
        channel: Channel,
        idempotency_key: &str,
    ) -> Result<Option<BusOutboxRecord>, RepositoryError> {
        Ok(self
            .outbox
            .get(&(channel, idempotency_key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put_bus_outbox_record(&self, record: &BusOutboxRecord) -> Result<(), RepositoryError> {
        self.outbox.insert(
            (record.channel, record.idempotency_key.clone()),
            record.clone(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use switchboard_core::delivery::OutboxDelivery;
    use switchboard_types::delivery::{OutboxDraft, OutboxStatus};

    #[tokio::test]
    async fn inbox_is_keyed_by_channel_and_platform_id() {
        let store = InMemoryBusStore::new();
        store
            .put_bus_inbox_record(&BusInboxRecord {
                channel: Channel::Telegram,
                platform_message_id: "501".to_string(),
                conversation_key: "telegram:chat:42".to_string(),
                seen_at: Utc::now(),
            })
            .await
            .unwrap();

        assert!(
            store
                .get_bus_inbox_record(Channel::Telegram, "501")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .get_bus_inbox_record(Channel::Discord, "501")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.inbox_len(), 1);
    }

    #[tokio::test]
    async fn outbox_upsert_replaces_record() {
        let outbox = OutboxDelivery::new(InMemoryBusStore::new());
        let draft = OutboxDraft::new(Channel::Telegram, "reply-42-7");

        outbox.start_attempt(&draft).await.unwrap();
        outbox.mark_failed(&draft, "429 Too Many Requests").await.unwrap();

        let stored = outbox
            .record(Channel::Telegram, "reply-42-7")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(outbox.store().outbox_len(), 1);
    }
}
