//! Inbox/outbox store trait definition.

use std::future::Future;
use std::sync::Arc;

use switchboard_types::bus::Channel;
use switchboard_types::delivery::{BusInboxRecord, BusOutboxRecord};
use switchboard_types::error::RepositoryError;

/// Persistence for the idempotent delivery layer.
///
/// Implementations live in switchboard-infra (`SqliteBusStore`,
/// `InMemoryBusStore`). Puts are upserts keyed by the record identity:
/// `(channel, platform_message_id)` for the inbox and
/// `(channel, idempotency_key)` for the outbox. Implementations must be safe
/// to call concurrently.
pub trait BusStore: Send + Sync {
    /// Look up the inbox record for an upstream event.
    fn get_bus_inbox_record(
        &self,
        channel: Channel,
        platform_message_id: &str,
    ) -> impl Future<Output = Result<Option<BusInboxRecord>, RepositoryError>> + Send;

    /// Insert or replace an inbox record.
    fn put_bus_inbox_record(
        &self,
        record: &BusInboxRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Look up the outbox record for a logical send.
    fn get_bus_outbox_record(
        &self,
        channel: Channel,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<Option<BusOutboxRecord>, RepositoryError>> + Send;

    /// Insert or replace an outbox record.
    fn put_bus_outbox_record(
        &self,
        record: &BusOutboxRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

impl<S: BusStore> BusStore for Arc<S> {
    fn get_bus_inbox_record(
        &self,
        channel: Channel,
        platform_message_id: &str,
    ) -> impl Future<Output = Result<Option<BusInboxRecord>, RepositoryError>> + Send {
        (**self).get_bus_inbox_record(channel, platform_message_id)
    }

    fn put_bus_inbox_record(
        &self,
        record: &BusInboxRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).put_bus_inbox_record(record)
    }

    fn get_bus_outbox_record(
        &self,
        channel: Channel,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<Option<BusOutboxRecord>, RepositoryError>> + Send {
        (**self).get_bus_outbox_record(channel, idempotency_key)
    }

    fn put_bus_outbox_record(
        &self,
        record: &BusOutboxRecord,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).put_bus_outbox_record(record)
    }
}
