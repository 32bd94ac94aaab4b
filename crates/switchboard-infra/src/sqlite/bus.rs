//! SQLite bus store implementation.
//!
//! Implements `BusStore` from `switchboard-core` using sqlx with split
//! read/write pools. Both tables are keyed by composite primary keys and
//! written with `INSERT ... ON CONFLICT DO UPDATE` upserts.

use chrono::{DateTime, Utc};
use sqlx::Row;
use switchboard_core::repository::BusStore;
use switchboard_types::bus::Channel;
use switchboard_types::delivery::{BusInboxRecord, BusOutboxRecord, OutboxStatus};
use switchboard_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `BusStore`.
pub struct SqliteBusStore {
    pool: DatabasePool,
}

impl SqliteBusStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Count outbox rows per status, for operator summaries.
    pub async fn count_outbox_by_status(
        &self,
    ) -> Result<Vec<(OutboxStatus, i64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM bus_outbox GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let n: i64 = row
                .try_get("n")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            counts.push((parse_status(&status)?, n));
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct InboxRow {
    channel: String,
    platform_message_id: String,
    conversation_key: String,
    seen_at: String,
}

impl InboxRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            channel: row.try_get("channel")?,
            platform_message_id: row.try_get("platform_message_id")?,
            conversation_key: row.try_get("conversation_key")?,
            seen_at: row.try_get("seen_at")?,
        })
    }

    fn into_record(self) -> Result<BusInboxRecord, RepositoryError> {
        Ok(BusInboxRecord {
            channel: parse_channel(&self.channel)?,
            platform_message_id: self.platform_message_id,
            conversation_key: self.conversation_key,
            seen_at: parse_datetime(&self.seen_at)?,
        })
    }
}

struct OutboxRow {
    channel: String,
    idempotency_key: String,
    status: String,
    attempts: i64,
    contact_id: Option<String>,
    peer_id: Option<String>,
    item_id: Option<String>,
    content_type: Option<String>,
    payload: Vec<u8>,
    accepted: bool,
    deduped: bool,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
    last_attempt_at: Option<String>,
    sent_at: Option<String>,
}

impl OutboxRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            channel: row.try_get("channel")?,
            idempotency_key: row.try_get("idempotency_key")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            contact_id: row.try_get("contact_id")?,
            peer_id: row.try_get("peer_id")?,
            item_id: row.try_get("item_id")?,
            content_type: row.try_get("content_type")?,
            payload: row.try_get("payload")?,
            accepted: row.try_get("accepted")?,
            deduped: row.try_get("deduped")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            sent_at: row.try_get("sent_at")?,
        })
    }

    fn into_record(self) -> Result<BusOutboxRecord, RepositoryError> {
        let attempts = u32::try_from(self.attempts)
            .map_err(|_| RepositoryError::Query(format!("invalid attempts: {}", self.attempts)))?;
        Ok(BusOutboxRecord {
            channel: parse_channel(&self.channel)?,
            idempotency_key: self.idempotency_key,
            status: parse_status(&self.status)?,
            attempts,
            contact_id: self.contact_id,
            peer_id: self.peer_id,
            item_id: self.item_id,
            content_type: self.content_type,
            payload: self.payload,
            accepted: self.accepted,
            deduped: self.deduped,
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            last_attempt_at: self.last_attempt_at.as_deref().map(parse_datetime).transpose()?,
            sent_at: self.sent_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_channel(s: &str) -> Result<Channel, RepositoryError> {
    s.parse::<Channel>()
        .map_err(|_| RepositoryError::Query(format!("invalid channel: '{s}'")))
}

fn parse_status(s: &str) -> Result<OutboxStatus, RepositoryError> {
    s.parse::<OutboxStatus>().map_err(RepositoryError::Query)
}

// ---------------------------------------------------------------------------
// BusStore implementation
// ---------------------------------------------------------------------------

impl BusStore for SqliteBusStore {
    async fn get_bus_inbox_record(
        &self,
        channel: Channel,
        platform_message_id: &str,
    ) -> Result<Option<BusInboxRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM bus_inbox WHERE channel = ? AND platform_message_id = ?",
        )
        .bind(channel.as_str())
        .bind(platform_message_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let inbox = InboxRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(inbox.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn put_bus_inbox_record(&self, record: &BusInboxRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO bus_inbox (channel, platform_message_id, conversation_key, seen_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (channel, platform_message_id) DO UPDATE SET
                   conversation_key = excluded.conversation_key,
                   seen_at = excluded.seen_at"#,
        )
        .bind(record.channel.as_str())
        .bind(&record.platform_message_id)
        .bind(&record.conversation_key)
        .bind(format_datetime(&record.seen_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_bus_outbox_record(
        &self,
        channel: Channel,
        idempotency_key: &str,
    ) -> Result<Option<BusOutboxRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM bus_outbox WHERE channel = ? AND idempotency_key = ?")
            .bind(channel.as_str())
            .bind(idempotency_key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let outbox = OutboxRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(outbox.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn put_bus_outbox_record(&self, record: &BusOutboxRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO bus_outbox (
                   channel, idempotency_key, status, attempts,
                   contact_id, peer_id, item_id, content_type, payload,
                   accepted, deduped, last_error,
                   created_at, updated_at, last_attempt_at, sent_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (channel, idempotency_key) DO UPDATE SET
                   status = excluded.status,
                   attempts = excluded.attempts,
                   contact_id = excluded.contact_id,
                   peer_id = excluded.peer_id,
                   item_id = excluded.item_id,
                   content_type = excluded.content_type,
                   payload = excluded.payload,
                   accepted = excluded.accepted,
                   deduped = excluded.deduped,
                   last_error = excluded.last_error,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   last_attempt_at = excluded.last_attempt_at,
                   sent_at = excluded.sent_at"#,
        )
        .bind(record.channel.as_str())
        .bind(&record.idempotency_key)
        .bind(record.status.to_string())
        .bind(i64::from(record.attempts))
        .bind(&record.contact_id)
        .bind(&record.peer_id)
        .bind(&record.item_id)
        .bind(&record.content_type)
        .bind(&record.payload)
        .bind(record.accepted)
        .bind(record.deduped)
        .bind(&record.last_error)
        .bind(format_datetime(&record.created_at))
        .bind(format_datetime(&record.updated_at))
        .bind(record.last_attempt_at.as_ref().map(format_datetime))
        .bind(record.sent_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}
