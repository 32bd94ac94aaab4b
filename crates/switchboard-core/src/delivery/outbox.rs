//! Outbound delivery state machine.
//!
//! Every outbound send is tracked by one `BusOutboxRecord` keyed by
//! `(channel, idempotency_key)`:
//!
//! ```text
//!   (none) --start_attempt--> pending --mark_sent----> sent
//!                                ^    \
//!                                |     mark_failed
//!                          start_attempt  \
//!                                |         v
//!                                +------ failed
//! ```
//!
//! `apply_transition` is pure: it computes the next record from the current
//! one. `OutboxDelivery` wraps it with a load-apply-persist cycle against a
//! [`BusStore`].

use std::future::Future;

use chrono::{DateTime, Utc};
use switchboard_types::bus::Channel;
use switchboard_types::delivery::{BusOutboxRecord, OutboxDraft, OutboxStatus};
use switchboard_types::error::RepositoryError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::repository::BusStore;

/// One of the three legal moves of the outbox state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxTransition {
    /// Begin (or retry) a send: none/failed -> pending.
    StartAttempt,
    /// The platform acknowledged the send: pending -> sent.
    MarkSent { accepted: bool, deduped: bool },
    /// The send failed: pending -> failed.
    MarkFailed { error_text: String },
}

impl OutboxTransition {
    pub fn name(&self) -> &'static str {
        match self {
            OutboxTransition::StartAttempt => "start_attempt",
            OutboxTransition::MarkSent { .. } => "mark_sent",
            OutboxTransition::MarkFailed { .. } => "mark_failed",
        }
    }
}

/// Errors from outbox transitions.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("illegal outbox transition: {transition} from {from}")]
    IllegalTransition {
        from: String,
        transition: &'static str,
    },

    #[error("mark_failed requires a non-empty error text")]
    MissingErrorText,

    #[error("outbox idempotency key is empty")]
    MissingIdempotencyKey,

    #[error("outbox record identity mismatch: expected {expected}, found {actual}")]
    IdentityMismatch { expected: String, actual: String },

    #[error("outbox store error: {0}")]
    Store(#[from] RepositoryError),
}

/// Compute the record that results from applying `transition`.
///
/// `current` is the stored record (or `None` before the first attempt);
/// `draft` supplies the identity and the descriptive fields copied in on
/// `start_attempt`. `updated_at` is always set to `now`.
pub fn apply_transition(
    current: Option<&BusOutboxRecord>,
    draft: &OutboxDraft,
    transition: &OutboxTransition,
    now: DateTime<Utc>,
) -> Result<BusOutboxRecord, OutboxError> {
    if draft.idempotency_key.trim().is_empty() {
        return Err(OutboxError::MissingIdempotencyKey);
    }
    if let Some(record) = current {
        if record.channel != draft.channel || record.idempotency_key != draft.idempotency_key {
            return Err(OutboxError::IdentityMismatch {
                expected: identity(draft.channel, &draft.idempotency_key),
                actual: identity(record.channel, &record.idempotency_key),
            });
        }
    }

    let illegal = || OutboxError::IllegalTransition {
        from: current.map_or_else(|| "none".to_string(), |r| r.status.to_string()),
        transition: transition.name(),
    };

    match transition {
        OutboxTransition::StartAttempt => match current {
            None => Ok(BusOutboxRecord {
                channel: draft.channel,
                idempotency_key: draft.idempotency_key.clone(),
                status: OutboxStatus::Pending,
                attempts: 1,
                contact_id: draft.contact_id.clone(),
                peer_id: draft.peer_id.clone(),
                item_id: draft.item_id.clone(),
                content_type: draft.content_type.clone(),
                payload: draft.payload.clone(),
                accepted: false,
                deduped: false,
                last_error: None,
                created_at: now,
                updated_at: now,
                last_attempt_at: Some(now),
                sent_at: None,
            }),
            Some(record) if record.status == OutboxStatus::Failed => Ok(BusOutboxRecord {
                status: OutboxStatus::Pending,
                attempts: record.attempts.saturating_add(1),
                contact_id: draft.contact_id.clone(),
                peer_id: draft.peer_id.clone(),
                item_id: draft.item_id.clone(),
                content_type: draft.content_type.clone(),
                payload: draft.payload.clone(),
                accepted: false,
                deduped: false,
                last_error: None,
                updated_at: now,
                last_attempt_at: Some(now),
                sent_at: None,
                ..record.clone()
            }),
            Some(_) => Err(illegal()),
        },
        OutboxTransition::MarkSent { accepted, deduped } => match current {
            Some(record) if record.status == OutboxStatus::Pending => Ok(BusOutboxRecord {
                status: OutboxStatus::Sent,
                accepted: *accepted,
                deduped: *deduped,
                last_error: None,
                updated_at: now,
                sent_at: Some(now),
                ..record.clone()
            }),
            _ => Err(illegal()),
        },
        OutboxTransition::MarkFailed { error_text } => {
            if error_text.trim().is_empty() {
                return Err(OutboxError::MissingErrorText);
            }
            match current {
                Some(record) if record.status == OutboxStatus::Pending => Ok(BusOutboxRecord {
                    status: OutboxStatus::Failed,
                    accepted: false,
                    deduped: false,
                    last_error: Some(error_text.clone()),
                    updated_at: now,
                    sent_at: None,
                    ..record.clone()
                }),
                _ => Err(illegal()),
            }
        }
    }
}

fn identity(channel: Channel, idempotency_key: &str) -> String {
    format!("({channel}, {idempotency_key})")
}

/// What the platform said about a successful send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub accepted: bool,
    pub deduped: bool,
}

/// Persisted outbox state machine.
pub struct OutboxDelivery<S> {
    store: S,
}

impl<S: BusStore> OutboxDelivery<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The stored record for a send, if any attempt was started.
    pub async fn record(
        &self,
        channel: Channel,
        idempotency_key: &str,
    ) -> Result<Option<BusOutboxRecord>, OutboxError> {
        Ok(self
            .store
            .get_bus_outbox_record(channel, idempotency_key)
            .await?)
    }

    /// Load, transition, and persist. Returns the stored record.
    pub async fn transition(
        &self,
        draft: &OutboxDraft,
        transition: OutboxTransition,
    ) -> Result<BusOutboxRecord, OutboxError> {
        let current = self
            .store
            .get_bus_outbox_record(draft.channel, &draft.idempotency_key)
            .await?;
        let next = apply_transition(current.as_ref(), draft, &transition, Utc::now())?;
        self.store.put_bus_outbox_record(&next).await?;

        debug!(
            channel = %next.channel,
            idempotency_key = %next.idempotency_key,
            transition = transition.name(),
            status = %next.status,
            attempts = next.attempts,
            "outbox transition applied"
        );
        Ok(next)
    }

    pub async fn start_attempt(&self, draft: &OutboxDraft) -> Result<BusOutboxRecord, OutboxError> {
        self.transition(draft, OutboxTransition::StartAttempt).await
    }

    pub async fn mark_sent(
        &self,
        draft: &OutboxDraft,
        accepted: bool,
        deduped: bool,
    ) -> Result<BusOutboxRecord, OutboxError> {
        self.transition(draft, OutboxTransition::MarkSent { accepted, deduped })
            .await
    }

    pub async fn mark_failed(
        &self,
        draft: &OutboxDraft,
        error_text: impl Into<String>,
    ) -> Result<BusOutboxRecord, OutboxError> {
        self.transition(
            draft,
            OutboxTransition::MarkFailed {
                error_text: error_text.into(),
            },
        )
        .await
    }

    /// Run one send through the state machine.
    ///
    /// A send already recorded as `sent` is not repeated; its record is
    /// returned as is. Otherwise `start_attempt` runs, then `send`, then
    /// `mark_sent` or `mark_failed` with the error chain as text. A failed
    /// send is not an `Err`: the returned record has status `failed`.
    ///
    /// A record left `pending` by an interrupted earlier call makes
    /// `start_attempt` fail with `IllegalTransition`; mark it failed first.
    pub async fn deliver<F, Fut>(
        &self,
        draft: &OutboxDraft,
        send: F,
    ) -> Result<BusOutboxRecord, OutboxError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<SendReceipt>>,
    {
        if let Some(existing) = self
            .store
            .get_bus_outbox_record(draft.channel, &draft.idempotency_key)
            .await?
        {
            if existing.status == OutboxStatus::Sent {
                debug!(
                    channel = %existing.channel,
                    idempotency_key = %existing.idempotency_key,
                    "outbound send already completed, skipping"
                );
                return Ok(existing);
            }
        }

        self.start_attempt(draft).await?;
        match send().await {
            Ok(receipt) => self.mark_sent(draft, receipt.accepted, receipt.deduped).await,
            Err(e) => {
                let mut text = format!("{e:#}");
                if text.trim().is_empty() {
                    text = "send failed".to_string();
                }
                warn!(
                    channel = %draft.channel,
                    idempotency_key = %draft.idempotency_key,
                    error = %text,
                    "outbound send failed"
                );
                self.mark_failed(draft, text).await
            }
        }
    }
}
