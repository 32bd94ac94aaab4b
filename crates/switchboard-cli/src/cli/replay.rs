//! `swbd replay`: push recorded inbound events through the dedup flow.
//!
//! Input is JSON lines, one inbound event per line:
//!
//! ```text
//! {"platform_message_id":"1001","topic":"chat-message","conversation_key":"telegram:chat:42",
//!  "idempotency_key":"tg-42-1001","payload":{"message_id":"1001","text":"hi", ...}}
//! ```
//!
//! Every topic gets a logging handler, so a replay exercises validation,
//! dedup, admission, and ordered delivery end to end.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use console::style;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use switchboard_core::delivery::InboundDedup;
use switchboard_core::message::validate::validate_and_decode;
use switchboard_core::message::{Bus, MessageHandler};
use switchboard_core::repository::BusStore;
use switchboard_infra::memory::InMemoryBusStore;
use switchboard_observe::bus_attrs::{
    BUS_CHANNEL, BUS_CONVERSATION_KEY, BUS_DELIVERY_STAGE, BUS_IDEMPOTENCY_KEY, BUS_MAX_IN_FLIGHT,
    BUS_PLATFORM_MESSAGE_ID, BUS_TOPIC, OP_HANDLE, OP_REPLAY,
};
use switchboard_types::bus::{BusMessage, Channel, MessageExtensions, Topic};
use switchboard_types::config::BusConfig;

use crate::state::AppState;

/// One recorded inbound event.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundLine {
    pub platform_message_id: String,
    pub topic: String,
    pub conversation_key: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub participant_key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub extensions: MessageExtensions,
}

impl InboundLine {
    fn into_message(self) -> Result<(String, BusMessage)> {
        let payload = serde_json::to_vec(&self.payload)?;
        let mut message = BusMessage::new(
            self.topic,
            self.conversation_key,
            self.idempotency_key,
            payload,
        )
        .with_extensions(self.extensions);
        message.id = self.id;
        message.participant_key = self.participant_key;
        message.correlation_id = self.correlation_id;
        Ok((self.platform_message_id, message))
    }
}

/// Outcome counts of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub lines: u64,
    pub published: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub malformed: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: bool,
}

/// Handler that logs each delivered message and counts it.
struct LoggingHandler {
    topic: Topic,
    handled: Arc<AtomicU64>,
}

impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &BusMessage) -> anyhow::Result<()> {
        let span = info_span!(
            "handle",
            { BUS_TOPIC } = %self.topic,
            { BUS_CONVERSATION_KEY } = %message.conversation_key
        );
        async {
            let (_, payload) = validate_and_decode(message)?;
            info!(
                op = OP_HANDLE,
                { BUS_IDEMPOTENCY_KEY } = %message.idempotency_key,
                text = payload.text(),
                "message delivered"
            );
            self.handled.fetch_add(1, Ordering::Relaxed);
            anyhow::Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Replay `reader` through a fresh bus and `store`.
pub async fn replay_lines<R, S>(
    reader: R,
    channel: Channel,
    config: &BusConfig,
    store: S,
    cancel: &CancellationToken,
) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    S: BusStore,
{
    let bus = Arc::new(Bus::from_config(config)?);
    let handled = Arc::new(AtomicU64::new(0));
    for topic in Topic::ALL {
        bus.subscribe(
            topic.as_str(),
            LoggingHandler {
                topic,
                handled: Arc::clone(&handled),
            },
        )?;
    }

    let mut errors = bus.errors().context("delivery error stream already taken")?;
    let collector = tokio::spawn(async move {
        let mut failed = 0u64;
        while let Some(error) = errors.recv().await {
            warn!(
                { BUS_DELIVERY_STAGE } = %error.stage,
                { BUS_TOPIC } = %error.message.topic,
                { BUS_IDEMPOTENCY_KEY } = %error.message.idempotency_key,
                error = %error.error,
                "delivery failed"
            );
            failed += 1;
        }
        failed
    });

    let flow = InboundDedup::new(channel, Arc::clone(&bus), store);
    let mut summary = ReplaySummary::default();
    let mut lines = reader.lines();

    let span = info_span!(
        "replay",
        { BUS_CHANNEL } = %channel,
        { BUS_MAX_IN_FLIGHT } = config.max_in_flight
    );
    let outcome = async {
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            summary.lines += 1;

            let parsed = serde_json::from_str::<InboundLine>(&line)
                .map_err(anyhow::Error::from)
                .and_then(InboundLine::into_message);
            let (platform_message_id, message) = match parsed {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(line = summary.lines, error = %e, "skipping malformed line");
                    summary.malformed += 1;
                    continue;
                }
            };

            match flow
                .publish_validated_inbound(cancel, &platform_message_id, message)
                .await
            {
                Ok(true) => summary.published += 1,
                Ok(false) => summary.duplicates += 1,
                Err(e) => {
                    warn!(
                        { BUS_PLATFORM_MESSAGE_ID } = %platform_message_id,
                        code = e.code(),
                        error = %e,
                        "inbound event rejected"
                    );
                    if e.code() == "CANCELLED" {
                        summary.cancelled = true;
                        break;
                    }
                    summary.rejected += 1;
                }
            }
        }
        anyhow::Ok(())
    }
    .instrument(span)
    .await;

    // Drain what was admitted even when reading the input failed.
    bus.close().await?;
    summary.failed = collector.await?;
    outcome?;
    summary.delivered = handled.load(Ordering::Relaxed);
    info!(op = OP_REPLAY, ?summary, "replay finished");
    Ok(summary)
}

/// Entry point for `swbd replay`.
pub async fn replay(
    state: &AppState,
    channel: &str,
    file: Option<&Path>,
    memory: bool,
    json: bool,
) -> Result<()> {
    let channel: Channel = channel.parse().map_err(anyhow::Error::msg)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let summary = if memory {
        replay_lines(reader, channel, &state.config, InMemoryBusStore::new(), &cancel).await?
    } else {
        let store = state.open_store().await?;
        let pool = store.pool().clone();
        let summary = replay_lines(reader, channel, &state.config, store, &cancel).await?;
        pool.close().await;
        summary
    };

    print_summary(&summary, channel, json)
}

fn print_summary(summary: &ReplaySummary, channel: Channel, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Replayed {} line(s) on {}",
        style("▶").bold(),
        style(summary.lines).bold(),
        style(channel).cyan()
    );
    println!();
    println!("  Published:  {}", style(summary.published).green());
    println!("  Duplicates: {}", style(summary.duplicates).dim());
    println!("  Delivered:  {}", style(summary.delivered).green());
    if summary.rejected > 0 {
        println!("  Rejected:   {}", style(summary.rejected).yellow());
    }
    if summary.malformed > 0 {
        println!("  Malformed:  {}", style(summary.malformed).yellow());
    }
    if summary.failed > 0 {
        println!("  Failed:     {}", style(summary.failed).red());
    }
    if summary.cancelled {
        println!("  {}", style("Interrupted before end of input").yellow());
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn chat_line(platform_id: &str, conv: &str) -> String {
        json!({
            "platform_message_id": platform_id,
            "topic": "chat-message",
            "conversation_key": conv,
            "idempotency_key": format!("tg-{platform_id}"),
            "payload": {
                "message_id": platform_id,
                "text": "hello from telegram",
                "sent_at": "2026-03-01T10:00:00Z",
                "session_id": Uuid::now_v7(),
            },
        })
        .to_string()
    }

    fn small_config() -> BusConfig {
        BusConfig {
            max_in_flight: 2,
            ..BusConfig::default()
        }
    }

    #[tokio::test]
    async fn replays_and_dedups() {
        let input = [
            chat_line("1", "telegram:chat:42"),
            chat_line("2", "telegram:chat:43"),
            chat_line("1", "telegram:chat:42"),
            String::new(),
            json!({
                "platform_message_id": "3",
                "topic": "dm-checkin",
                "conversation_key": "telegram:chat:42",
                "idempotency_key": "checkin-3",
                "payload": { "text": "how did the demo go?" },
            })
            .to_string(),
        ]
        .join("\n");

        let summary = replay_lines(
            input.as_bytes(),
            Channel::Telegram,
            &small_config(),
            InMemoryBusStore::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.lines, 4);
        assert_eq!(summary.published, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.failed, 0);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn bad_lines_are_counted_not_fatal() {
        let input = [
            "not json".to_string(),
            json!({
                "platform_message_id": "9",
                "topic": "weather",
                "conversation_key": "telegram:chat:1",
                "idempotency_key": "w-9",
                "payload": { "text": "sunny" },
            })
            .to_string(),
            chat_line("10", "telegram:chat:1"),
        ]
        .join("\n");

        let summary = replay_lines(
            input.as_bytes(),
            Channel::Telegram,
            &small_config(),
            InMemoryBusStore::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.published, 1);
    }

    #[tokio::test]
    async fn cancelled_replay_stops_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = chat_line("1", "telegram:chat:42");

        let summary = replay_lines(
            input.as_bytes(),
            Channel::Telegram,
            &small_config(),
            InMemoryBusStore::new(),
            &cancel,
        )
        .await
        .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.published, 0);
    }

    #[tokio::test]
    async fn sqlite_store_dedups_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("bus.db").display());
        let input = chat_line("500", "telegram:chat:7");

        for expected_published in [1, 0] {
            let pool = switchboard_infra::sqlite::DatabasePool::new(&url).await.unwrap();
            let summary = replay_lines(
                input.as_bytes(),
                Channel::Telegram,
                &small_config(),
                switchboard_infra::sqlite::SqliteBusStore::new(pool.clone()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
            pool.close().await;
            assert_eq!(summary.published, expected_published);
        }
    }
}
