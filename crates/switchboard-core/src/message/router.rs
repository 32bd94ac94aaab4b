//! Thin routing facade over [`Bus`].
//!
//! Channel adapters and agents hold a `Router` rather than the bus itself:
//! it exposes only topic registration and publishing, and shares one bus
//! between any number of clones.

use std::future::Future;
use std::sync::Arc;

use switchboard_types::bus::BusMessage;
use tokio_util::sync::CancellationToken;

use super::bus::{Bus, BusError, MessagePublisher};
use super::handler::MessageHandler;

/// Registers topic handlers and publishes messages on a shared bus.
#[derive(Debug, Clone)]
pub struct Router {
    bus: Arc<Bus>,
}

impl Router {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }

    /// Register `handler` for `topic`. Same rules as [`Bus::subscribe`].
    pub fn handle<H: MessageHandler>(&self, topic: &str, handler: H) -> Result<(), BusError> {
        self.bus.subscribe(topic, handler)
    }

    /// Publish through the underlying bus. Same rules as [`Bus::publish`].
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> Result<(), BusError> {
        self.bus.publish(cancel, message).await
    }

    /// The bus this router forwards to.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }
}

impl MessagePublisher for Router {
    fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        Router::publish(self, cancel, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::handler::handler_fn;
    use serde_json::json;
    use std::sync::Mutex;
    use switchboard_types::bus::Topic;

    fn checkin(key: &str, idem: &str) -> BusMessage {
        BusMessage::with_json(
            Topic::DmCheckin,
            key,
            idem,
            &json!({ "text": "any progress on the deploy?" }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn handle_then_publish_reaches_handler() {
        let bus = Arc::new(Bus::new(4).unwrap());
        let router = Router::new(Arc::clone(&bus));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_handler = Arc::clone(&seen);
        router
            .handle(
                "dm-checkin",
                handler_fn(move |msg| {
                    let seen = Arc::clone(&seen_in_handler);
                    async move {
                        seen.lock().unwrap().push(msg.conversation_key.clone());
                        anyhow::Ok(())
                    }
                }),
            )
            .unwrap();

        router
            .publish(&CancellationToken::new(), checkin("slack:dm:D1", "ci-1"))
            .await
            .unwrap();
        bus.close().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["slack:dm:D1"]);
    }

    #[tokio::test]
    async fn clones_share_one_bus() {
        let bus = Arc::new(Bus::new(1).unwrap());
        let first = Router::new(Arc::clone(&bus));
        let second = first.clone();
        first
            .handle("dm-checkin", handler_fn(|_msg| async { anyhow::Ok(()) }))
            .unwrap();

        let err = second
            .handle("dm-checkin", handler_fn(|_msg| async { anyhow::Ok(()) }))
            .unwrap_err();
        assert_eq!(err.code(), "TOPIC_ALREADY_HANDLED");
        assert!(Arc::ptr_eq(first.bus(), second.bus()));
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn publish_errors_pass_through() {
        let bus = Arc::new(Bus::new(1).unwrap());
        let router = Router::new(Arc::clone(&bus));
        let err = router
            .publish(&CancellationToken::new(), checkin("slack:dm:D1", "ci-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_SUBSCRIBER");
    }
}
