//! Conversation-partitioned message bus with global admission control.
//!
//! The `Bus` delivers each published message to the single handler registered
//! for its topic. Delivery is partitioned by `conversation_key`: every key gets
//! its own worker task that handles messages strictly in FIFO order, while
//! different keys run concurrently. A shared semaphore of `max_in_flight`
//! permits bounds the number of admitted-but-unhandled messages across all
//! conversations; `publish` suspends when the budget is exhausted.
//!
//! ```text
//! publish ──acquire permit──> ingress (mpsc) ──> dispatcher ──> worker[key] ──> handler
//!                                                         └──> worker[key'] ──> handler
//! ```
//!
//! The permit travels with the message and is released as soon as the handler
//! returns (or when the message is abandoned before being queued).

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use switchboard_types::bus::{BusMessage, DeliveryError, DeliveryStage, Topic};
use switchboard_types::config::BusConfig;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::{MessageHandler, MessageHandlerDyn};
use super::topic::validate_topic;
use super::validate::{ValidationError, validate};

/// Default capacity of the delivery error queue.
pub const DEFAULT_ERROR_BUFFER: usize = 256;

/// Errors returned synchronously by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been closed; no further subscribe or publish is accepted.
    #[error("bus is closed")]
    Closed,

    /// No handler is registered for the topic.
    #[error("no subscriber for topic '{0}'")]
    NoSubscriber(String),

    /// The topic already has its one handler.
    #[error("topic '{0}' already has a handler")]
    TopicAlreadyHandled(String),

    /// The message or topic failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The bus was constructed with an unusable configuration.
    #[error("invalid bus configuration: {0}")]
    InvalidConfig(String),

    /// The caller cancelled the publish before the message was queued.
    #[error("publish cancelled before the message was queued")]
    Cancelled,

    /// A bus task failed during shutdown.
    #[error("bus task failed: {0}")]
    Internal(String),
}

impl BusError {
    /// Stable error code for callers that branch on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BusError::Closed => "BUS_CLOSED",
            BusError::NoSubscriber(_) => "NO_SUBSCRIBER",
            BusError::TopicAlreadyHandled(_) => "TOPIC_ALREADY_HANDLED",
            BusError::Invalid(inner) => inner.code(),
            BusError::InvalidConfig(_) => "INVALID_CONFIG",
            BusError::Cancelled => "CANCELLED",
            BusError::Internal(_) => "INTERNAL",
        }
    }
}

/// Anything that can put a message on the bus.
///
/// Implemented by [`Bus`] and [`super::Router`]; the inbound dedup flow is
/// generic over it so tests can substitute a recording publisher.
pub trait MessagePublisher: Send + Sync {
    /// Admit and queue `message`, returning once it is queued (not delivered).
    fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

impl<P: MessagePublisher> MessagePublisher for Arc<P> {
    fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        (**self).publish(cancel, message)
    }
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Admitted messages whose handler has not returned yet.
    pub in_flight: usize,
    /// Permits currently free.
    pub available_permits: usize,
    /// Conversation workers started so far.
    pub workers: usize,
    pub subscribed_topics: usize,
    /// Messages successfully queued by `publish`.
    pub published: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Messages reported on the error queue.
    pub failed: u64,
    /// Delivery errors dropped because the error queue was full.
    pub dropped_errors: u64,
}

/// A message that holds one unit of the admission budget.
struct Admitted {
    message: BusMessage,
    topic: Topic,
    permit: OwnedSemaphorePermit,
}

/// Mutable bus state, guarded by a single lock.
struct BusState {
    handlers: HashMap<Topic, Arc<dyn MessageHandlerDyn>>,
    closed: bool,
    ingress: Option<mpsc::Sender<Admitted>>,
    errors: Option<mpsc::Sender<DeliveryError>>,
}

/// State shared between the bus handle and its background tasks.
struct Shared {
    state: Mutex<BusState>,
    admission: Arc<Semaphore>,
    shutdown: CancellationToken,
    workers: AtomicUsize,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped_errors: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Handlers never run under this lock, so a poisoned guard still holds
        // consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, topic: Topic) -> Option<Arc<dyn MessageHandlerDyn>> {
        self.lock().handlers.get(&topic).cloned()
    }

    /// Push a delivery error without ever blocking the caller.
    fn report(&self, errors: &mpsc::Sender<DeliveryError>, error: DeliveryError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            topic = %error.message.topic,
            conversation_key = %error.message.conversation_key,
            idempotency_key = %error.message.idempotency_key,
            stage = %error.stage,
            error = %error.error,
            "message delivery failed"
        );
        match errors.try_send(error) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.dropped_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    idempotency_key = %dropped.message.idempotency_key,
                    "delivery error queue full, dropping error report"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("delivery error queue has no consumer");
            }
        }
    }
}

/// In-process pub/sub bus with ordered per-conversation delivery.
///
/// Must be created inside a Tokio runtime: construction spawns the
/// dispatcher task. Multiple buses are fully independent.
pub struct Bus {
    shared: Arc<Shared>,
    max_in_flight: usize,
    errors_rx: Mutex<Option<mpsc::Receiver<DeliveryError>>>,
    /// Held across the shutdown wait so concurrent `close` calls serialize.
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Create a bus with `max_in_flight` admission permits.
    ///
    /// Fails with `INVALID_CONFIG` when `max_in_flight` is zero or when called
    /// outside a Tokio runtime.
    pub fn new(max_in_flight: usize) -> Result<Self, BusError> {
        Self::from_config(&BusConfig {
            max_in_flight,
            error_buffer: DEFAULT_ERROR_BUFFER,
            ..BusConfig::default()
        })
    }

    /// Create a bus from a loaded [`BusConfig`].
    pub fn from_config(config: &BusConfig) -> Result<Self, BusError> {
        if config.max_in_flight == 0 {
            return Err(BusError::InvalidConfig(
                "max_in_flight must be greater than zero".to_string(),
            ));
        }
        if config.error_buffer == 0 {
            return Err(BusError::InvalidConfig(
                "error_buffer must be greater than zero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::InvalidConfig(format!("no tokio runtime: {e}")))?;

        let (ingress_tx, ingress_rx) = mpsc::channel(config.ingress_capacity());
        let (errors_tx, errors_rx) = mpsc::channel(config.error_buffer);

        let shared = Arc::new(Shared {
            state: Mutex::new(BusState {
                handlers: HashMap::new(),
                closed: false,
                ingress: Some(ingress_tx),
                errors: Some(errors_tx.clone()),
            }),
            admission: Arc::new(Semaphore::new(config.max_in_flight)),
            shutdown: CancellationToken::new(),
            workers: AtomicUsize::new(0),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped_errors: AtomicU64::new(0),
        });

        let dispatcher = runtime.spawn(run_dispatcher(ingress_rx, Arc::clone(&shared), errors_tx));

        debug!(max_in_flight = config.max_in_flight, "message bus started");

        Ok(Self {
            shared,
            max_in_flight: config.max_in_flight,
            errors_rx: Mutex::new(Some(errors_rx)),
            dispatcher: tokio::sync::Mutex::new(Some(dispatcher)),
        })
    }

    /// Register the single handler for `topic`.
    ///
    /// Fails with `INVALID_TOPIC` for unknown topics, `BUS_CLOSED` after
    /// `close`, and `TOPIC_ALREADY_HANDLED` if the topic already has a handler.
    pub fn subscribe<H: MessageHandler>(&self, topic: &str, handler: H) -> Result<(), BusError> {
        let topic = validate_topic(topic)?;

        let mut state = self.shared.lock();
        if state.closed {
            return Err(BusError::Closed);
        }
        if state.handlers.contains_key(&topic) {
            return Err(BusError::TopicAlreadyHandled(topic.to_string()));
        }
        state.handlers.insert(topic, Arc::new(handler));
        debug!(%topic, "handler subscribed");
        Ok(())
    }

    /// Whether `topic` currently has a handler.
    pub fn has_subscriber(&self, topic: Topic) -> bool {
        self.shared.lock().handlers.contains_key(&topic)
    }

    /// Validate, admit, and queue `message` for delivery.
    ///
    /// Returns once the message is queued for its conversation, not once it is
    /// handled. Suspends while the admission budget is exhausted; the wait
    /// ends early with `CANCELLED` when `cancel` fires or `BUS_CLOSED` when the
    /// bus shuts down. Dropping the returned future has the same effect as
    /// cancelling: any permit already acquired is released.
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> Result<(), BusError> {
        let topic = validate(&message)?;

        let ingress = {
            let state = self.shared.lock();
            if state.closed {
                return Err(BusError::Closed);
            }
            if !state.handlers.contains_key(&topic) {
                return Err(BusError::NoSubscriber(topic.to_string()));
            }
            state.ingress.clone().ok_or(BusError::Closed)?
        };

        let shutdown = &self.shared.shutdown;
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(BusError::Closed),
            _ = cancel.cancelled() => return Err(BusError::Cancelled),
            permit = Arc::clone(&self.shared.admission).acquire_owned() => {
                permit.map_err(|_| BusError::Closed)?
            }
        };

        let conversation_key = message.conversation_key.clone();
        let admitted = Admitted {
            message,
            topic,
            permit,
        };

        // On every early return below `admitted` is dropped with its permit.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(BusError::Closed),
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            sent = ingress.send(admitted) => {
                sent.map_err(|_| BusError::Closed)?;
                self.shared.published.fetch_add(1, Ordering::Relaxed);
                debug!(%topic, %conversation_key, "message queued");
                Ok(())
            }
        }
    }

    /// Take the delivery error stream.
    ///
    /// The stream has a single consumer: the first call returns it, later
    /// calls return `None`. It ends after `close` has drained every worker.
    pub fn errors(&self) -> Option<mpsc::Receiver<DeliveryError>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// The admission budget this bus was built with.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Snapshot the bus counters.
    pub fn stats(&self) -> BusStats {
        let available_permits = self.shared.admission.available_permits();
        BusStats {
            in_flight: self.max_in_flight.saturating_sub(available_permits),
            available_permits,
            workers: self.shared.workers.load(Ordering::Relaxed),
            subscribed_topics: self.shared.lock().handlers.len(),
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped_errors: self.shared.dropped_errors.load(Ordering::Relaxed),
        }
    }

    /// Shut the bus down and wait until every queued message is handled.
    ///
    /// Idempotent: later calls wait for the first to finish and return `Ok`.
    /// Publishers blocked on admission or hand-off fail with `BUS_CLOSED`.
    /// Messages already queued are still delivered before this returns; the
    /// error stream ends afterwards.
    pub async fn close(&self) -> Result<(), BusError> {
        let mut dispatcher = self.dispatcher.lock().await;

        let (ingress, errors) = {
            let mut state = self.shared.lock();
            state.closed = true;
            (state.ingress.take(), state.errors.take())
        };
        self.shared.shutdown.cancel();
        // Dropping the last ingress sender lets the dispatcher drain and exit.
        drop(ingress);

        let result = match dispatcher.take() {
            Some(handle) => handle
                .await
                .map_err(|e| BusError::Internal(format!("dispatcher task failed: {e}"))),
            None => Ok(()),
        };
        drop(errors);

        if result.is_ok() {
            let stats = self.stats();
            info!(
                published = stats.published,
                delivered = stats.delivered,
                failed = stats.failed,
                "message bus closed"
            );
        }
        result
    }
}

impl MessagePublisher for Bus {
    fn publish(
        &self,
        cancel: &CancellationToken,
        message: BusMessage,
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        Bus::publish(self, cancel, message)
    }
}

impl Drop for Bus {
    /// Begin shutdown without waiting. Background tasks drain what is already
    /// queued and exit; use [`Bus::close`] to wait for that.
    fn drop(&mut self) {
        let (ingress, errors) = {
            let mut state = self.shared.lock();
            state.closed = true;
            (state.ingress.take(), state.errors.take())
        };
        self.shared.shutdown.cancel();
        drop(ingress);
        drop(errors);
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Bus")
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &stats.in_flight)
            .field("workers", &stats.workers)
            .field("subscribed_topics", &stats.subscribed_topics)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Route admitted messages to their conversation workers.
///
/// Exits when every ingress sender is gone (bus closed or dropped). Dropping
/// the worker table closes each worker's queue; the workers drain what they
/// already hold and are awaited before the dispatcher returns.
async fn run_dispatcher(
    mut ingress: mpsc::Receiver<Admitted>,
    shared: Arc<Shared>,
    errors: mpsc::Sender<DeliveryError>,
) {
    let mut workers: HashMap<String, mpsc::UnboundedSender<Admitted>> = HashMap::new();
    let mut tasks = JoinSet::new();

    while let Some(admitted) = ingress.recv().await {
        let key = admitted.message.conversation_key.clone();
        let queue = workers.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.spawn(run_worker(
                key.clone(),
                rx,
                Arc::clone(&shared),
                errors.clone(),
            ));
            shared.workers.fetch_add(1, Ordering::Relaxed);
            debug!(conversation_key = %key, "conversation worker started");
            tx
        });

        if let Err(mpsc::error::SendError(rejected)) = queue.send(admitted) {
            workers.remove(&key);
            let Admitted {
                message, permit, ..
            } = rejected;
            drop(permit);
            shared.report(
                &errors,
                DeliveryError::new(
                    message,
                    DeliveryStage::Dispatch,
                    "conversation worker is not running",
                ),
            );
        }
    }

    debug!(workers = workers.len(), "dispatcher draining conversation workers");
    drop(workers);
    while let Some(result) = tasks.join_next().await {
        log_worker_join_result(result);
    }
}

/// Deliver one conversation's messages in order.
async fn run_worker(
    conversation_key: String,
    mut queue: mpsc::UnboundedReceiver<Admitted>,
    shared: Arc<Shared>,
    errors: mpsc::Sender<DeliveryError>,
) {
    while let Some(Admitted {
        message,
        topic,
        permit,
    }) = queue.recv().await
    {
        let outcome = match shared.handler(topic) {
            Some(handler) => match AssertUnwindSafe(async { handler.handle_boxed(&message).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
            },
            None => Err(format!("no handler registered for topic '{topic}'")),
        };
        drop(permit);

        match outcome {
            Ok(()) => {
                shared.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                shared.report(
                    &errors,
                    DeliveryError::new(message, DeliveryStage::Handler, error),
                );
            }
        }
    }
    debug!(%conversation_key, "conversation worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_worker_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "conversation worker task failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::handler::handler_fn;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(5);

    fn chat(conversation_key: &str, id: &str) -> BusMessage {
        let payload = json!({
            "message_id": id,
            "text": format!("message {id}"),
            "sent_at": "2026-03-01T10:00:00Z",
            "session_id": Uuid::now_v7(),
        });
        BusMessage::with_json(Topic::ChatMessage, conversation_key, id, &payload)
            .unwrap()
            .with_id(id)
    }

    /// Handler that records every idempotency key it sees, in order.
    fn recording(log: Arc<Mutex<Vec<String>>>) -> impl MessageHandler {
        handler_fn(move |msg| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(msg.idempotency_key.clone());
                anyhow::Ok(())
            }
        })
    }

    /// Handler that parks until `gate` is notified, counting entries.
    fn gated(gate: Arc<Notify>, entered: Arc<AtomicUsize>) -> impl MessageHandler {
        handler_fn(move |_msg| {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            async move {
                entered.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                anyhow::Ok(())
            }
        })
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn zero_max_in_flight_rejected() {
        let err = Bus::new(0).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn construction_outside_runtime_rejected() {
        let err = Bus::new(4).unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn delivers_to_subscribed_handler() {
        let bus = Bus::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("chat-message", recording(Arc::clone(&log)))
            .unwrap();

        let cancel = CancellationToken::new();
        bus.publish(&cancel, chat("telegram:chat:1", "m1"))
            .await
            .unwrap();
        bus.close().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["m1".to_string()]);
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn second_subscribe_is_topic_already_handled() {
        let bus = Bus::new(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("dm-reply", recording(Arc::clone(&log)))
            .unwrap();

        let err = bus
            .subscribe("dm-reply", recording(Arc::clone(&log)))
            .unwrap_err();
        assert!(matches!(err, BusError::TopicAlreadyHandled(ref t) if t == "dm-reply"));
        assert_eq!(err.code(), "TOPIC_ALREADY_HANDLED");
        assert!(bus.has_subscriber(Topic::DmReply));
    }

    #[tokio::test]
    async fn subscribe_unknown_topic_is_invalid_topic() {
        let bus = Bus::new(1).unwrap();
        let err = bus
            .subscribe("weather", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TOPIC");
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_no_subscriber() {
        let bus = Bus::new(1).unwrap();
        let err = bus
            .publish(&CancellationToken::new(), chat("conv:a", "a1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoSubscriber(ref t) if t == "chat-message"));
        assert_eq!(bus.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn invalid_message_does_not_consume_budget() {
        let bus = Bus::new(1).unwrap();
        bus.subscribe("chat-message", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap();

        let mut msg = chat("conv:a", "a1");
        msg.idempotency_key = String::new();
        let err = bus
            .publish(&CancellationToken::new(), msg)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_MESSAGE");
        assert_eq!(bus.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn same_conversation_delivered_in_order_across_interleaving() {
        let bus = Bus::new(8).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_in_handler = Arc::clone(&log);
        // Earlier messages sleep longer, so any reordering would show up.
        bus.subscribe(
            "chat-message",
            handler_fn(move |msg| {
                let log = Arc::clone(&log_in_handler);
                async move {
                    let delay = match msg.idempotency_key.as_str() {
                        "a1" | "b1" => 30,
                        "a2" | "b2" => 15,
                        _ => 0,
                    };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().unwrap().push(msg.idempotency_key.clone());
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        for (key, id) in [
            ("conv:a", "a1"),
            ("conv:b", "b1"),
            ("conv:a", "a2"),
            ("conv:b", "b2"),
            ("conv:a", "a3"),
            ("conv:b", "b3"),
        ] {
            bus.publish(&cancel, chat(key, id)).await.unwrap();
        }
        bus.close().await.unwrap();

        let seen = log.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        let a: Vec<_> = seen.iter().filter(|id| id.starts_with('a')).cloned().collect();
        let b: Vec<_> = seen.iter().filter(|id| id.starts_with('b')).cloned().collect();
        assert_eq!(a, vec!["a1", "a2", "a3"]);
        assert_eq!(b, vec!["b1", "b2", "b3"]);
        assert_eq!(bus.stats().workers, 2);
    }

    #[tokio::test]
    async fn distinct_conversations_run_concurrently_up_to_budget() {
        let bus = Bus::new(2).unwrap();
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(AtomicUsize::new(0));
        bus.subscribe("chat-message", gated(Arc::clone(&gate), Arc::clone(&entered)))
            .unwrap();

        let cancel = CancellationToken::new();
        bus.publish(&cancel, chat("conv:a", "a1")).await.unwrap();
        bus.publish(&cancel, chat("conv:b", "b1")).await.unwrap();

        // Both handlers are parked at the same time.
        wait_until(|| entered.load(Ordering::SeqCst) == 2).await;
        assert_eq!(bus.stats().in_flight, 2);

        // Budget exhausted: the next publish suspends.
        let blocked = timeout(
            Duration::from_millis(50),
            bus.publish(&cancel, chat("conv:c", "c1")),
        )
        .await;
        assert!(blocked.is_err(), "publish should wait for a free permit");

        // Free one slot; the suspended publish can now proceed.
        gate.notify_one();
        timeout(WAIT, bus.publish(&cancel, chat("conv:c", "c1")))
            .await
            .expect("publish should be admitted after a handler returns")
            .unwrap();

        gate.notify_waiters();
        wait_until(|| entered.load(Ordering::SeqCst) == 3).await;
        gate.notify_waiters();
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_publish_is_never_delivered() {
        let bus = Bus::new(1).unwrap();
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(AtomicUsize::new(0));
        bus.subscribe("chat-message", gated(Arc::clone(&gate), Arc::clone(&entered)))
            .unwrap();

        let never = CancellationToken::new();
        bus.publish(&never, chat("conv:a", "first")).await.unwrap();
        wait_until(|| entered.load(Ordering::SeqCst) == 1).await;

        let deadline = CancellationToken::new();
        let trigger = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = bus
            .publish(&deadline, chat("conv:a", "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Cancelled));
        assert_eq!(err.code(), "CANCELLED");

        gate.notify_one();
        bus.close().await.unwrap();

        assert_eq!(entered.load(Ordering::SeqCst), 1);
        let stats = bus.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.available_permits, 1);
    }

    #[tokio::test]
    async fn dropped_publish_future_releases_permit() {
        let bus = Bus::new(1).unwrap();
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(AtomicUsize::new(0));
        bus.subscribe("chat-message", gated(Arc::clone(&gate), Arc::clone(&entered)))
            .unwrap();

        let cancel = CancellationToken::new();
        bus.publish(&cancel, chat("conv:a", "a1")).await.unwrap();
        wait_until(|| entered.load(Ordering::SeqCst) == 1).await;

        let timed_out = timeout(
            Duration::from_millis(100),
            bus.publish(&cancel, chat("conv:a", "a2")),
        )
        .await;
        assert!(timed_out.is_err());

        gate.notify_one();
        wait_until(|| bus.stats().available_permits == 1).await;
        bus.close().await.unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_reported_and_conversation_continues() {
        let bus = Bus::new(4).unwrap();
        let mut errors = bus.errors().expect("error stream");
        assert!(bus.errors().is_none(), "error stream has a single consumer");

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_in_handler = Arc::clone(&log);
        bus.subscribe(
            "chat-message",
            handler_fn(move |msg| {
                let log = Arc::clone(&log_in_handler);
                async move {
                    if msg.idempotency_key == "bad" {
                        anyhow::bail!("telegram returned 400");
                    }
                    log.lock().unwrap().push(msg.idempotency_key.clone());
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        for id in ["ok-1", "bad", "ok-2"] {
            bus.publish(&cancel, chat("conv:a", id)).await.unwrap();
        }
        bus.close().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["ok-1", "ok-2"]);

        let report = errors.recv().await.expect("one delivery error");
        assert_eq!(report.message.idempotency_key, "bad");
        assert_eq!(report.stage, DeliveryStage::Handler);
        assert!(report.error.contains("telegram returned 400"));
        assert!(errors.recv().await.is_none(), "stream ends after close");
        assert_eq!(bus.stats().failed, 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_reported() {
        let bus = Bus::new(2).unwrap();
        let mut errors = bus.errors().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_in_handler = Arc::clone(&log);
        bus.subscribe(
            "chat-message",
            handler_fn(move |msg| {
                let log = Arc::clone(&log_in_handler);
                async move {
                    if msg.idempotency_key == "boom" {
                        panic!("handler exploded");
                    }
                    log.lock().unwrap().push(msg.idempotency_key.clone());
                    anyhow::Ok(())
                }
            }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        bus.publish(&cancel, chat("conv:a", "boom")).await.unwrap();
        bus.publish(&cancel, chat("conv:a", "after")).await.unwrap();
        bus.close().await.unwrap();

        let report = errors.recv().await.unwrap();
        assert!(report.error.contains("handler exploded"));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn full_error_queue_drops_reports_without_blocking() {
        let bus = Bus::from_config(&BusConfig {
            max_in_flight: 4,
            error_buffer: 1,
            ..BusConfig::default()
        })
        .unwrap();
        let _errors = bus.errors().unwrap();
        bus.subscribe(
            "chat-message",
            handler_fn(|_msg| async { Err::<(), _>(anyhow::anyhow!("always fails")) }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        for id in ["x1", "x2", "x3"] {
            bus.publish(&cancel, chat("conv:x", id)).await.unwrap();
        }
        bus.close().await.unwrap();

        let stats = bus.stats();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.dropped_errors, 2);
    }

    #[tokio::test]
    async fn publish_after_close_is_bus_closed() {
        let bus = Bus::new(2).unwrap();
        bus.subscribe("chat-message", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap();
        bus.close().await.unwrap();

        let err = bus
            .publish(&CancellationToken::new(), chat("conv:a", "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
        assert_eq!(err.code(), "BUS_CLOSED");
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn subscribe_after_close_is_bus_closed() {
        let bus = Bus::new(2).unwrap();
        bus.close().await.unwrap();
        let err = bus
            .subscribe("dm-checkin", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let bus = Bus::new(2).unwrap();
        bus.close().await.unwrap();
        bus.close().await.unwrap();
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_unblocks_waiting_publisher() {
        let bus = Arc::new(Bus::new(1).unwrap());
        let gate = Arc::new(Notify::new());
        let entered = Arc::new(AtomicUsize::new(0));
        bus.subscribe("chat-message", gated(Arc::clone(&gate), Arc::clone(&entered)))
            .unwrap();

        let cancel = CancellationToken::new();
        bus.publish(&cancel, chat("conv:a", "holder")).await.unwrap();
        wait_until(|| entered.load(Ordering::SeqCst) == 1).await;

        let waiting_bus = Arc::clone(&bus);
        let waiter = tokio::spawn(async move {
            waiting_bus
                .publish(&CancellationToken::new(), chat("conv:b", "waiter"))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closer_bus = Arc::clone(&bus);
        let closer = tokio::spawn(async move { closer_bus.close().await });

        let result = timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(result, Err(BusError::Closed)));

        // Close waits for the parked handler to finish.
        gate.notify_one();
        timeout(WAIT, closer).await.unwrap().unwrap().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn buses_are_independent() {
        let first = Bus::new(1).unwrap();
        let second = Bus::new(1).unwrap();
        first
            .subscribe("dm-checkin", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap();
        second
            .subscribe("dm-checkin", recording(Arc::new(Mutex::new(Vec::new()))))
            .unwrap();
        first.close().await.unwrap();
        assert!(!second.is_closed());
        second.close().await.unwrap();
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(BusError::Closed.code(), "BUS_CLOSED");
        assert_eq!(BusError::NoSubscriber("x".into()).code(), "NO_SUBSCRIBER");
        assert_eq!(
            BusError::Invalid(ValidationError::InvalidTopic("x".into())).code(),
            "INVALID_TOPIC"
        );
    }

    #[tokio::test]
    async fn debug_impl() {
        let bus = Bus::new(3).unwrap();
        let debug = format!("{bus:?}");
        assert!(debug.contains("Bus"));
        assert!(debug.contains("max_in_flight"));
    }
}
