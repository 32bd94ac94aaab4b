//! Topic handler trait and its object-safe wrapper.
//!
//! Follows the same blanket-impl pattern used for other pluggable async
//! components:
//! 1. `MessageHandler` uses native async fn in traits (RPITIT)
//! 2. `MessageHandlerDyn` is an object-safe twin with boxed futures
//! 3. A blanket impl makes every `MessageHandler` a `MessageHandlerDyn`
//!
//! The bus stores handlers as `Arc<dyn MessageHandlerDyn>` so one table can
//! hold handlers of different concrete types.

use std::future::Future;
use std::pin::Pin;

use switchboard_types::bus::BusMessage;

/// Consumer of one topic.
///
/// Invoked once per delivered message, inside that message's conversation
/// worker: the next message of the same conversation is not delivered until
/// this call returns. Returning an error reports a delivery error; the bus
/// does not retry.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &BusMessage) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Object-safe version of [`MessageHandler`] with boxed futures.
pub trait MessageHandlerDyn: Send + Sync {
    fn handle_boxed<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any `MessageHandler` automatically implements `MessageHandlerDyn`.
impl<T: MessageHandler> MessageHandlerDyn for T {
    fn handle_boxed<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self.handle(message))
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
///
/// The closure receives an owned clone of the message so its future can be
/// `'static`.
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, message: &BusMessage) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.f)(message.clone())
    }
}

/// Wrap an async closure as a handler.
///
/// ```no_run
/// use switchboard_core::message::handler_fn;
///
/// let handler = handler_fn(|msg| async move {
///     println!("got {}", msg.idempotency_key);
///     anyhow::Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler { f }
}
