//! Idempotent delivery on top of the bus.
//!
//! - `inbound` -- dedups upstream events by `(channel, platform_message_id)`
//!   before publishing them
//! - `outbox` -- the `pending`/`sent`/`failed` state machine for outbound sends
//!
//! Both are generic over the [`BusStore`](crate::repository::BusStore) port.

pub mod inbound;
pub mod outbox;

pub use inbound::{InboundDedup, InboundError};
pub use outbox::{OutboxDelivery, OutboxError, OutboxTransition, SendReceipt, apply_transition};
