//! Conversation-partitioned pub/sub message bus.
//!
//! This module provides the runtime messaging infrastructure shared by every
//! channel adapter:
//! - `topic` -- the closed topic registry and per-topic payload decoding
//! - `validate` -- field-level invariants for `BusMessage`
//! - `conversation` -- deterministic `channel:scope:id` partition keys
//! - `handler` -- `MessageHandler` trait and its object-safe wrapper
//! - `bus` -- `Bus` with admission control and ordered per-conversation delivery
//! - `router` -- `Router` facade binding handle + publish

pub mod bus;
pub mod conversation;
pub mod handler;
pub mod router;
pub mod topic;
pub mod validate;

pub use bus::{Bus, BusError, BusStats, MessagePublisher};
pub use conversation::{Scope, build_conversation_key};
pub use handler::{MessageHandler, handler_fn};
pub use router::Router;
pub use validate::{ValidationError, validate};
