//! Shared domain types for Switchboard.
//!
//! This crate contains the types that flow across the message bus and the
//! idempotent delivery layer: `BusMessage`, topic payload schemas, inbox and
//! outbox records, configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod bus;
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod error;
