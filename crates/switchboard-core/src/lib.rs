//! Message bus engine and idempotent delivery layer for Switchboard.
//!
//! This crate defines the bus itself plus the "ports" (store traits) that the
//! infrastructure layer implements. It depends only on `switchboard-types` --
//! never on `switchboard-infra` or any database/IO crate.

pub mod delivery;
pub mod message;
pub mod repository;
