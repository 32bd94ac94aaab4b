//! Infrastructure layer for Switchboard.
//!
//! Contains implementations of the store port defined in `switchboard-core`
//! (SQLite and in-memory) plus the `switchboard.toml` loader.

pub mod config;
pub mod memory;
pub mod sqlite;
