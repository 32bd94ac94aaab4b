//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (switchboard-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod bus_store;

pub use bus_store::BusStore;
