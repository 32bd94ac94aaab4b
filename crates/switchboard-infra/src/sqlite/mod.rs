//! SQLite storage layer.
//!
//! Store implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod bus;
pub mod pool;

pub use bus::SqliteBusStore;
pub use pool::DatabasePool;
