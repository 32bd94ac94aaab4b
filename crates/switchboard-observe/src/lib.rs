//! Observability for Switchboard: subscriber setup and stable span field names.

pub mod bus_attrs;
pub mod tracing_setup;
