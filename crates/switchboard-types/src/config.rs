//! Bus configuration types for Switchboard.
//!
//! `BusConfig` represents `switchboard.toml`, which controls the admission
//! budget, queue sizes, and the default store location.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Switchboard bus.
///
/// Loaded from `{data_dir}/switchboard.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum number of admitted messages not yet handled (the admission budget).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Capacity of the delivery error queue. Errors beyond this are dropped.
    #[serde(default = "default_error_buffer")]
    pub error_buffer: usize,

    /// Capacity of the publisher -> dispatcher queue. `0` means `max_in_flight`.
    #[serde(default)]
    pub ingress_buffer: usize,

    /// SQLite URL for the inbox/outbox store. Falls back to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_max_in_flight() -> usize {
    64
}

fn default_error_buffer() -> usize {
    256
}

impl BusConfig {
    /// The effective ingress queue capacity.
    pub fn ingress_capacity(&self) -> usize {
        if self.ingress_buffer == 0 {
            self.max_in_flight.max(1)
        } else {
            self.ingress_buffer
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            error_buffer: default_error_buffer(),
            ingress_buffer: 0,
            database_url: None,
        }
    }
}
