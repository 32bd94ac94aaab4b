//! Bus configuration loader.
//!
//! Reads `switchboard.toml` from the data directory and deserializes it into
//! [`BusConfig`]. Falls back to defaults when the file is missing or
//! malformed, so a bad edit never keeps the bus from starting.

use std::path::Path;

use switchboard_types::config::BusConfig;

use crate::sqlite::pool::database_url_for;

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "switchboard.toml";

/// Load bus configuration from `{data_dir}/switchboard.toml`.
///
/// - Missing file: [`BusConfig::default()`].
/// - Unreadable or unparsable file: a warning is logged and the default returned.
/// - A zero `max_in_flight` or `error_buffer` is replaced by its default.
pub async fn load_bus_config(data_dir: &Path) -> BusConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return BusConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return BusConfig::default();
        }
    };

    let mut config = match toml::from_str::<BusConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            return BusConfig::default();
        }
    };

    let defaults = BusConfig::default();
    if config.max_in_flight == 0 {
        tracing::warn!(
            "max_in_flight = 0 in {} is not usable, using {}",
            config_path.display(),
            defaults.max_in_flight
        );
        config.max_in_flight = defaults.max_in_flight;
    }
    if config.error_buffer == 0 {
        config.error_buffer = defaults.error_buffer;
    }
    config
}

/// The store URL for `config`: its `database_url`, else the file in `data_dir`.
pub fn resolve_database_url(config: &BusConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_for(data_dir))
}
