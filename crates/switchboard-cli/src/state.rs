//! Resolved runtime settings shared by the commands.

use std::path::PathBuf;

use switchboard_infra::config::{load_bus_config, resolve_database_url};
use switchboard_infra::sqlite::pool::data_dir;
use switchboard_infra::sqlite::{DatabasePool, SqliteBusStore};
use switchboard_types::config::BusConfig;

/// Data directory, loaded config, and store location.
#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: BusConfig,
    pub database_url: String,
}

impl AppState {
    /// Resolve the data directory and load `switchboard.toml` from it.
    pub async fn init(data_dir_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir_override.unwrap_or_else(data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_bus_config(&data_dir).await;
        let database_url = resolve_database_url(&config, &data_dir);
        tracing::debug!(data_dir = %data_dir.display(), %database_url, "app state resolved");

        Ok(Self {
            data_dir,
            config,
            database_url,
        })
    }

    /// Open the SQLite store, running migrations if needed.
    pub async fn open_store(&self) -> anyhow::Result<SqliteBusStore> {
        let pool = DatabasePool::new(&self.database_url).await?;
        Ok(SqliteBusStore::new(pool))
    }
}
