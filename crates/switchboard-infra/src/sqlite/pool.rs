//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` pairs a
//! multi-connection reader pool with a single-connection writer pool so
//! inbox/outbox upserts are serialized while lookups run concurrently.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "SWITCHBOARD_DATA_DIR";

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "switchboard.db";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: up to 8 connections for lookups.
/// - `writer`: one connection for upserts.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `database_url`.
    ///
    /// Runs the bundled migrations on the writer before the reader pool is
    /// opened, so readers never see a half-migrated schema.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(base_opts.read_only(true))
            .await?;

        tracing::debug!(database_url, "database pool ready");
        Ok(Self { reader, writer })
    }

    /// Close both pools, waiting for in-use connections to be returned.
    pub async fn close(&self) {
        self.writer.close().await;
        self.reader.close().await;
    }
}

/// The data directory: `SWITCHBOARD_DATA_DIR`, else `~/.switchboard`.
pub fn data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".switchboard"),
    }
}

/// SQLite URL for the database file inside `dir`.
pub fn database_url_for(dir: &Path) -> String {
    format!("sqlite://{}", dir.join(DATABASE_FILE).display())
}

/// The default database URL, rooted at [`data_dir`].
pub fn default_database_url() -> String {
    database_url_for(&data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir, name: &str) -> DatabasePool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join(name).display());
        DatabasePool::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn migrations_create_bus_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir, "bus.db").await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'bus_%' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["bus_inbox", "bus_outbox"]);
    }

    #[tokio::test]
    async fn writer_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir, "wal.db").await;

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(&dir, "again.db").await;
        first.close().await;
        let second = open(&dir, "again.db").await;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bus_outbox")
            .fetch_one(&second.reader)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn database_url_points_into_dir() {
        let url = database_url_for(Path::new("/var/lib/switchboard"));
        assert_eq!(url, "sqlite:///var/lib/switchboard/switchboard.db");
        assert!(default_database_url().ends_with(DATABASE_FILE));
    }
}
