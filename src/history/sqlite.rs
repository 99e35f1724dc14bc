//! SQLite-backed room history.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::HistoryStore;
use crate::{RelayError, Result};

/// History schema migrations, applied in order.
const MIGRATIONS: &[&str] = &[
    // v1: room history log
    r#"
CREATE TABLE room_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    room        TEXT NOT NULL,
    payload     BLOB NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_room_history_room ON room_history(room, id);
"#,
];

/// Room history stored in a SQLite database.
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    /// Open (or create) the history database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening history database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let history = Self { pool };
        history.migrate().await?;
        Ok(history)
    }

    /// Open an in-memory history database for testing.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory history database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let history = Self { pool };
        history.migrate().await?;
        Ok(history)
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Ok(0);
        }

        let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn migrate(&self) -> Result<()> {
        let current = self.schema_version().await?;
        if current as usize >= MIGRATIONS.len() {
            debug!("History database is up to date (version {})", current);
            return Ok(());
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = (i + 1) as i64;
            info!("Applying history migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, room: &str, payload: &[u8]) -> Result<()> {
        sqlx::query("INSERT INTO room_history (room, payload) VALUES (?, ?)")
            .bind(room)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }

    async fn read_all(&self, room: &str) -> Result<Vec<Vec<u8>>> {
        let rows: Vec<Vec<u8>> =
            sqlx::query_scalar("SELECT payload FROM room_history WHERE room = ? ORDER BY id")
                .bind(room)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(rows)
    }
}
