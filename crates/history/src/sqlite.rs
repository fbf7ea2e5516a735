//! SQLite session store.
//!
//! One table, `session_turns`, holding one row per turn. The integer primary
//! key gives the append order; turns are stored as JSON.

use async_trait::async_trait;
use chrono::Utc;
use cliz_core::error::StoreError;
use cliz_core::history::{SessionId, Turn};
use cliz_core::store::SessionStore;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // Every append must be on disk before the agent moves on
            .synchronous(SqliteSynchronous::Full);

        // Each in-memory connection is a separate database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite history store initialized at {path}");
        Ok(store)
    }

    /// Open a store at a filesystem path, creating parent directories.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("Failed to create history directory: {e}"))
            })?;
        }
        Self::new(&format!("sqlite://{}", path.display())).await
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_turns (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL,
                kind        TEXT NOT NULL,
                payload     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session_turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_turns_session ON session_turns(session_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, session: &SessionId, turn: &Turn) -> Result<(), StoreError> {
        let payload = serde_json::to_string(turn)
            .map_err(|e| StoreError::Storage(format!("Turn serialization: {e}")))?;

        sqlx::query(
            "INSERT INTO session_turns (session_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(session.as_str())
        .bind(turn.kind())
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(session = %session, kind = turn.kind(), "Turn persisted");
        Ok(())
    }

    async fn load(&self, session: &SessionId) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query("SELECT seq, payload FROM session_turns WHERE session_id = ?1 ORDER BY seq")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("SELECT failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let seq: i64 = row
                    .try_get("seq")
                    .map_err(|e| StoreError::Storage(format!("seq column: {e}")))?;
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| StoreError::Storage(format!("payload column: {e}")))?;
                serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Corrupted(format!("row {seq}: {e}")))
            })
            .collect()
    }

    async fn clear(&self, session: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_turns WHERE session_id = ?1")
            .bind(session.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        Ok(())
    }

    async fn sessions(&self) -> Result<Vec<SessionId>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id FROM session_turns GROUP BY session_id ORDER BY MIN(seq)",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("SELECT sessions failed: {e}")))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("session_id")
                    .map(SessionId)
                    .map_err(|e| StoreError::Storage(format!("session_id column: {e}")))
            })
            .collect()
    }
}
