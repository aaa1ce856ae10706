//! # SQLite-Backed Store
//!
//! SQLite key/value persistence for state snapshots, one row per user.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       push_state table                                  │
//! │                                                                         │
//! │  uid (TEXT PRIMARY KEY)  │  state (BLOB)      │  updated_at (TEXT)     │
//! │  ────────────────────────┼────────────────────┼──────────────────────  │
//! │  hex(user id)            │  serialized state  │  RFC 3339 timestamp    │
//! │                          │  machine snapshot  │                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! WAL journaling is enabled so the periodic save task never blocks a
//! concurrent restore on the connect path.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use async_trait::async_trait;
use beacon_core::Uid;

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;

/// Embedded migrations from the crate's `migrations/` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

// =============================================================================
// Configuration
// =============================================================================

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 2 (save task + restore path)
    pub max_connections: u32,

    /// Connection acquire timeout.
    pub connect_timeout: Duration,
}

impl StoreConfig {
    /// Creates a configuration pointing at the given file. The file is
    /// created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// In-memory configuration for tests.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // in-memory requires a single connection
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// SqliteStore
// =============================================================================

/// SQLite-backed [`LocalStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the store and applies migrations.
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "opening local state store"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        MIGRATOR.run(&pool).await?;
        debug!("local state store ready");

        Ok(SqliteStore { pool })
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, uid: &Uid) -> StoreResult<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT state FROM push_state WHERE uid = ?")
                .bind(uid.to_hex())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(state,)| state))
    }

    async fn put(&self, uid: &Uid, bytes: &[u8]) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO push_state (uid, state, updated_at)
             VALUES (?, ?, datetime('now'))
             ON CONFLICT(uid) DO UPDATE SET
                 state = excluded.state,
                 updated_at = excluded.updated_at",
        )
        .bind(uid.to_hex())
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
