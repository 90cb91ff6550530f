//! # SQLite Store
//!
//! Connection pool creation and the SQLite-backed [`PersistentStore`].
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLite Key-Value Store                             │
//! │                                                                         │
//! │  App Startup                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StoreConfig::new(path) ← Configure pool settings                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SqliteStore::new(config).await ← Create pool + run migrations         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────────────────────────────────────┐          │
//! │  │  kv_store                                                 │          │
//! │  │  key              | data_type | sensitivity  | value      │          │
//! │  │  ─────────────────┼───────────┼──────────────┼─────────── │          │
//! │  │  operation_queue  | queue     | sensitive    | [{...}]    │          │
//! │  │  cache.tools      | cache     | nonsensitive | {...}      │          │
//! │  └──────────────────────────────────────────────────────────┘          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! File databases run in WAL mode so the cache engine's reads never wait on
//! the queue engine's writes.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::store::{DataType, PersistentStore, Sensitivity};

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = StoreConfig::new("/path/to/haven.db")
///     .max_connections(4);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 4
    pub max_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl StoreConfig {
    /// Creates a configuration for the database file at `path`.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            database_path: path.into(),
            max_connections: 4,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// An in-memory SQLite database lives only as long as its connection,
    /// so the pool is pinned to a single connection that never idles out.
    pub fn in_memory() -> Self {
        StoreConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// SqliteStore
// =============================================================================

/// [`PersistentStore`] backed by a single SQLite table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and runs migrations.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Enables WAL mode with NORMAL synchronous for file databases
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: StoreConfig) -> StoreResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing key-value store"
        );

        let pool = if config.is_in_memory() {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .acquire_timeout(config.connect_timeout)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
        } else {
            let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

            let options = SqliteConnectOptions::from_str(&connect_url)
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(1)
                .acquire_timeout(config.connect_timeout)
                .idle_timeout(Some(config.idle_timeout))
                .connect_with(options)
                .await
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?
        };

        debug!(
            max_connections = config.max_connections,
            "Store pool created"
        );

        let store = SqliteStore { pool };

        if config.run_migrations {
            migrations::run_migrations(&store.pool).await?;
        }

        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection pool.
    pub async fn close(&self) {
        info!("Closing key-value store");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()> {
        debug!(key, %data_type, bytes = value.len(), "Storing value");

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, data_type, sensitivity, value, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (key, data_type, sensitivity) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(data_type.as_str())
        .bind(sensitivity.as_str())
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<Vec<u8>> {
        let value: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT value FROM kv_store
            WHERE key = ?1 AND data_type = ?2 AND sensitivity = ?3
            "#,
        )
        .bind(key)
        .bind(data_type.as_str())
        .bind(sensitivity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        value.ok_or_else(|| StoreError::not_found(key, data_type))
    }

    async fn delete(
        &self,
        key: &str,
        data_type: DataType,
        sensitivity: Sensitivity,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM kv_store
            WHERE key = ?1 AND data_type = ?2 AND sensitivity = ?3
            "#,
        )
        .bind(key)
        .bind(data_type.as_str())
        .bind(sensitivity.as_str())
        .execute(&self.pool)
        .await?;

        debug!(key, %data_type, rows = result.rows_affected(), "Deleted value");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
