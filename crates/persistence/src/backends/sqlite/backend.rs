//! SQLite backend: connection pool, schema bootstrap and transactions.

use std::collections::HashSet;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::TransactionBehavior;

use crate::config::SqliteBackendConfig;
use crate::context::ActorContext;
use crate::error::{BackendError, StorageError, StorageResult};

use super::context::{DataContext, PendingAdhoc};
use super::schema;

/// SQLite substrate for the entity store.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("connections", &self.pool.state().connections)
            .finish_non_exhaustive()
    }
}

fn connection_failed(message: String) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite".to_string(),
        message,
    })
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    ///
    /// The pool holds a single long-lived connection, since every in-memory
    /// connection is its own database.
    pub fn in_memory() -> StorageResult<Self> {
        let config = SqliteBackendConfig {
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let manager = Self::manager(SqliteConnectionManager::memory(), &config, true);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))?;
        Ok(Self {
            pool,
            config,
            is_memory: true,
        })
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Opens a file-based database with custom configuration.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        let manager = Self::manager(SqliteConnectionManager::file(path.as_ref()), &config, false);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))?;

        tracing::debug!(
            path = %path.as_ref().display(),
            max_connections = config.max_connections,
            "Opened SQLite pool"
        );

        Ok(Self {
            pool,
            config,
            is_memory: false,
        })
    }

    /// Applies per-connection pragmas as each pooled connection opens.
    fn manager(
        manager: SqliteConnectionManager,
        config: &SqliteBackendConfig,
        is_memory: bool,
    ) -> SqliteConnectionManager {
        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        let wal = config.enable_wal && !is_memory;
        manager.with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update(None, "foreign_keys", foreign_keys)?;
            if wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            }
            Ok(())
        })
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| connection_failed(e.to_string()))
    }

    /// Runs `work` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// The transaction commits only if `work` succeeds; any error drops it and
    /// rolls back every write. On success the ad-hoc cache writes queued by
    /// `work` are returned for the caller to flush.
    pub(crate) fn transaction<T, F>(
        &self,
        actor: &ActorContext,
        failpoints: &Arc<HashSet<String>>,
        work: F,
    ) -> StorageResult<(T, Vec<PendingAdhoc>)>
    where
        F: FnOnce(&DataContext<'_>) -> StorageResult<T>,
    {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ctx = DataContext::new(tx, actor.clone(), Arc::clone(failpoints));
        let value = work(&ctx)?;
        let pending = ctx.commit()?;
        Ok((value, pending))
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Checks that a pooled connection answers.
    pub fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
