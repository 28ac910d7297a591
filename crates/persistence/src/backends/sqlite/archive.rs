//! SQLite archive store, kept in a database separate from the live store.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::core::{ArchiveStore, ArchivedEntity};
use crate::error::{BackendError, StorageError, StorageResult};

/// Archive database holding one JSON document per archived version chain.
#[derive(Debug, Clone)]
pub struct SqliteArchiveStore {
    pool: Pool<SqliteConnectionManager>,
}

fn connection_failed(message: String) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: "sqlite-archive".to_string(),
        message,
    })
}

impl SqliteArchiveStore {
    /// Creates an in-memory archive.
    pub fn in_memory() -> StorageResult<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())
            .map_err(|e| connection_failed(e.to_string()))?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    /// Opens or creates an archive database file.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| connection_failed(e.to_string()))?;
        let store = Self { pool };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS archived_entity (
                key BLOB PRIMARY KEY,
                archived_at TEXT NOT NULL,
                archived_by BLOB NOT NULL,
                version_count INTEGER NOT NULL,
                data TEXT NOT NULL
            );",
        )
        .map_err(|e| {
            StorageError::Backend(BackendError::MigrationError {
                message: format!("create archive table: {e}"),
            })
        })
    }
}

impl ArchiveStore for SqliteArchiveStore {
    fn store(&self, archived: &ArchivedEntity) -> StorageResult<()> {
        let data = serde_json::to_string(&archived.versions)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO archived_entity (key, archived_at, archived_by, version_count, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                archived.key,
                archived.archived_at,
                archived.archived_by,
                archived.versions.len() as i64,
                data
            ],
        )?;
        tracing::debug!(
            key = %archived.key,
            versions = archived.versions.len(),
            "Stored archived entity"
        );
        Ok(())
    }

    fn retrieve(&self, key: Uuid) -> StorageResult<Option<ArchivedEntity>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT archived_at, archived_by, data FROM archived_entity WHERE key = ?1",
                [key],
                |row| {
                    Ok((
                        row.get::<_, DateTime<Utc>>(0)?,
                        row.get::<_, Uuid>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((archived_at, archived_by, data)) => Ok(Some(ArchivedEntity {
                key,
                versions: serde_json::from_str(&data)?,
                archived_at,
                archived_by,
            })),
            None => Ok(None),
        }
    }

    fn remove(&self, key: Uuid) -> StorageResult<bool> {
        let conn = self.pool.get()?;
        let n = conn.execute("DELETE FROM archived_entity WHERE key = ?1", [key])?;
        Ok(n > 0)
    }
}
