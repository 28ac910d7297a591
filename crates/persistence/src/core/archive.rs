//! Offline archive of removed entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::model::Entity;

/// The full version chain of one archived entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedEntity {
    /// Logical key.
    pub key: Uuid,
    /// Every version, oldest first.
    pub versions: Vec<Entity>,
    /// When the chain left the live store.
    pub archived_at: DateTime<Utc>,
    /// Who archived it.
    pub archived_by: Uuid,
}

impl ArchivedEntity {
    /// The newest archived version.
    pub fn last_version(&self) -> Option<&Entity> {
        self.versions.last()
    }
}

/// Storage for archived entities, outside the live version chain.
///
/// Writes are idempotent: archiving the same key again replaces the earlier
/// copy.
pub trait ArchiveStore: Send + Sync {
    /// Stores an archived chain.
    fn store(&self, archived: &ArchivedEntity) -> StorageResult<()>;

    /// Reads an archived chain.
    fn retrieve(&self, key: Uuid) -> StorageResult<Option<ArchivedEntity>>;

    /// Removes an archived chain. Returns `true` if it existed.
    fn remove(&self, key: Uuid) -> StorageResult<bool>;
}
