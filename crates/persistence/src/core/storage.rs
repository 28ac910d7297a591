//! Storage traits exposed to application layers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ActorContext;
use crate::error::StorageResult;
use crate::model::{Entity, EntityKindTag, LoadMode, SecurityUser};
use crate::query::Predicate;

/// How [`EntityStorage::delete`] removes a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteMode {
    /// Append a version with status "obsolete".
    #[default]
    LogicalDelete,
    /// Append a version with status "nullified" (entered in error).
    Nullify,
    /// Remove every row of the record, bypassing the version chain.
    PermanentDelete,
}

/// A query for entities of one kind (and its descendants).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    /// Requested kind. Matching descendants are returned as their concrete kind.
    pub target: EntityKindTag,
    /// Filter over the current version of each entity.
    pub predicate: Predicate,
    /// Number of matches to skip.
    pub offset: usize,
    /// Page size; `None` returns every match up to the configured maximum.
    pub count: Option<usize>,
    /// Fidelity of returned objects; `None` uses the engine default.
    pub load_mode: Option<LoadMode>,
    /// Continue a stateful query instead of re-running the predicate.
    pub session_id: Option<Uuid>,
    /// Remember the result keys so later pages see a stable ordering.
    pub stateful: bool,
}

impl EntityQuery {
    /// Creates a query returning the first page of matches.
    pub fn new(target: EntityKindTag, predicate: Predicate) -> Self {
        Self {
            target,
            predicate,
            offset: 0,
            count: None,
            load_mode: None,
            session_id: None,
            stateful: false,
        }
    }

    /// Sets the page window.
    pub fn page(mut self, offset: usize, count: usize) -> Self {
        self.offset = offset;
        self.count = Some(count);
        self
    }

    /// Sets the load mode.
    pub fn with_load_mode(mut self, mode: LoadMode) -> Self {
        self.load_mode = Some(mode);
        self
    }

    /// Opens a query session on the first call.
    pub fn stateful(mut self) -> Self {
        self.stateful = true;
        self
    }

    /// Continues an existing query session.
    pub fn in_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self.stateful = true;
        self
    }
}

/// One page of materialized query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Materialized entities, in result order.
    pub items: Vec<Entity>,
    /// Total number of matches.
    pub total: usize,
    /// Offset of the first item.
    pub offset: usize,
    /// Session holding the result ordering, for stateful queries.
    pub session_id: Option<Uuid>,
}

/// One page of matching keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPage {
    /// Logical keys, in result order.
    pub keys: Vec<Uuid>,
    /// Total number of matches.
    pub total: usize,
}

/// Generic insert/update/query/delete contract for versioned entities.
///
/// Every call runs in exactly one transaction: either every step of the call
/// is committed or none is.
///
/// # Polymorphism
///
/// Writes dispatch on the runtime kind of the entity passed in. Reads take the
/// requested kind and return each record as its concrete stored kind, so a
/// query for [`EntityKindTag::Entity`] yields patients, places and devices
/// with their sub-table data attached.
///
/// # Example
///
/// ```ignore
/// use helios_entity_persistence::core::EntityStorage;
/// use helios_entity_persistence::context::ActorContext;
/// use helios_entity_persistence::model::{Entity, EntityKind, EntityKindTag};
///
/// async fn example<S: EntityStorage>(storage: &S) -> StorageResult<()> {
///     let actor = ActorContext::system();
///     let stored = storage.insert(&actor, Entity::new(EntityKind::Entity)).await?;
///     let key = stored.key.unwrap();
///     let read = storage.get(EntityKindTag::Entity, key, None, None).await?;
///     assert!(read.is_some());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait EntityStorage: Send + Sync {
    /// Inserts a new entity.
    ///
    /// A key is assigned when the entity has none. References supplied inline
    /// are resolved or created first; the returned entity carries the version
    /// metadata and the keys of every stored association.
    ///
    /// # Errors
    ///
    /// * `StorageError::Validation` - If blocking issues were detected
    /// * `StorageError::Reference` - If a reference cannot be resolved
    /// * `StorageError::Resource(AlreadyExists)` - If the key is taken
    async fn insert(&self, actor: &ActorContext, entity: Entity) -> StorageResult<Entity>;

    /// Appends a new version to an existing entity.
    ///
    /// Association collections that are `None` are left untouched.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If the entity doesn't exist
    /// * `StorageError::Validation` - If blocking issues were detected, or the
    ///   supplied kind is unrelated to the stored kind
    /// * `StorageError::Reference` - If a reference cannot be resolved
    async fn update(&self, actor: &ActorContext, entity: Entity) -> StorageResult<Entity>;

    /// Updates only if the current head is `expected_version_key`.
    ///
    /// # Errors
    ///
    /// * `StorageError::Concurrency(VersionChainMismatch)` - If the head moved
    async fn update_if_match(
        &self,
        actor: &ActorContext,
        entity: Entity,
        expected_version_key: Uuid,
    ) -> StorageResult<Entity>;

    /// Reads an entity, or one specific version of it.
    ///
    /// Returns `None` when the key is unknown, `version_key` is not one of its
    /// versions, or the stored kind is not `target` or one of its descendants.
    async fn get(
        &self,
        target: EntityKindTag,
        key: Uuid,
        version_key: Option<Uuid>,
        load_mode: Option<LoadMode>,
    ) -> StorageResult<Option<Entity>>;

    /// Runs a query and materializes one page of results.
    ///
    /// # Errors
    ///
    /// * `StorageError::Query` - If the predicate cannot be translated, the
    ///   page is too large, or the session is unknown
    async fn query(&self, query: &EntityQuery) -> StorageResult<QueryPage>;

    /// Marks the entity obsolete by appending a new version.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If the entity doesn't exist
    async fn obsolete(&self, actor: &ActorContext, key: Uuid) -> StorageResult<Entity>;

    /// Deletes an entity.
    ///
    /// Returns the appended version for logical modes and `None` after a
    /// permanent delete.
    async fn delete(
        &self,
        actor: &ActorContext,
        key: Uuid,
        mode: DeleteMode,
    ) -> StorageResult<Option<Entity>>;

    /// Every version of an entity, newest first.
    async fn history(
        &self,
        key: Uuid,
        load_mode: Option<LoadMode>,
    ) -> StorageResult<Vec<Entity>>;
}

/// Key-only operations over predicate-selected sets.
///
/// None of these materialize full object graphs. Callers are expected to
/// chunk large key sets themselves.
#[async_trait]
pub trait BulkStorage: Send + Sync {
    /// Keys of current versions matching `predicate`, in result order.
    async fn query_keys(
        &self,
        target: EntityKindTag,
        predicate: &Predicate,
        offset: usize,
        limit: usize,
    ) -> StorageResult<KeyPage>;

    /// Appends an obsolete version to every entity in `keys`.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If any key is unknown; nothing
    ///   is written in that case
    async fn obsolete_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize>;

    /// Irreversibly removes every row of each entity. Unknown keys are skipped.
    async fn purge_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize>;

    /// Moves each entity's full version chain to the archive store and purges
    /// it from the live store. Unknown keys are skipped.
    ///
    /// If any key fails, the live store is left untouched and chains already
    /// written to the archive by this call are withdrawn.
    async fn archive_keys(&self, actor: &ActorContext, keys: &[Uuid]) -> StorageResult<usize>;

    /// The last version of an archived entity, with status "purged".
    async fn retrieve_archived(&self, key: Uuid) -> StorageResult<Option<Entity>>;
}

/// Security principal storage used by the authorization service.
#[async_trait]
pub trait SecurityUserStorage: Send + Sync {
    /// Inserts a user.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(AlreadyExists)` - If the key or user name is taken
    async fn insert_user(
        &self,
        actor: &ActorContext,
        user: SecurityUser,
    ) -> StorageResult<SecurityUser>;

    /// Reads a user by key.
    async fn get_user(&self, key: Uuid) -> StorageResult<Option<SecurityUser>>;

    /// Finds a user by user name.
    async fn find_user_by_name(&self, user_name: &str) -> StorageResult<Option<SecurityUser>>;

    /// Stamps the user obsolete.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If the user doesn't exist
    async fn obsolete_user(&self, actor: &ActorContext, key: Uuid)
    -> StorageResult<SecurityUser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_mode_default() {
        assert_eq!(DeleteMode::default(), DeleteMode::LogicalDelete);
    }

    #[test]
    fn test_query_builders() {
        let session = Uuid::new_v4();
        let q = EntityQuery::new(EntityKindTag::Person, Predicate::True)
            .page(20, 10)
            .with_load_mode(LoadMode::Quick)
            .in_session(session);
        assert_eq!(q.offset, 20);
        assert_eq!(q.count, Some(10));
        assert_eq!(q.load_mode, Some(LoadMode::Quick));
        assert_eq!(q.session_id, Some(session));
        assert!(q.stateful);
    }
}
