//! Bulk maintenance tests: key queries, mass obsolete, purge and archive.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use uuid::Uuid;

use helios_entity_persistence::backends::sqlite::{SqliteArchiveStore, SqliteBackend};
use helios_entity_persistence::core::{
    ArchiveStore, ArchivedEntity, BulkStorage, EntityQuery, EntityStorage,
};
use helios_entity_persistence::engine::EntityStore;
use helios_entity_persistence::error::{
    BackendError, ConfigurationError, ResourceError, StorageError, StorageResult,
};
use helios_entity_persistence::model::{EntityKindTag, LoadMode, NameUseKeys, StatusKeys};
use helios_entity_persistence::query::Predicate;

use common::*;

async fn seed(store: &EntityStore, n: usize) -> Vec<Uuid> {
    let mut keys = Vec::with_capacity(n);
    for _ in 0..n {
        let saved = store.insert(&actor(), patient("1980-06-01")).await.unwrap();
        keys.push(saved.key.unwrap());
    }
    keys
}

fn archiving_store() -> (EntityStore, Arc<SqliteArchiveStore>) {
    let archive = Arc::new(SqliteArchiveStore::in_memory().unwrap());
    let backend = SqliteBackend::in_memory().unwrap();
    let store = EntityStore::builder(Arc::new(backend))
        .archive_store(archive.clone())
        .build()
        .unwrap();
    (store, archive)
}

/// Archive that fails exactly one write, the one after `allowed` successes.
struct FlakyArchive {
    inner: SqliteArchiveStore,
    allowed: AtomicUsize,
}

impl FlakyArchive {
    fn new(allowed: usize) -> Self {
        Self {
            inner: SqliteArchiveStore::in_memory().unwrap(),
            allowed: AtomicUsize::new(allowed),
        }
    }

    fn allow(&self, writes: usize) {
        self.allowed.store(writes, Ordering::SeqCst);
    }
}

impl ArchiveStore for FlakyArchive {
    fn store(&self, archived: &ArchivedEntity) -> StorageResult<()> {
        match self.allowed.load(Ordering::SeqCst) {
            0 => {
                self.allowed.store(usize::MAX, Ordering::SeqCst);
                return Err(StorageError::Backend(BackendError::Internal {
                    backend_name: "archive".to_string(),
                    message: "disk full".to_string(),
                    source: None,
                }));
            }
            usize::MAX => {}
            left => self.allowed.store(left - 1, Ordering::SeqCst),
        }
        self.inner.store(archived)
    }

    fn retrieve(&self, key: Uuid) -> StorageResult<Option<ArchivedEntity>> {
        self.inner.retrieve(key)
    }

    fn remove(&self, key: Uuid) -> StorageResult<bool> {
        self.inner.remove(key)
    }
}

fn flaky_store(allowed: usize) -> (EntityStore, Arc<FlakyArchive>) {
    let archive = Arc::new(FlakyArchive::new(allowed));
    let backend = SqliteBackend::in_memory().unwrap();
    let store = EntityStore::builder(Arc::new(backend))
        .archive_store(archive.clone())
        .build()
        .unwrap();
    (store, archive)
}

// ============================================================================
// Key queries
// ============================================================================

#[tokio::test]
async fn test_query_keys_pages_in_insertion_order() {
    let store = store();
    let keys = seed(&store, 5).await;

    let page = store
        .query_keys(EntityKindTag::Patient, &Predicate::True, 1, 3)
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.keys, keys[1..4].to_vec());

    let none = store
        .query_keys(EntityKindTag::Place, &Predicate::True, 0, 10)
        .await
        .unwrap();
    assert_eq!(none.total, 0);
}

// ============================================================================
// Obsolete
// ============================================================================

#[tokio::test]
async fn test_obsolete_keys_marks_every_record() {
    let store = store();
    let keys = seed(&store, 3).await;

    let count = store.obsolete_keys(&clerk(), &keys).await.unwrap();
    assert_eq!(count, 3);

    let active = store
        .query_keys(EntityKindTag::Entity, &Predicate::active(), 0, 10)
        .await
        .unwrap();
    assert_eq!(active.total, 0);
    for key in keys {
        let read = store
            .get(EntityKindTag::Entity, key, None, Some(LoadMode::Quick))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.status_key(), Some(StatusKeys::OBSOLETE));
    }
}

#[tokio::test]
async fn test_obsolete_keys_with_unknown_key_changes_nothing() {
    let store = store();
    let mut keys = seed(&store, 2).await;
    keys.push(Uuid::new_v4());

    let result = store.obsolete_keys(&actor(), &keys).await;
    assert!(matches!(
        result,
        Err(StorageError::Resource(ResourceError::NotFound { .. }))
    ));

    let active = store
        .query_keys(EntityKindTag::Entity, &Predicate::active(), 0, 10)
        .await
        .unwrap();
    assert_eq!(active.total, 2);
}

// ============================================================================
// Purge
// ============================================================================

#[tokio::test]
async fn test_purge_keys_skips_unknown_keys() {
    let store = store();
    let keys = seed(&store, 3).await;

    let count = store
        .purge_keys(&actor(), &[keys[0], Uuid::new_v4(), keys[2]])
        .await
        .unwrap();
    assert_eq!(count, 2);

    let remaining = store
        .query(&EntityQuery::new(EntityKindTag::Entity, Predicate::True))
        .await
        .unwrap();
    assert_eq!(remaining.total, 1);
    assert_eq!(remaining.items[0].key, Some(keys[1]));
}

#[tokio::test]
async fn test_purge_removes_association_rows() {
    let fixture = FileStore::new(Default::default());
    let saved = fixture
        .store
        .insert(
            &actor(),
            patient("1980-06-01").with_names(vec![given(NameUseKeys::LEGAL, "Ana")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();
    fixture.store.update(&actor(), saved).await.unwrap();

    fixture.store.purge_keys(&actor(), &[key]).await.unwrap();

    assert_eq!(fixture.all("entity_name", key), 0);
    assert_eq!(fixture.count("entity_version", "key = ?1", key), 0);
    assert_eq!(fixture.count("entity", "key = ?1", key), 0);
}

// ============================================================================
// Archive
// ============================================================================

#[tokio::test]
async fn test_archive_moves_whole_chain_out_of_the_live_store() {
    let (store, archive) = archiving_store();
    let saved = store
        .insert(
            &actor(),
            patient("1980-06-01").with_names(vec![given(NameUseKeys::LEGAL, "Olu")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();
    store.update(&actor(), saved).await.unwrap();

    let count = store.archive_keys(&actor(), &[key]).await.unwrap();
    assert_eq!(count, 1);
    assert!(
        store
            .get(EntityKindTag::Entity, key, None, None)
            .await
            .unwrap()
            .is_none()
    );

    let archived = archive.retrieve(key).unwrap().expect("chain archived");
    assert_eq!(archived.versions.len(), 2);
    assert_eq!(archived.versions[0].version.as_ref().unwrap().sequence, 0);

    let retrieved = store.retrieve_archived(key).await.unwrap().unwrap();
    assert_eq!(retrieved.status_key(), Some(StatusKeys::PURGED));
    assert_eq!(retrieved.tag(), EntityKindTag::Patient);
    assert_eq!(given_values(&retrieved), vec!["Olu"]);
}

#[tokio::test]
async fn test_archive_skips_unknown_keys() {
    let (store, _archive) = archiving_store();
    let keys = seed(&store, 1).await;
    let count = store
        .archive_keys(&actor(), &[Uuid::new_v4(), keys[0]])
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(store.retrieve_archived(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_archive_without_archive_store_is_a_configuration_error() {
    let store = store();
    let keys = seed(&store, 1).await;
    let result = store.archive_keys(&actor(), &keys).await;
    assert!(matches!(
        result,
        Err(StorageError::Configuration(ConfigurationError::InvalidValue { .. }))
    ));

    // nothing was purged
    assert!(
        store
            .get(EntityKindTag::Entity, keys[0], None, None)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_failed_archive_leaves_records_live_only() {
    let (store, archive) = flaky_store(1);
    let keys = seed(&store, 2).await;

    let result = store.archive_keys(&actor(), &keys).await;
    assert!(matches!(result, Err(StorageError::Backend(_))));

    for key in &keys {
        assert!(
            store
                .get(EntityKindTag::Entity, *key, None, None)
                .await
                .unwrap()
                .is_some()
        );
        assert!(archive.retrieve(*key).unwrap().is_none());
        assert!(store.retrieve_archived(*key).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_failed_archive_restores_the_copy_it_replaced() {
    let (store, archive) = flaky_store(1);
    let keys = seed(&store, 1).await;
    store.archive_keys(&actor(), &keys).await.unwrap();

    // the key comes back to the live store with a longer chain
    let revived = store
        .insert(&actor(), patient("1980-06-01").with_key(keys[0]))
        .await
        .unwrap();
    store.update(&actor(), revived).await.unwrap();
    let other = seed(&store, 1).await;

    archive.allow(1);
    let result = store.archive_keys(&actor(), &[keys[0], other[0]]).await;
    assert!(result.is_err());

    let kept = archive.retrieve(keys[0]).unwrap().expect("earlier copy kept");
    assert_eq!(kept.versions.len(), 1);
    assert!(archive.retrieve(other[0]).unwrap().is_none());
    assert!(
        store
            .get(EntityKindTag::Entity, keys[0], None, None)
            .await
            .unwrap()
            .is_some()
    );
}
