//! Predicate query tests.
//!
//! Covers status filtering after obsolete and purge, paging, stateful query
//! sessions and the translation overrides.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use helios_entity_persistence::backends::sqlite::{SqliteBackend, SqliteQueryTranslator};
use helios_entity_persistence::config::EngineConfig;
use helios_entity_persistence::core::{
    DeleteMode, EntityQuery, EntityStorage, MemoryQuerySessions,
};
use helios_entity_persistence::engine::EntityStore;
use helios_entity_persistence::error::{QueryError, StorageError};
use helios_entity_persistence::model::{
    AssigningAuthority, EntityIdentifier, EntityKindTag, EntityRelationship, LoadMode,
    NameUseKeys, RelationshipTypeKeys, StatusKeys,
};
use helios_entity_persistence::query::{
    Collection, CompareOp, Predicate, Property, QueryHack, SqlFragment, TranslationScope,
};

use common::*;

fn all_patients() -> EntityQuery {
    EntityQuery::new(EntityKindTag::Patient, Predicate::True)
}

fn active_patients() -> EntityQuery {
    EntityQuery::new(EntityKindTag::Patient, Predicate::active())
}

async fn keys_of(store: &EntityStore, query: EntityQuery) -> Vec<Uuid> {
    store
        .query(&query.with_load_mode(LoadMode::Quick))
        .await
        .unwrap()
        .items
        .into_iter()
        .filter_map(|e| e.key)
        .collect()
}

// ============================================================================
// Obsolete vs purge
// ============================================================================

#[tokio::test]
async fn test_obsoleted_record_only_matches_inactive_queries() {
    let store = store();
    let saved = store.insert(&actor(), patient("1960-02-02")).await.unwrap();
    let key = saved.key.unwrap();

    let obsoleted = store.obsolete(&actor(), key).await.unwrap();
    assert_eq!(obsoleted.status_key(), Some(StatusKeys::OBSOLETE));
    assert_eq!(obsoleted.version.as_ref().unwrap().sequence, 1);

    assert_eq!(keys_of(&store, all_patients()).await, vec![key]);
    assert!(keys_of(&store, active_patients()).await.is_empty());

    // the record itself is still readable
    let read = store
        .get(EntityKindTag::Patient, key, None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.status_key(), Some(StatusKeys::OBSOLETE));
    assert_eq!(
        read.kind.person().unwrap().date_of_birth,
        Some(date("1960-02-02"))
    );
}

#[tokio::test]
async fn test_purged_record_matches_nothing() {
    let store = store();
    let saved = store.insert(&actor(), patient("1960-02-02")).await.unwrap();
    let key = saved.key.unwrap();
    store.update(&actor(), saved).await.unwrap();

    let result = store
        .delete(&actor(), key, DeleteMode::PermanentDelete)
        .await
        .unwrap();
    assert!(result.is_none());

    assert!(keys_of(&store, all_patients()).await.is_empty());
    assert!(keys_of(&store, active_patients()).await.is_empty());
    assert!(
        store
            .get(EntityKindTag::Entity, key, None, None)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_nullify_records_nullified_status() {
    let store = store();
    let saved = store.insert(&actor(), patient("1960-02-02")).await.unwrap();
    let nullified = store
        .delete(&actor(), saved.key.unwrap(), DeleteMode::Nullify)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nullified.status_key(), Some(StatusKeys::NULLIFIED));
}

#[tokio::test]
async fn test_obsolete_and_purge_of_unknown_key_fail() {
    let store = store();
    let missing = Uuid::new_v4();
    assert!(matches!(
        store.obsolete(&actor(), missing).await,
        Err(StorageError::Resource(_))
    ));
    assert!(matches!(
        store
            .delete(&actor(), missing, DeleteMode::PermanentDelete)
            .await,
        Err(StorageError::Resource(_))
    ));
}

#[tokio::test]
async fn test_obsolete_carries_associations_forward() {
    let store = store();
    let saved = store
        .insert(
            &actor(),
            patient("1960-02-02").with_names(vec![given(NameUseKeys::LEGAL, "Ida")]),
        )
        .await
        .unwrap();
    let obsoleted = store.obsolete(&actor(), saved.key.unwrap()).await.unwrap();
    assert_eq!(given_values(&obsoleted), vec!["Ida"]);
}

// ============================================================================
// Paging
// ============================================================================

#[tokio::test]
async fn test_paging_reports_total_and_slices() {
    let store = store();
    for i in 0..7 {
        store
            .insert(&actor(), patient(&format!("1990-01-0{}", i + 1)))
            .await
            .unwrap();
    }

    let first = store.query(&all_patients().page(0, 3)).await.unwrap();
    let last = store.query(&all_patients().page(6, 3)).await.unwrap();
    assert_eq!(first.total, 7);
    assert_eq!(first.items.len(), 3);
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.offset, 6);
}

#[tokio::test]
async fn test_page_size_above_maximum_is_rejected() {
    let store = store_with(EngineConfig {
        max_page_size: 10,
        ..Default::default()
    });
    let result = store.query(&all_patients().page(0, 11)).await;
    assert!(matches!(
        result,
        Err(StorageError::Query(QueryError::PageSizeExceeded {
            requested: 11,
            max: 10
        }))
    ));
}

#[tokio::test]
async fn test_level_property_filters() {
    let store = store();
    store.insert(&actor(), patient("1950-01-01")).await.unwrap();
    let young = store.insert(&actor(), patient("2000-01-01")).await.unwrap();

    let keys = keys_of(
        &store,
        EntityQuery::new(
            EntityKindTag::Patient,
            Predicate::compare(Property::DateOfBirth, CompareOp::Gt, date("1980-01-01")),
        ),
    )
    .await;
    assert_eq!(keys, vec![young.key.unwrap()]);
}

// ============================================================================
// Query sessions
// ============================================================================

#[tokio::test]
async fn test_stateful_query_pages_through_a_fixed_result_set() {
    let backend = SqliteBackend::in_memory().unwrap();
    let store = EntityStore::builder(Arc::new(backend))
        .query_sessions(Arc::new(MemoryQuerySessions::default()))
        .build()
        .unwrap();
    for _ in 0..4 {
        store.insert(&actor(), patient("1990-01-01")).await.unwrap();
    }

    let first = store
        .query(&all_patients().page(0, 2).stateful())
        .await
        .unwrap();
    let session = first.session_id.expect("session created");
    assert_eq!(first.total, 4);

    // rows inserted after the first page do not shift later pages
    store.insert(&actor(), patient("1990-01-01")).await.unwrap();

    let second = store
        .query(&all_patients().page(2, 2).in_session(session))
        .await
        .unwrap();
    assert_eq!(second.total, 4);
    assert_eq!(second.items.len(), 2);
    assert_eq!(second.session_id, Some(session));

    let mut seen: Vec<_> = first
        .items
        .iter()
        .chain(second.items.iter())
        .filter_map(|e| e.key)
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 4);
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let store = store();
    let result = store
        .query(&all_patients().in_session(Uuid::new_v4()))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Query(QueryError::UnknownSession { .. }))
    ));
}

#[tokio::test]
async fn test_stateful_without_session_store_runs_stateless() {
    let store = store();
    store.insert(&actor(), patient("1990-01-01")).await.unwrap();
    let page = store.query(&all_patients().stateful()).await.unwrap();
    assert_eq!(page.total, 1);
    assert!(page.session_id.is_none());
}

// ============================================================================
// Translation overrides
// ============================================================================

#[tokio::test]
async fn test_identifier_domain_lookup() {
    let store = store();
    let target = store
        .insert(
            &actor(),
            patient("1990-01-01").with_identifiers(vec![EntityIdentifier::new(
                AssigningAuthority::new("MRN"),
                "A-100",
            )]),
        )
        .await
        .unwrap();
    store
        .insert(
            &actor(),
            patient("1990-01-01").with_identifiers(vec![EntityIdentifier::new(
                AssigningAuthority::new("SSN"),
                "A-100",
            )]),
        )
        .await
        .unwrap();

    let predicate = Predicate::any_where(
        Collection::Identifiers,
        Predicate::equals(Property::AuthorityDomain, "MRN"),
        Predicate::equals(Property::IdentifierValue, "A-100"),
    );
    let keys = keys_of(&store, EntityQuery::new(EntityKindTag::Entity, predicate)).await;
    assert_eq!(keys, vec![target.key.unwrap()]);
}

#[tokio::test]
async fn test_free_text_over_names() {
    let store = store();
    let hit = store
        .insert(
            &actor(),
            patient("1990-01-01").with_names(vec![full_name(NameUseKeys::LEGAL, "Maria", "Lopez")]),
        )
        .await
        .unwrap();
    store
        .insert(
            &actor(),
            patient("1990-01-01").with_names(vec![full_name(NameUseKeys::LEGAL, "Maria", "Chen")]),
        )
        .await
        .unwrap();

    let keys = keys_of(
        &store,
        EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::FreeText {
                collection: Collection::Names,
                text: "mar lop".to_string(),
            },
        ),
    )
    .await;
    assert_eq!(keys, vec![hit.key.unwrap()]);
}

#[tokio::test]
async fn test_creation_time_ranges() {
    let store = store();
    let before = Utc::now() - Duration::seconds(5);
    let saved = store.insert(&actor(), patient("1990-01-01")).await.unwrap();

    let since = keys_of(
        &store,
        EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::compare(Property::CreationTime, CompareOp::Gte, before),
        ),
    )
    .await;
    assert_eq!(since, vec![saved.key.unwrap()]);

    let later = keys_of(
        &store,
        EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::compare(
                Property::CreationTime,
                CompareOp::Gt,
                Utc::now() + Duration::hours(1),
            ),
        ),
    )
    .await;
    assert!(later.is_empty());
}

#[tokio::test]
async fn test_relationship_lookup_by_type_and_target() {
    let store = store();
    let mother = store
        .insert(&actor(), person(NameUseKeys::LEGAL, "Eve"))
        .await
        .unwrap()
        .key
        .unwrap();
    let child = store
        .insert(
            &actor(),
            patient("2015-01-01").with_relationships(vec![EntityRelationship::new(
                RelationshipTypeKeys::MOTHER,
                mother,
            )]),
        )
        .await
        .unwrap();
    store
        .insert(
            &actor(),
            patient("2016-01-01").with_relationships(vec![EntityRelationship::new(
                RelationshipTypeKeys::NEXT_OF_KIN,
                mother,
            )]),
        )
        .await
        .unwrap();

    let predicate = Predicate::any_where(
        Collection::Relationships,
        Predicate::equals(Property::RelationshipType, RelationshipTypeKeys::MOTHER),
        Predicate::equals(Property::RelationshipTarget, mother),
    );
    let keys = keys_of(&store, EntityQuery::new(EntityKindTag::Entity, predicate)).await;
    assert_eq!(keys, vec![child.key.unwrap()]);
}

/// Matches nothing whenever a tag named `hidden` is queried.
#[derive(Debug)]
struct HiddenTagHack;

impl QueryHack for HiddenTagHack {
    fn name(&self) -> &'static str {
        "hidden-tag"
    }

    fn translate(&self, predicate: &Predicate, _scope: &TranslationScope) -> Option<SqlFragment> {
        match predicate {
            Predicate::Any {
                collection: Collection::Tags,
                ..
            } => Some(SqlFragment::never()),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_registered_hack_is_tried_before_generic_translation() {
    let backend = SqliteBackend::in_memory().unwrap();
    let translator = SqliteQueryTranslator::with_standard_hacks().with_hack(Arc::new(HiddenTagHack));
    let store = EntityStore::builder(Arc::new(backend))
        .translator(Arc::new(translator))
        .build()
        .unwrap();
    store
        .insert(
            &actor(),
            patient("1990-01-01").with_tags(vec![helios_entity_persistence::model::EntityTag::new(
                "hidden", "yes",
            )]),
        )
        .await
        .unwrap();

    let keys = keys_of(
        &store,
        EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::any(
                Collection::Tags,
                Predicate::equals(Property::TagName, "hidden"),
            ),
        ),
    )
    .await;
    assert!(keys.is_empty());
}

#[tokio::test]
async fn test_member_property_outside_any_is_untranslatable() {
    let store = store();
    let result = store
        .query(&EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::equals(Property::IdentifierValue, "x"),
        ))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::Query(QueryError::Untranslatable { .. }))
    ));
}
