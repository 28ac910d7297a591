//! Association reconciliation tests.
//!
//! Collections follow PATCH semantics: an unset collection is left alone, a
//! supplied one is diffed against the stored live items.

mod common;

use serde_json::json;

use helios_entity_persistence::config::EngineConfig;
use helios_entity_persistence::core::{EntityQuery, EntityStorage};
use helios_entity_persistence::model::{
    AddressUseKeys, AssigningAuthority, Component, ComponentKeys, EntityAddress, EntityExtension,
    EntityIdentifier, EntityKindTag, EntityNote, EntityTag, EntityTelecom, LoadMode, NameUseKeys,
    PolicyGrant, SecurityPolicyInstance,
};
use helios_entity_persistence::query::{Collection, Predicate, Property};

use common::*;

fn home_address(city: &str) -> EntityAddress {
    EntityAddress::new(
        AddressUseKeys::HOME,
        vec![
            Component::new(ComponentKeys::STREET, "1 Main St"),
            Component::new(ComponentKeys::CITY, city),
        ],
    )
}

// ============================================================================
// PATCH semantics
// ============================================================================

#[tokio::test]
async fn test_unsupplied_names_survive_address_update() {
    let store = store();
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01").with_names(vec![
                given(NameUseKeys::LEGAL, "A"),
                given(NameUseKeys::ASSIGNED, "B"),
            ]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();

    let mut patch = patient("1970-01-01").with_key(key);
    patch.addresses = Some(vec![home_address("Toronto")]);
    assert!(patch.names.is_none());
    store.update(&actor(), patch).await.unwrap();

    let read = store
        .get(EntityKindTag::Entity, key, None, Some(LoadMode::Sync))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(given_values(&read), vec!["A", "B"]);
    assert_eq!(read.addresses.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_collection_removes_every_item() {
    let store = store();
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01")
                .with_names(vec![given(NameUseKeys::LEGAL, "A")])
                .with_telecoms(vec![EntityTelecom::new(AddressUseKeys::HOME, "555-0100")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();

    let mut patch = saved.clone();
    patch.telecoms = Some(vec![]);
    store.update(&actor(), patch).await.unwrap();

    let read = store
        .get(EntityKindTag::Entity, key, None, Some(LoadMode::Sync))
        .await
        .unwrap()
        .unwrap();
    assert!(read.telecoms.as_ref().unwrap().is_empty());
    assert_eq!(given_values(&read), vec!["A"]);
}

#[tokio::test]
async fn test_keyed_item_is_replaced_in_place() {
    let fixture = FileStore::new(EngineConfig::default());
    let store = &fixture.store;
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01").with_addresses(vec![home_address("Ottawa")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();
    let address_key = saved.addresses.as_ref().unwrap()[0].key.unwrap();

    let mut moved = saved.clone();
    let mut address = home_address("Montreal");
    address.key = Some(address_key);
    moved.addresses = Some(vec![address]);
    store.update(&actor(), moved).await.unwrap();

    assert_eq!(fixture.live("entity_address", key), 1);
    assert_eq!(fixture.all("entity_address", key), 2);

    let read = store
        .get(EntityKindTag::Entity, key, None, Some(LoadMode::Sync))
        .await
        .unwrap()
        .unwrap();
    let city = &read.addresses.unwrap()[0].components[1];
    assert_eq!(city.value, "Montreal");
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_resupplying_stored_state_writes_no_association_rows() {
    let fixture = FileStore::new(EngineConfig::default());
    let store = &fixture.store;
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01")
                .with_names(vec![full_name(NameUseKeys::LEGAL, "Jo", "Ng")])
                .with_addresses(vec![home_address("Halifax")])
                .with_identifiers(vec![EntityIdentifier::new(
                    AssigningAuthority::new("MRN"),
                    "12345",
                )])
                .with_notes(vec![EntityNote::new(None, "allergic to penicillin")])
                .with_extensions(vec![EntityExtension::new(
                    "urn:test:flag",
                    json!({ "vip": true }),
                )])
                .with_policies(vec![SecurityPolicyInstance::new(
                    "1.3.6.1.4.1.33349.3.1.5.9.2.1",
                    PolicyGrant::Grant,
                )])
                .with_tags(vec![EntityTag::new("source", "import")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();

    let tables = [
        "entity_name",
        "entity_address",
        "entity_identifier",
        "entity_note",
        "entity_extension",
        "entity_policy",
        "entity_tag",
    ];
    let before: Vec<i64> = tables.iter().map(|t| fixture.all(t, key)).collect();

    let stored = store
        .get(EntityKindTag::Patient, key, None, Some(LoadMode::Sync))
        .await
        .unwrap()
        .unwrap();
    store.update(&actor(), stored).await.unwrap();

    // same content without keys is matched by value
    let by_value = patient("1970-01-01")
        .with_key(key)
        .with_names(vec![full_name(NameUseKeys::LEGAL, "Jo", "Ng")])
        .with_addresses(vec![home_address("Halifax")]);
    store.update(&actor(), by_value).await.unwrap();

    let after: Vec<i64> = tables.iter().map(|t| fixture.all(t, key)).collect();
    assert_eq!(before, after);
    for table in tables {
        assert_eq!(
            fixture.count(
                table,
                "entity_key = ?1 AND obsolete_version_sequence IS NOT NULL",
                key
            ),
            0,
            "{table} obsoleted a row"
        );
    }
}

// ============================================================================
// Justin / Bob
// ============================================================================

#[tokio::test]
async fn test_adding_a_name_leaves_the_original_untouched() {
    let store = store();
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01").with_names(vec![given(NameUseKeys::ASSIGNED, "Justin")]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();
    let justin_key = saved.names.as_ref().unwrap()[0].key;

    let mut names = saved.names.clone().unwrap();
    names.push(given(NameUseKeys::LICENSE, "Bob"));
    store
        .update(&actor(), saved.clone().with_names(names))
        .await
        .unwrap();

    // a decoy that must never match
    store
        .insert(
            &actor(),
            patient("1990-01-01").with_names(vec![given(NameUseKeys::LICENSE, "Justin")]),
        )
        .await
        .unwrap();

    let bob = store
        .query(&EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::any(
                Collection::Names,
                Predicate::contains(Property::ComponentValue, "Bob"),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(bob.total, 1);
    assert_eq!(bob.items[0].key, Some(key));

    let justin = store
        .query(&EntityQuery::new(
            EntityKindTag::Entity,
            Predicate::any(
                Collection::Names,
                Predicate::and([
                    Predicate::equals(Property::Use, NameUseKeys::ASSIGNED),
                    Predicate::equals(Property::ComponentValue, "Justin"),
                ]),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(justin.total, 1);
    assert_eq!(justin.items[0].key, Some(key));

    let read = &justin.items[0];
    let original = read
        .names
        .iter()
        .flatten()
        .find(|n| n.key == justin_key)
        .expect("original name kept its key");
    assert_eq!(original.components[0].value, "Justin");
}

// ============================================================================
// Tags and references inside associations
// ============================================================================

#[tokio::test]
async fn test_removed_tags_are_deleted_not_versioned() {
    let fixture = FileStore::new(EngineConfig::default());
    let store = &fixture.store;
    let saved = store
        .insert(
            &actor(),
            patient("1970-01-01").with_tags(vec![
                EntityTag::new("a", "1"),
                EntityTag::new("b", "2"),
            ]),
        )
        .await
        .unwrap();
    let key = saved.key.unwrap();

    store
        .update(
            &actor(),
            saved.clone().with_tags(vec![EntityTag::new("a", "1")]),
        )
        .await
        .unwrap();
    assert_eq!(fixture.all("entity_tag", key), 1);
}

#[tokio::test]
async fn test_inline_authority_is_created_once_and_reused() {
    let fixture = FileStore::new(EngineConfig::default());
    let store = &fixture.store;
    for value in ["A-1", "A-2"] {
        store
            .insert(
                &actor(),
                patient("1970-01-01").with_identifiers(vec![EntityIdentifier::new(
                    AssigningAuthority::new("NHID"),
                    value,
                )]),
            )
            .await
            .unwrap();
    }
    let authorities: i64 = fixture
        .raw()
        .query_row(
            "SELECT COUNT(*) FROM assigning_authority WHERE domain_name = 'NHID'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(authorities, 1);
}
