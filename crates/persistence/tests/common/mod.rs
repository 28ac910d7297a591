//! Test infrastructure for the entity persistence engine.
//!
//! Stores are in-memory unless a test needs to inspect raw rows, in which
//! case [`FileStore`] keeps the database in a temporary directory that a
//! plain `rusqlite` connection can open alongside the engine.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::Connection;
use tempfile::TempDir;
use uuid::Uuid;

use helios_entity_persistence::backends::sqlite::SqliteBackend;
use helios_entity_persistence::config::{EngineConfig, VersioningPolicy};
use helios_entity_persistence::context::ActorContext;
use helios_entity_persistence::engine::EntityStore;
use helios_entity_persistence::model::{
    Component, ComponentKeys, Entity, EntityKind, EntityName, PatientData, PersonData,
};

// ============================================================================
// Stores
// ============================================================================

/// An in-memory store with default configuration.
pub fn store() -> EntityStore {
    EntityStore::in_memory().expect("Failed to create store")
}

/// An in-memory store with a custom configuration.
pub fn store_with(config: EngineConfig) -> EntityStore {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    EntityStore::builder(Arc::new(backend))
        .config(config)
        .build()
        .expect("Failed to build store")
}

/// An in-memory store whose named steps fail.
pub fn store_failing_at(failpoints: &[&str]) -> EntityStore {
    store_with(EngineConfig {
        failpoints: Some(failpoints.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    })
}

/// A file-backed store whose rows can be inspected directly.
pub struct FileStore {
    pub store: EntityStore,
    pub path: PathBuf,
    _dir: TempDir,
}

impl FileStore {
    pub fn new(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("entities.db");
        let store = EntityStore::open(&path, config).expect("Failed to open store");
        Self {
            store,
            path,
            _dir: dir,
        }
    }

    pub fn with_policy(policy: VersioningPolicy) -> Self {
        Self::new(EngineConfig::with_policy(policy))
    }

    /// A second, raw connection to the same database.
    pub fn raw(&self) -> Connection {
        Connection::open(&self.path).expect("Failed to open raw connection")
    }

    /// Counts rows of `table` matching `filter` bound to `key`.
    pub fn count(&self, table: &str, filter: &str, key: Uuid) -> i64 {
        self.raw()
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE {filter}"),
                [key],
                |row| row.get(0),
            )
            .expect("count query failed")
    }

    /// Counts live association rows of `owner` in `table`.
    pub fn live(&self, table: &str, owner: Uuid) -> i64 {
        self.count(
            table,
            "entity_key = ?1 AND obsolete_version_sequence IS NULL",
            owner,
        )
    }

    /// Counts every association row of `owner` in `table`.
    pub fn all(&self, table: &str, owner: Uuid) -> i64 {
        self.count(table, "entity_key = ?1", owner)
    }
}

// ============================================================================
// Actors
// ============================================================================

pub fn actor() -> ActorContext {
    ActorContext::system()
}

pub fn clerk() -> ActorContext {
    ActorContext::new(Uuid::new_v4(), "clerk")
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("bad date literal")
}

/// A name with a single given component.
pub fn given(name_use: Uuid, value: &str) -> EntityName {
    EntityName::new(name_use, vec![Component::new(ComponentKeys::GIVEN, value)])
}

/// A given + family name.
pub fn full_name(name_use: Uuid, given: &str, family: &str) -> EntityName {
    EntityName::new(
        name_use,
        vec![
            Component::new(ComponentKeys::GIVEN, given),
            Component::new(ComponentKeys::FAMILY, family),
        ],
    )
}

/// A patient born on `born`, with no associations.
pub fn patient(born: &str) -> Entity {
    Entity::new(EntityKind::Patient {
        person: PersonData {
            date_of_birth: Some(date(born)),
            ..Default::default()
        },
        patient: PatientData {
            multiple_birth_order: Some(2),
            ..Default::default()
        },
    })
}

/// A plain person with one name.
pub fn person(name_use: Uuid, value: &str) -> Entity {
    Entity::new(EntityKind::Person {
        person: PersonData::default(),
    })
    .with_names(vec![given(name_use, value)])
}

/// Extracts given-component values of every name, sorted.
pub fn given_values(entity: &Entity) -> Vec<String> {
    let mut values: Vec<String> = entity
        .names
        .iter()
        .flatten()
        .flat_map(|n| n.components.iter())
        .filter(|c| {
            c.component_type.as_ref().and_then(|t| t.key()) == Some(ComponentKeys::GIVEN)
        })
        .map(|c| c.value.clone())
        .collect();
    values.sort();
    values
}
