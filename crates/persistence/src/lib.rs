//! Helios Entity Persistence
//!
//! A versioned, polymorphic persistence engine for identified clinical
//! entities: persons, patients, providers, organizations, places, materials,
//! devices and user entities.
//!
//! Every write appends a new version to the record's chain instead of
//! overwriting it. Each kind is stored across a root table plus one sub-table
//! per level of its ancestry, and reads reassemble the most-derived kind from
//! the stored classification code. Names, addresses, identifiers and the
//! other associations are versioned independently and reconciled against
//! what is stored on every update.
//!
//! # Features
//!
//! - **Version chains**: append-only history with optimistic concurrency
//! - **Polymorphic reads**: ask for an `Entity`, get back a `Patient`
//! - **Association reconciliation**: keyed and content-based diffing
//! - **Reference resolution**: concepts, authorities and users by key or
//!   natural key, with ad-hoc creation
//! - **Load modes**: `Quick`, `Sync` and `Full` materialization depth
//! - **Predicate queries**: declarative predicates translated to SQL, with
//!   pluggable [`QueryHack`](query::QueryHack) overrides
//! - **Bulk operations**: key-only obsolete, purge and archive
//!
//! # Architecture
//!
//! - [`model`] - the record model and well-known keys
//! - [`context`] - the acting principal
//! - [`config`] - engine configuration
//! - [`error`] - error types for all operations
//! - [`core`] - storage traits, caches and the archive contract
//! - [`query`] - predicates and the translation contract
//! - [`backends`] - the SQLite backend
//! - [`engine`] - the [`EntityStore`] service
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_entity_persistence::{ActorContext, EntityStore};
//! use helios_entity_persistence::core::EntityStorage;
//! use helios_entity_persistence::model::{
//!     Component, ComponentKeys, Entity, EntityKind, EntityKindTag, EntityName, LoadMode,
//!     NameUseKeys, PatientData, PersonData,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = EntityStore::in_memory()?;
//! let actor = ActorContext::system();
//!
//! let patient = Entity::new(EntityKind::Patient {
//!     person: PersonData::default(),
//!     patient: PatientData::default(),
//! })
//! .with_names(vec![EntityName::new(
//!     NameUseKeys::LEGAL,
//!     vec![
//!         Component::new(ComponentKeys::GIVEN, "Justin"),
//!         Component::new(ComponentKeys::FAMILY, "Smith"),
//!     ],
//! )]);
//!
//! let saved = store.insert(&actor, patient).await?;
//! let read = store
//!     .get(EntityKindTag::Entity, saved.key.unwrap(), None, Some(LoadMode::Sync))
//!     .await?
//!     .unwrap();
//! assert_eq!(read.tag(), EntityKindTag::Patient);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod context;
pub mod core;
#[cfg(feature = "sqlite")]
pub mod engine;
pub mod error;
pub mod model;
pub mod query;

// Re-export commonly used types at crate root
pub use config::{EngineConfig, VersioningPolicy};
pub use context::ActorContext;
pub use error::{StorageError, StorageResult};
pub use model::{Entity, EntityKind, EntityKindTag, LoadMode};

// Re-export core traits
pub use core::{BulkStorage, EntityStorage, SecurityUserStorage};

#[cfg(feature = "sqlite")]
pub use engine::{EntityStore, EntityStoreBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
