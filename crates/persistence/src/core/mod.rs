//! Core storage traits and abstractions.
//!
//! - [`EntityStorage`] - generic insert / update / get / query / delete
//! - [`BulkStorage`] - key-only obsolete, purge and archive
//! - [`SecurityUserStorage`] - principals consumed by the authorization service
//! - [`DataCache`], [`AdhocCache`], [`QuerySessionStore`] - optional caches
//! - [`ArchiveStore`] - offline storage for archived version chains
//!
//! # Trait Hierarchy
//!
//! ```text
//! EntityStorage            (every entity kind)
//! BulkStorage              (key-only, predicate-selected sets)
//! SecurityUserStorage      (reference records)
//!
//! EntityStore ──uses──> DataCache / AdhocCache / QuerySessionStore / ArchiveStore
//! ```

pub mod archive;
pub mod cache;
pub mod storage;

pub use archive::{ArchiveStore, ArchivedEntity};
pub use cache::{
    AdhocCache, CachedEntity, DataCache, MemoryAdhocCache, MemoryDataCache, MemoryQuerySessions,
    QuerySessionStore,
};
pub use storage::{
    BulkStorage, DeleteMode, EntityQuery, EntityStorage, KeyPage, QueryPage, SecurityUserStorage,
};
