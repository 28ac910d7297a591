//! SQLite backend.
//!
//! Entities are stored relationally: a logical `entity` row, one
//! `entity_version` row per version, one row per populated level sub-table
//! (`person_version`, `patient_version`, ...) and versioned association
//! tables (`entity_name`, `entity_identifier`, ...). See [`schema`] for the
//! full layout.
//!
//! # Example
//!
//! ```no_run
//! use helios_entity_persistence::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod backend;
pub(crate) mod context;
mod query_builder;
pub(crate) mod rows;
pub mod schema;

pub use archive::SqliteArchiveStore;
pub use backend::SqliteBackend;
pub use query_builder::{
    CreationTimeHack, FreeTextNameHack, IdentifierDomainHack, RelationshipGuardHack,
    SqliteQueryTranslator,
};
