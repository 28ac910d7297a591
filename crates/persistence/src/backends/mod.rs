//! Database backends.
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | Embedded relational store, in-memory or file based |

#[cfg(feature = "sqlite")]
pub mod sqlite;
