//! Identity and version metadata shared by every persisted record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record with a stable logical key.
///
/// The key is assigned on insert and never changes for the lifetime of the
/// record, across every version it accumulates.
pub trait Identified {
    /// Returns the logical key, or `None` if the record has not been persisted.
    fn key(&self) -> Option<Uuid>;
}

/// A record that accumulates an immutable version chain.
pub trait Versioned: Identified {
    /// Returns the version metadata, or `None` for a record that was never stored.
    fn version(&self) -> Option<&VersionInfo>;

    /// Returns the version key of this particular version.
    fn version_key(&self) -> Option<Uuid> {
        self.version().map(|v| v.version_key)
    }

    /// Returns `true` if this is the head of its version chain.
    fn is_current(&self) -> bool {
        self.version().is_some_and(|v| v.obsoleted_at.is_none())
    }
}

/// Metadata describing one physical version of a logical record.
///
/// Versions form a backward-linked chain through `previous_version_key`. The
/// first version has sequence `0` and no predecessor; every subsequent version
/// increments the sequence by one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Key of this physical version row.
    pub version_key: Uuid,
    /// Sequence number scoped to the logical key.
    pub sequence: i64,
    /// The version this one superseded.
    pub previous_version_key: Option<Uuid>,
    /// When this version was written.
    pub created_at: DateTime<Utc>,
    /// Security user that wrote this version.
    pub created_by: Uuid,
    /// When this version was superseded.
    pub obsoleted_at: Option<DateTime<Utc>>,
    /// Security user that superseded this version.
    pub obsoleted_by: Option<Uuid>,
}

impl VersionInfo {
    /// Returns `true` if this is the original insert.
    pub fn is_initial(&self) -> bool {
        self.previous_version_key.is_none()
    }

    /// Returns `true` if this version heads its chain.
    pub fn is_current(&self) -> bool {
        self.obsoleted_at.is_none()
    }
}

/// How much of an object graph is materialized on read.
///
/// Levels are strictly ordered: every field populated at `Quick` is populated
/// at `Sync`, and every field populated at `Sync` is populated at `Full`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Scalar columns and raw foreign keys only.
    Quick,
    /// Adds every child association collection.
    #[default]
    Sync,
    /// Adds resolved reference objects.
    Full,
}

impl LoadMode {
    /// Returns `true` if child collections are loaded at this level.
    pub fn includes_associations(self) -> bool {
        self >= LoadMode::Sync
    }

    /// Returns `true` if foreign keys are resolved to objects at this level.
    pub fn resolves_references(self) -> bool {
        self == LoadMode::Full
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Quick => write!(f, "quick"),
            LoadMode::Sync => write!(f, "sync"),
            LoadMode::Full => write!(f, "full"),
        }
    }
}
