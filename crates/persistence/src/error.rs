//! Error types for the persistence engine.
//!
//! All errors roll up into [`StorageError`]. Each category has its own enum so
//! callers can match on what went wrong: reference resolution, validation,
//! missing records, version-chain conflicts, configuration, query translation,
//! and the backend itself.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::VersioningPolicy;
use crate::model::{EntityKindTag, SubTable};

/// The primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reference resolution errors
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Record state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Version chain errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Startup configuration errors
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Predicate translation errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors raised while resolving referenced records before a write.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// A bare key points at a record that does not exist.
    #[error("unresolved reference: {target}/{key}")]
    NotFound { target: String, key: Uuid },

    /// An inline object carries no data that could identify or create it.
    #[error("cannot resolve inline {target}: {message}")]
    Unidentifiable { target: String, message: String },
}

/// Errors related to domain validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// One or more blocking issues were detected.
    #[error("validation failed with {} blocking issue(s)", blocking_count(.issues))]
    DetectedIssues { issues: Vec<DetectedIssue> },

    /// An update supplied a kind unrelated to the stored kind.
    #[error("entity {key} is stored as {stored}, cannot be written as {supplied}")]
    KindMismatch {
        key: Uuid,
        stored: EntityKindTag,
        supplied: EntityKindTag,
    },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },
}

fn blocking_count(issues: &[DetectedIssue]) -> usize {
    issues.iter().filter(|i| i.is_blocking()).count()
}

/// A business-rule issue found while validating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedIssue {
    /// How severe the issue is.
    pub priority: IssuePriority,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub text: String,
}

impl DetectedIssue {
    /// Creates a blocking issue.
    pub fn error(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            priority: IssuePriority::Error,
            code: code.into(),
            text: text.into(),
        }
    }

    /// Creates a non-blocking warning.
    pub fn warning(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            priority: IssuePriority::Warning,
            code: code.into(),
            text: text.into(),
        }
    }

    /// Returns `true` if this issue aborts the write.
    pub fn is_blocking(&self) -> bool {
        self.priority == IssuePriority::Error
    }
}

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    /// Blocking: the write is aborted.
    Error,
    /// Recorded on the entity, write proceeds.
    Warning,
    /// Recorded on the entity, no action required.
    Information,
}

impl fmt::Display for IssuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuePriority::Error => write!(f, "error"),
            IssuePriority::Warning => write!(f, "warning"),
            IssuePriority::Information => write!(f, "information"),
        }
    }
}

/// Errors related to record state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested record was not found.
    #[error("record not found: {resource_type}/{key}")]
    NotFound { resource_type: String, key: Uuid },

    /// A record with the given key already exists.
    #[error("record already exists: {resource_type}/{key}")]
    AlreadyExists { resource_type: String, key: Uuid },
}

/// Errors related to version-chain appends.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// The caller's expected head is not the current head.
    #[error("version chain mismatch on {key}: expected head {expected}, found {actual}")]
    VersionChainMismatch {
        key: Uuid,
        expected: Uuid,
        actual: Uuid,
    },
}

/// Errors detected while building the engine.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A sub-table override disagrees with the engine-wide versioning policy.
    #[error("sub-table {sub_table} uses {actual:?} versioning but the engine uses {expected:?}")]
    MixedVersioningPolicy {
        sub_table: SubTable,
        expected: VersioningPolicy,
        actual: VersioningPolicy,
    },

    /// Two kinds were registered with the same classification code.
    #[error("classification code {code} registered for both {first} and {second}")]
    DuplicateClassCode {
        code: Uuid,
        first: EntityKindTag,
        second: EntityKindTag,
    },

    /// A kind was registered twice.
    #[error("entity kind {tag} registered more than once")]
    DuplicateRegistration { tag: EntityKindTag },

    /// A kind has no classification code.
    #[error("entity kind {tag} has no registered classification code")]
    MissingRegistration { tag: EntityKindTag },

    /// A configuration value is out of range.
    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {message}")]
    Parse { message: String },
}

/// Errors related to predicate translation and paging.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The predicate shape cannot be translated.
    #[error("cannot translate predicate: {message}")]
    Untranslatable { message: String },

    /// The requested page is larger than allowed.
    #[error("page size {requested} exceeds the maximum of {max}")]
    PageSizeExceeded { requested: usize, max: usize },

    /// The query session does not exist or has expired.
    #[error("unknown query session: {session_id}")]
    UnknownSession { session_id: Uuid },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// A configured failpoint fired.
    #[error("failpoint triggered: {name}")]
    Failpoint { name: String },
}

/// Result type alias for engine operations.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}
