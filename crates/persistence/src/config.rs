//! Engine configuration.
//!
//! [`EngineConfig`] is deserialized from JSON with per-field defaults and
//! validated once, when the engine is built. Any inconsistency is reported as
//! a [`ConfigurationError`] before the first request is served.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, ConfigurationError, StorageError, StorageResult};
use crate::model::{LoadMode, SubTable};

/// How sub-table rows are versioned when the root version chain grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersioningPolicy {
    /// Every version gets its own complete row at every level.
    #[default]
    Full,
    /// Only the root chain grows; sub-table rows move to the head and are overwritten.
    Partial,
}

/// Configuration for the entity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine-wide sub-table versioning policy.
    #[serde(default)]
    pub versioning_policy: VersioningPolicy,

    /// Per-sub-table overrides. Each must agree with `versioning_policy`.
    #[serde(default)]
    pub level_policies: HashMap<SubTable, VersioningPolicy>,

    /// Load mode used when a call does not specify one.
    #[serde(default)]
    pub default_load_mode: LoadMode,

    /// Largest page a query may request.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Named steps that fail on purpose (rollback testing).
    #[serde(default)]
    pub failpoints: Option<Vec<String>>,

    /// SQLite backend settings.
    #[serde(default)]
    pub sqlite: SqliteBackendConfig,
}

fn default_max_page_size() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            versioning_policy: VersioningPolicy::default(),
            level_policies: HashMap::new(),
            default_load_mode: LoadMode::default(),
            max_page_size: default_max_page_size(),
            failpoints: None,
            sqlite: SqliteBackendConfig::default(),
        }
    }
}

/// Connection pool settings for the SQLite substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(raw: &str) -> StorageResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|err| ConfigurationError::Parse {
                message: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            StorageError::Backend(BackendError::Internal {
                backend_name: "config".to_string(),
                message: format!("read {}: {err}", path.as_ref().display()),
                source: Some(Box::new(err)),
            })
        })?;
        Self::from_json(&raw)
    }

    /// Creates a configuration with the given versioning policy.
    pub fn with_policy(policy: VersioningPolicy) -> Self {
        Self {
            versioning_policy: policy,
            ..Default::default()
        }
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (sub_table, policy) in &self.level_policies {
            if *policy != self.versioning_policy {
                return Err(ConfigurationError::MixedVersioningPolicy {
                    sub_table: *sub_table,
                    expected: self.versioning_policy,
                    actual: *policy,
                });
            }
        }
        if self.max_page_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_page_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sqlite.max_connections == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "sqlite.max_connections".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sqlite.min_connections > self.sqlite.max_connections {
            return Err(ConfigurationError::InvalidValue {
                field: "sqlite.min_connections".to_string(),
                message: "must not exceed max_connections".to_string(),
            });
        }
        Ok(())
    }

    /// The set of enabled failpoints.
    pub(crate) fn failpoint_set(&self) -> HashSet<String> {
        self.failpoints
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.versioning_policy, VersioningPolicy::Full);
        assert_eq!(config.default_load_mode, LoadMode::Sync);
        assert_eq!(config.max_page_size, 1000);
        assert!(config.failpoints.is_none());
        assert!(config.sqlite.enable_foreign_keys);
    }

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_json(
            r#"{
                "versioning_policy": "partial",
                "level_policies": { "person": "partial", "patient": "partial" },
                "default_load_mode": "full",
                "max_page_size": 50,
                "failpoints": ["stitch.patient_version"],
                "sqlite": { "max_connections": 4 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.versioning_policy, VersioningPolicy::Partial);
        assert_eq!(config.default_load_mode, LoadMode::Full);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.sqlite.max_connections, 4);
        assert!(config.failpoint_set().contains("stitch.patient_version"));
    }

    #[test]
    fn test_mixed_policy_rejected() {
        let err = EngineConfig::from_json(
            r#"{ "versioning_policy": "full", "level_policies": { "patient": "partial" } }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::MixedVersioningPolicy {
                sub_table: SubTable::Patient,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json(r#"{ "max_page_size": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::InvalidValue { .. })
        ));

        let err = EngineConfig::from_json(r#"{ "versioning_policy": "sometimes" }"#).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Configuration(ConfigurationError::Parse { .. })
        ));
    }
}
