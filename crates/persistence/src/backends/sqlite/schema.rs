//! SQLite schema definitions and migrations.
//!
//! The root of every entity is split in two: `entity` holds the logical record
//! (key and classification, fixed for life) and `entity_version` holds one row
//! per version. Each inheritance level has its own `*_version` table keyed by
//! the same version key. Associations hang off the logical key and carry the
//! owner sequences between which they are live.

use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::SecurityUserKeys;
use crate::model::keys::WELL_KNOWN_CONCEPTS;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

fn migration_error(step: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::MigrationError {
        message: format!("{step}: {e}"),
    })
}

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
    }

    seed_well_known(conn)?;
    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| migration_error("create schema_version", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| migration_error("clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| migration_error("set schema_version", e))?;
    Ok(())
}

/// Reference tables, the entity root and its version chain.
fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS concept (
            key BLOB PRIMARY KEY,
            mnemonic TEXT NOT NULL UNIQUE,
            display_name TEXT
        );

        CREATE TABLE IF NOT EXISTS assigning_authority (
            key BLOB PRIMARY KEY,
            domain_name TEXT NOT NULL UNIQUE,
            name TEXT,
            oid TEXT,
            url TEXT
        );

        CREATE TABLE IF NOT EXISTS security_user (
            key BLOB PRIMARY KEY,
            user_name TEXT NOT NULL UNIQUE,
            email TEXT,
            created_at TEXT NOT NULL,
            obsoleted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS entity (
            key BLOB PRIMARY KEY,
            class_concept BLOB NOT NULL REFERENCES concept(key)
        );

        CREATE TABLE IF NOT EXISTS entity_version (
            version_key BLOB PRIMARY KEY,
            key BLOB NOT NULL REFERENCES entity(key),
            sequence INTEGER NOT NULL,
            previous_version_key BLOB,
            determiner_concept BLOB REFERENCES concept(key),
            status_concept BLOB NOT NULL REFERENCES concept(key),
            type_concept BLOB REFERENCES concept(key),
            template BLOB REFERENCES concept(key),
            created_at TEXT NOT NULL,
            created_by BLOB NOT NULL,
            obsoleted_at TEXT,
            obsoleted_by BLOB,
            UNIQUE (key, sequence)
        );

        CREATE TABLE IF NOT EXISTS person_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            date_of_birth TEXT,
            gender BLOB REFERENCES concept(key),
            occupation BLOB REFERENCES concept(key)
        );

        CREATE TABLE IF NOT EXISTS patient_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            deceased_date TEXT,
            multiple_birth_order INTEGER,
            marital_status BLOB REFERENCES concept(key)
        );

        CREATE TABLE IF NOT EXISTS provider_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            specialty BLOB REFERENCES concept(key)
        );

        CREATE TABLE IF NOT EXISTS user_entity_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            security_user BLOB REFERENCES security_user(key)
        );

        CREATE TABLE IF NOT EXISTS organization_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            industry BLOB REFERENCES concept(key)
        );

        CREATE TABLE IF NOT EXISTS place_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            is_mobile INTEGER NOT NULL DEFAULT 0,
            lat REAL,
            lng REAL
        );

        CREATE TABLE IF NOT EXISTS material_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            quantity REAL,
            form BLOB REFERENCES concept(key),
            quantity_unit BLOB REFERENCES concept(key),
            expiry_date TEXT,
            is_administrative INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS manufactured_material_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            lot_number TEXT
        );

        CREATE TABLE IF NOT EXISTS device_version (
            version_key BLOB PRIMARY KEY REFERENCES entity_version(version_key) ON DELETE CASCADE,
            manufacturer_model_name TEXT,
            operating_system_name TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_entity_version_key ON entity_version(key, sequence);
        CREATE INDEX IF NOT EXISTS idx_entity_version_head
            ON entity_version(key) WHERE obsoleted_at IS NULL;",
    )
    .map_err(|e| migration_error("create v1 tables", e))
}

/// Run migrations from the given version to the current version.
fn migrate_schema(conn: &Connection, from_version: i32) -> StorageResult<()> {
    let mut version = from_version;
    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            2 => migrate_v2_to_v3(conn)?,
            _ => {
                return Err(StorageError::Backend(BackendError::MigrationError {
                    message: format!("no migration from schema version {version}"),
                }));
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
        tracing::debug!(version, "Migrated entity schema");
    }
    Ok(())
}

/// Versioned association tables.
fn migrate_v1_to_v2(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entity_name (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            name_use BLOB REFERENCES concept(key),
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_name_component (
            key BLOB PRIMARY KEY,
            name_key BLOB NOT NULL REFERENCES entity_name(key) ON DELETE CASCADE,
            component_type BLOB REFERENCES concept(key),
            value TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_address (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            address_use BLOB REFERENCES concept(key),
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_address_component (
            key BLOB PRIMARY KEY,
            address_key BLOB NOT NULL REFERENCES entity_address(key) ON DELETE CASCADE,
            component_type BLOB REFERENCES concept(key),
            value TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_identifier (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            authority BLOB NOT NULL REFERENCES assigning_authority(key),
            value TEXT NOT NULL,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_telecom (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            telecom_use BLOB REFERENCES concept(key),
            value TEXT NOT NULL,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_relationship (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            relationship_type BLOB NOT NULL REFERENCES concept(key),
            target_key BLOB NOT NULL,
            quantity INTEGER,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_note (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            author_key BLOB,
            text TEXT NOT NULL,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_extension (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            url TEXT NOT NULL,
            value TEXT NOT NULL,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_policy (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            policy TEXT NOT NULL,
            grant_type INTEGER NOT NULL,
            effective_version_sequence INTEGER NOT NULL,
            obsolete_version_sequence INTEGER
        );

        CREATE TABLE IF NOT EXISTS entity_tag (
            key BLOB PRIMARY KEY,
            entity_key BLOB NOT NULL REFERENCES entity(key),
            name TEXT NOT NULL,
            value TEXT NOT NULL
        );",
    )
    .map_err(|e| migration_error("create association tables", e))
}

/// Lookup indexes used by the translator and its hacks.
fn migrate_v2_to_v3(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_name_entity ON entity_name(entity_key);
        CREATE INDEX IF NOT EXISTS idx_name_component_name ON entity_name_component(name_key);
        CREATE INDEX IF NOT EXISTS idx_name_component_value ON entity_name_component(value);
        CREATE INDEX IF NOT EXISTS idx_address_entity ON entity_address(entity_key);
        CREATE INDEX IF NOT EXISTS idx_address_component_address
            ON entity_address_component(address_key);
        CREATE INDEX IF NOT EXISTS idx_identifier_entity ON entity_identifier(entity_key);
        CREATE INDEX IF NOT EXISTS idx_identifier_value ON entity_identifier(authority, value);
        CREATE INDEX IF NOT EXISTS idx_telecom_entity ON entity_telecom(entity_key);
        CREATE INDEX IF NOT EXISTS idx_relationship_entity ON entity_relationship(entity_key);
        CREATE INDEX IF NOT EXISTS idx_relationship_target ON entity_relationship(target_key);
        CREATE INDEX IF NOT EXISTS idx_note_entity ON entity_note(entity_key);
        CREATE INDEX IF NOT EXISTS idx_extension_entity ON entity_extension(entity_key);
        CREATE INDEX IF NOT EXISTS idx_policy_entity ON entity_policy(entity_key);
        CREATE INDEX IF NOT EXISTS idx_tag_entity ON entity_tag(entity_key);",
    )
    .map_err(|e| migration_error("create lookup indexes", e))
}

/// Insert the well-known concepts and the system user if missing.
fn seed_well_known(conn: &Connection) -> StorageResult<()> {
    for (key, mnemonic) in WELL_KNOWN_CONCEPTS {
        conn.execute(
            "INSERT OR IGNORE INTO concept (key, mnemonic, display_name) VALUES (?1, ?2, ?2)",
            params![key, mnemonic],
        )
        .map_err(|e| migration_error("seed concept", e))?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO security_user (key, user_name, created_at) VALUES (?1, 'SYSTEM', ?2)",
        params![SecurityUserKeys::SYSTEM, Utc::now()],
    )
    .map_err(|e| migration_error("seed system user", e))?;
    Ok(())
}

/// Drop all tables (for testing).
pub fn drop_all_tables(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS entity_tag;
        DROP TABLE IF EXISTS entity_policy;
        DROP TABLE IF EXISTS entity_extension;
        DROP TABLE IF EXISTS entity_note;
        DROP TABLE IF EXISTS entity_relationship;
        DROP TABLE IF EXISTS entity_telecom;
        DROP TABLE IF EXISTS entity_identifier;
        DROP TABLE IF EXISTS entity_address_component;
        DROP TABLE IF EXISTS entity_address;
        DROP TABLE IF EXISTS entity_name_component;
        DROP TABLE IF EXISTS entity_name;
        DROP TABLE IF EXISTS device_version;
        DROP TABLE IF EXISTS manufactured_material_version;
        DROP TABLE IF EXISTS material_version;
        DROP TABLE IF EXISTS place_version;
        DROP TABLE IF EXISTS organization_version;
        DROP TABLE IF EXISTS user_entity_version;
        DROP TABLE IF EXISTS provider_version;
        DROP TABLE IF EXISTS patient_version;
        DROP TABLE IF EXISTS person_version;
        DROP TABLE IF EXISTS entity_version;
        DROP TABLE IF EXISTS entity;
        DROP TABLE IF EXISTS security_user;
        DROP TABLE IF EXISTS assigning_authority;
        DROP TABLE IF EXISTS concept;
        DROP TABLE IF EXISTS schema_version;",
    )
    .map_err(|e| migration_error("drop tables", e))
}
