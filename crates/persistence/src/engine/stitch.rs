//! Multi-level table-inheritance stitching.
//!
//! An entity of kind `K` is stored as one `entity` row, one `entity_version`
//! row per version, and one row per version in every sub-table of `K`'s
//! ancestry (`person_version` then `patient_version` for a patient). Writes
//! always go root first, then each level in ascending order.

use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{EntityVersionRow, LevelRow};
use crate::config::VersioningPolicy;
use crate::error::StorageResult;
use crate::model::{EntityKindTag, LevelData};
use crate::query::SqlFragment;

/// Failpoint checked before the version row is written.
pub(crate) const ROOT_FAILPOINT: &str = "stitch.root";

fn level_failpoint(ctx: &DataContext<'_>, level: &LevelData) -> StorageResult<()> {
    ctx.failpoint(&format!("stitch.{}", level.sub_table().table_name()))
}

/// Writes a new version row.
pub(crate) fn insert_version(ctx: &DataContext<'_>, row: &EntityVersionRow) -> StorageResult<()> {
    ctx.failpoint(ROOT_FAILPOINT)?;
    ctx.insert(row)
}

/// Stamps the current head as superseded.
pub(crate) fn obsolete_head(ctx: &DataContext<'_>, version_key: Uuid) -> StorageResult<()> {
    ctx.execute(
        SqlFragment::new(
            "UPDATE entity_version SET obsoleted_at = ?, obsoleted_by = ? WHERE version_key = ?",
        )
        .bind(ctx.now())
        .bind(ctx.actor().user_key())
        .bind(version_key),
    )?;
    Ok(())
}

/// Writes every level of a new version, in ascending order.
///
/// Under [`VersioningPolicy::Partial`] the previous version's row is moved to
/// `version_key` and overwritten; a level the previous version lacked is
/// inserted.
pub(crate) fn write_levels(
    ctx: &DataContext<'_>,
    levels: &[LevelData],
    version_key: Uuid,
    previous: Option<Uuid>,
    policy: VersioningPolicy,
) -> StorageResult<()> {
    for level in levels {
        level_failpoint(ctx, level)?;
        let row = LevelRow::from_level(version_key, level);
        let moved = match (policy, previous) {
            (VersioningPolicy::Partial, Some(prev)) => {
                ctx.rekey_level(level.sub_table(), prev, version_key)? > 0
            }
            _ => false,
        };
        if moved {
            ctx.update_level(&row)?;
        } else {
            ctx.insert_level(&row)?;
        }
    }
    Ok(())
}

/// Carries every level of `tag` from `from` to `to` without changing data.
pub(crate) fn copy_forward(
    ctx: &DataContext<'_>,
    tag: EntityKindTag,
    from: Uuid,
    to: Uuid,
    policy: VersioningPolicy,
) -> StorageResult<()> {
    for sub_table in tag.sub_tables() {
        ctx.failpoint(&format!("stitch.{}", sub_table.table_name()))?;
        let written = match policy {
            VersioningPolicy::Full => ctx.copy_level(*sub_table, from, to)?,
            VersioningPolicy::Partial => ctx.rekey_level(*sub_table, from, to)?,
        };
        if written == 0 {
            tracing::warn!(
                sub_table = %sub_table,
                version = %from,
                "Sub-table row missing while carrying a version forward"
            );
        }
    }
    Ok(())
}

/// Loads every level of `tag` serving version `sequence` of `key`.
///
/// Returns `None` if any level is missing.
pub(crate) fn load_levels(
    ctx: &DataContext<'_>,
    tag: EntityKindTag,
    key: Uuid,
    sequence: i64,
) -> StorageResult<Option<Vec<LevelData>>> {
    let mut levels = Vec::with_capacity(tag.sub_tables().len());
    for sub_table in tag.sub_tables() {
        match ctx.load_level(*sub_table, key, sequence)? {
            Some(row) => levels.push(row.into_level()),
            None => return Ok(None),
        }
    }
    Ok(Some(levels))
}

/// Deletes every sub-table row owned by any version of `key`.
pub(crate) fn purge_levels(ctx: &DataContext<'_>, key: Uuid) -> StorageResult<usize> {
    let mut removed = 0;
    for sub_table in crate::model::SubTable::ALL {
        removed += ctx.execute(
            SqlFragment::new(format!(
                "DELETE FROM {} WHERE version_key IN \
                 (SELECT version_key FROM entity_version WHERE key = ?)",
                sub_table.table_name()
            ))
            .bind(key),
        )?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::backends::sqlite::rows::EntityRow;
    use crate::backends::sqlite::schema;
    use crate::context::ActorContext;
    use crate::model::{EntityClassKeys, EntityKind, PatientData, PersonData, StatusKeys, SubTable};
    use chrono::{NaiveDate, Utc};
    use rusqlite::{Connection, TransactionBehavior};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn context<'c>(conn: &'c mut Connection, failpoints: &[&str]) -> DataContext<'c> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        let failpoints = failpoints.iter().map(|s| s.to_string()).collect::<HashSet<_>>();
        DataContext::new(tx, ActorContext::system(), Arc::new(failpoints))
    }

    fn version(key: Uuid, sequence: i64) -> EntityVersionRow {
        EntityVersionRow {
            version_key: Uuid::new_v4(),
            key,
            sequence,
            previous_version_key: None,
            determiner_concept: None,
            status_concept: StatusKeys::ACTIVE,
            type_concept: None,
            template: None,
            created_at: Utc::now(),
            created_by: ActorContext::system().user_key(),
            obsoleted_at: None,
            obsoleted_by: None,
        }
    }

    fn patient(born: u32) -> Vec<LevelData> {
        EntityKind::Patient {
            person: PersonData {
                date_of_birth: NaiveDate::from_ymd_opt(1990, 1, born),
                ..Default::default()
            },
            patient: PatientData::default(),
        }
        .into_levels()
    }

    fn seed(ctx: &DataContext<'_>) -> (Uuid, EntityVersionRow, EntityVersionRow) {
        let key = Uuid::new_v4();
        ctx.insert(&EntityRow {
            key,
            class_concept: EntityClassKeys::PATIENT,
        })
        .unwrap();
        let v0 = version(key, 0);
        let v1 = version(key, 1);
        insert_version(ctx, &v0).unwrap();
        insert_version(ctx, &v1).unwrap();
        (key, v0, v1)
    }

    #[test]
    fn test_full_policy_keeps_every_version() {
        let mut conn = open();
        let ctx = context(&mut conn, &[]);
        let (key, v0, v1) = seed(&ctx);

        write_levels(&ctx, &patient(1), v0.version_key, None, VersioningPolicy::Full).unwrap();
        write_levels(
            &ctx,
            &patient(2),
            v1.version_key,
            Some(v0.version_key),
            VersioningPolicy::Full,
        )
        .unwrap();

        let old = load_levels(&ctx, EntityKindTag::Patient, key, 0).unwrap().unwrap();
        let new = load_levels(&ctx, EntityKindTag::Patient, key, 1).unwrap().unwrap();
        assert_eq!(old, patient(1));
        assert_eq!(new, patient(2));
    }

    #[test]
    fn test_partial_policy_moves_rows_forward() {
        let mut conn = open();
        let ctx = context(&mut conn, &[]);
        let (key, v0, v1) = seed(&ctx);

        write_levels(&ctx, &patient(1), v0.version_key, None, VersioningPolicy::Partial).unwrap();
        write_levels(
            &ctx,
            &patient(2),
            v1.version_key,
            Some(v0.version_key),
            VersioningPolicy::Partial,
        )
        .unwrap();

        assert!(!ctx.has_level(SubTable::Person, v0.version_key).unwrap());
        assert!(ctx.has_level(SubTable::Patient, v1.version_key).unwrap());
        // the old version reads the nearest later row
        let old = load_levels(&ctx, EntityKindTag::Patient, key, 0).unwrap().unwrap();
        assert_eq!(old, patient(2));
    }

    #[test]
    fn test_copy_forward_and_purge() {
        let mut conn = open();
        let ctx = context(&mut conn, &[]);
        let (key, v0, v1) = seed(&ctx);

        write_levels(&ctx, &patient(1), v0.version_key, None, VersioningPolicy::Full).unwrap();
        copy_forward(
            &ctx,
            EntityKindTag::Patient,
            v0.version_key,
            v1.version_key,
            VersioningPolicy::Full,
        )
        .unwrap();
        assert!(ctx.has_level(SubTable::Patient, v1.version_key).unwrap());
        assert!(ctx.has_level(SubTable::Patient, v0.version_key).unwrap());

        assert_eq!(purge_levels(&ctx, key).unwrap(), 4);
    }

    #[test]
    fn test_level_failpoint_fires_before_write() {
        let mut conn = open();
        let ctx = context(&mut conn, &["stitch.patient_version"]);
        let (_, v0, _) = seed(&ctx);

        let err = write_levels(&ctx, &patient(1), v0.version_key, None, VersioningPolicy::Full);
        assert!(err.is_err());
        assert!(ctx.has_level(SubTable::Person, v0.version_key).unwrap());
        assert!(!ctx.has_level(SubTable::Patient, v0.version_key).unwrap());
    }

    #[test]
    fn test_missing_level_yields_none() {
        let mut conn = open();
        let ctx = context(&mut conn, &[]);
        let (key, v0, _) = seed(&ctx);
        write_levels(
            &ctx,
            &patient(1)[..1],
            v0.version_key,
            None,
            VersioningPolicy::Full,
        )
        .unwrap();
        assert!(
            load_levels(&ctx, EntityKindTag::Patient, key, 0)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_obsolete_head_stamps_actor() {
        let mut conn = open();
        let ctx = context(&mut conn, &[]);
        let (_, v0, _) = seed(&ctx);
        obsolete_head(&ctx, v0.version_key).unwrap();
        let row = ctx.get::<EntityVersionRow>(v0.version_key).unwrap().unwrap();
        assert!(row.obsoleted_at.is_some());
        assert_eq!(row.obsoleted_by, Some(ActorContext::system().user_key()));
    }
}
