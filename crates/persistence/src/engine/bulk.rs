//! Key-only operations.
//!
//! Nothing here materializes an object graph except [`snapshot`], which
//! captures a chain on its way to the archive.

use uuid::Uuid;

use crate::backends::sqlite::context::{DataContext, describe_params};
use crate::backends::sqlite::rows::EntityRow;
use crate::core::{ArchivedEntity, KeyPage};
use crate::error::StorageResult;
use crate::model::{EntityKindTag, LoadMode};
use crate::query::{Predicate, QueryTranslator};

use super::materialize::Materializer;
use super::registry::ClassKeyRegistry;

fn as_sql_int(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// One page of keys matching `predicate`, plus the total match count.
pub(crate) fn select_page(
    ctx: &DataContext<'_>,
    translator: &dyn QueryTranslator,
    predicate: &Predicate,
    class_codes: &[Uuid],
    offset: usize,
    limit: usize,
) -> StorageResult<KeyPage> {
    let total = ctx.query_count(translator.count(predicate, class_codes)?)?;

    let mut statement = translator.select_keys(predicate, class_codes)?;
    statement.push_sql(" LIMIT ? OFFSET ?");
    let statement = statement.bind(as_sql_int(limit)).bind(as_sql_int(offset));
    tracing::debug!(
        sql = %statement.sql,
        params = %describe_params(&statement.params),
        "Selecting keys"
    );
    let keys = ctx.query_keys(statement)?;
    Ok(KeyPage { keys, total })
}

/// Every key matching `predicate`, in result order.
pub(crate) fn select_all(
    ctx: &DataContext<'_>,
    translator: &dyn QueryTranslator,
    predicate: &Predicate,
    class_codes: &[Uuid],
) -> StorageResult<Vec<Uuid>> {
    ctx.query_keys(translator.select_keys(predicate, class_codes)?)
}

/// Captures the full version chain of `key`, oldest first.
pub(crate) fn snapshot(
    ctx: &DataContext<'_>,
    registry: &ClassKeyRegistry,
    key: Uuid,
) -> StorageResult<Option<ArchivedEntity>> {
    let Some(root) = ctx.get::<EntityRow>(key)? else {
        return Ok(None);
    };
    let materializer = Materializer::new(ctx, registry);
    let mut versions = Vec::new();
    for row in materializer.chain(key)?.into_iter().rev() {
        if let Some(entity) =
            materializer.load_version(EntityKindTag::Entity, &root, row, LoadMode::Sync)?
        {
            versions.push(entity);
        }
    }
    Ok(Some(ArchivedEntity {
        key,
        versions,
        archived_at: ctx.now(),
        archived_by: ctx.actor().user_key(),
    }))
}
