//! Association persistence.
//!
//! One [`AssociationMapper`] per association table converts between model
//! items and rows. Versioned associations are never updated in place: a
//! removed or changed item gets `obsolete_version_sequence` set to the owner
//! sequence that dropped it, and replacements are inserted with
//! `effective_version_sequence` set to the new sequence. Tags are plain rows
//! and are deleted outright.

use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{
    AddressComponentRow, AddressRow, DbRow, ExtensionRow, IdentifierRow, NameComponentRow,
    NameRow, NoteRow, PolicyRow, RelationshipRow, TagRow, TelecomRow,
};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::{
    Association, Component, Entity, EntityAddress, EntityExtension, EntityIdentifier, EntityName,
    EntityNote, EntityRelationship, EntityTag, EntityTelecom, PolicyGrant, Ref,
    SecurityPolicyInstance, ref_key,
};
use crate::query::SqlFragment;

use super::reconcile::{ReconcileStats, plan};

/// Maps one association type onto its table.
pub(crate) trait AssociationMapper {
    type Item: Association;

    /// Table holding the items.
    const TABLE: &'static str;

    /// Whether rows carry effective / obsolete sequences.
    const VERSIONED: bool = true;

    /// The entity's collection of this type.
    fn collection(entity: &mut Entity) -> &mut Option<Vec<Self::Item>>;

    /// Loads the items matching `filter`, oldest first.
    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<Self::Item>>;

    /// Writes a keyed item, effective at `sequence`.
    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &Self::Item,
    ) -> StorageResult<()>;
}

const LOAD_ORDER: &str = "effective_version_sequence, rowid";

fn item_key<T: Association>(item: &T) -> StorageResult<Uuid> {
    item.key().ok_or_else(|| {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: "association written without a key".to_string(),
            source: None,
        })
    })
}

/// Filter selecting `owner`'s rows valid at `at`, or live rows when `None`.
fn validity_filter<M: AssociationMapper>(owner: Uuid, at: Option<i64>) -> SqlFragment {
    let owned = SqlFragment::column_eq("entity_key", owner);
    if !M::VERSIONED {
        return owned;
    }
    match at {
        None => owned.and(SqlFragment::new("obsolete_version_sequence IS NULL")),
        Some(sequence) => owned.and(
            SqlFragment::new(
                "effective_version_sequence <= ? \
                 AND (obsolete_version_sequence IS NULL OR obsolete_version_sequence > ?)",
            )
            .bind(sequence)
            .bind(sequence),
        ),
    }
}

/// Loads `owner`'s items of one type valid at `at` (live when `None`).
pub(crate) fn load<M: AssociationMapper>(
    ctx: &DataContext<'_>,
    owner: Uuid,
    at: Option<i64>,
) -> StorageResult<Vec<M::Item>> {
    M::load(ctx, validity_filter::<M>(owner, at))
}

fn retire<M: AssociationMapper>(
    ctx: &DataContext<'_>,
    key: Uuid,
    sequence: i64,
) -> StorageResult<()> {
    if M::VERSIONED {
        ctx.execute(
            SqlFragment::new(format!(
                "UPDATE {} SET obsolete_version_sequence = ? WHERE key = ?",
                M::TABLE
            ))
            .bind(sequence)
            .bind(key),
        )?;
    } else {
        ctx.execute(
            SqlFragment::new(format!("DELETE FROM {} WHERE key = ?", M::TABLE)).bind(key),
        )?;
    }
    Ok(())
}

/// Reconciles the entity's supplied collection of one type against the live
/// rows. An unsupplied collection is left alone.
pub(crate) fn reconcile_collection<M: AssociationMapper>(
    ctx: &DataContext<'_>,
    owner: Uuid,
    sequence: i64,
    entity: &mut Entity,
) -> StorageResult<ReconcileStats> {
    let Some(supplied) = M::collection(entity).take() else {
        return Ok(ReconcileStats::default());
    };
    ctx.failpoint(&format!("reconcile.{}", M::TABLE))?;

    let stored = load::<M>(ctx, owner, None)?;
    let plan = plan(&stored, supplied);
    for item in &plan.obsolete {
        retire::<M>(ctx, item_key(item)?, sequence)?;
    }
    for item in &plan.insert {
        M::insert(ctx, owner, sequence, item)?;
    }
    let stats = plan.stats();
    if !stats.is_noop() {
        tracing::debug!(
            table = M::TABLE,
            %owner,
            inserted = stats.inserted,
            obsoleted = stats.obsoleted,
            unchanged = stats.unchanged,
            "Reconciled associations"
        );
    }
    *M::collection(entity) = Some(plan.result);
    Ok(stats)
}

/// Reconciles every supplied collection, in a fixed order.
pub(crate) fn reconcile_all(
    ctx: &DataContext<'_>,
    owner: Uuid,
    sequence: i64,
    entity: &mut Entity,
) -> StorageResult<ReconcileStats> {
    let mut total = ReconcileStats::default();
    total += reconcile_collection::<NameMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<AddressMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<IdentifierMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<TelecomMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<RelationshipMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<NoteMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<ExtensionMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<PolicyMapper>(ctx, owner, sequence, entity)?;
    total += reconcile_collection::<TagMapper>(ctx, owner, sequence, entity)?;
    Ok(total)
}

/// Populates every collection with the items valid at `at`.
///
/// Tags are not versioned, so historical reads see the current tags.
pub(crate) fn load_all(
    ctx: &DataContext<'_>,
    owner: Uuid,
    at: Option<i64>,
    entity: &mut Entity,
) -> StorageResult<()> {
    entity.names = Some(load::<NameMapper>(ctx, owner, at)?);
    entity.addresses = Some(load::<AddressMapper>(ctx, owner, at)?);
    entity.identifiers = Some(load::<IdentifierMapper>(ctx, owner, at)?);
    entity.telecoms = Some(load::<TelecomMapper>(ctx, owner, at)?);
    entity.relationships = Some(load::<RelationshipMapper>(ctx, owner, at)?);
    entity.notes = Some(load::<NoteMapper>(ctx, owner, at)?);
    entity.extensions = Some(load::<ExtensionMapper>(ctx, owner, at)?);
    entity.policies = Some(load::<PolicyMapper>(ctx, owner, at)?);
    entity.tags = Some(load::<TagMapper>(ctx, owner, at)?);
    Ok(())
}

/// Deletes every association row of `owner`, components included.
pub(crate) fn purge_all(ctx: &DataContext<'_>, owner: Uuid) -> StorageResult<usize> {
    let mut removed = 0;
    for (component_table, parent_column, parent_table) in [
        ("entity_name_component", "name_key", NameMapper::TABLE),
        ("entity_address_component", "address_key", AddressMapper::TABLE),
    ] {
        removed += ctx.execute(
            SqlFragment::new(format!(
                "DELETE FROM {component_table} WHERE {parent_column} IN \
                 (SELECT key FROM {parent_table} WHERE entity_key = ?)"
            ))
            .bind(owner),
        )?;
    }
    for table in [
        NameMapper::TABLE,
        AddressMapper::TABLE,
        IdentifierMapper::TABLE,
        TelecomMapper::TABLE,
        RelationshipMapper::TABLE,
        NoteMapper::TABLE,
        ExtensionMapper::TABLE,
        PolicyMapper::TABLE,
        TagMapper::TABLE,
    ] {
        removed += ctx.execute(
            SqlFragment::new(format!("DELETE FROM {table} WHERE entity_key = ?")).bind(owner),
        )?;
    }
    Ok(removed)
}

// ============================================================================
// Component helpers
// ============================================================================

fn load_components<R, F>(
    ctx: &DataContext<'_>,
    parent_column: &str,
    parent: Uuid,
    convert: F,
) -> StorageResult<Vec<Component>>
where
    R: DbRow,
    F: Fn(R) -> Component,
{
    Ok(ctx
        .query_ordered::<R>(
            SqlFragment::column_eq(parent_column, parent),
            "sort_order, rowid",
        )?
        .into_iter()
        .map(convert)
        .collect())
}

// ============================================================================
// Mappers
// ============================================================================

pub(crate) struct NameMapper;

impl AssociationMapper for NameMapper {
    type Item = EntityName;
    const TABLE: &'static str = NameRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityName>> {
        &mut entity.names
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityName>> {
        ctx.query_ordered::<NameRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| {
                let components =
                    load_components::<NameComponentRow, _>(ctx, "name_key", row.key, |c| {
                        Component {
                            component_type: c.component_type.map(Ref::Key),
                            value: c.value,
                        }
                    })?;
                Ok(EntityName {
                    key: Some(row.key),
                    name_use: row.name_use.map(Ref::Key),
                    components,
                })
            })
            .collect()
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityName,
    ) -> StorageResult<()> {
        let key = item_key(item)?;
        ctx.insert(&NameRow {
            key,
            entity_key: owner,
            name_use: ref_key(&item.name_use),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })?;
        for (order, component) in item.components.iter().enumerate() {
            ctx.insert(&NameComponentRow {
                key: Uuid::new_v4(),
                name_key: key,
                component_type: ref_key(&component.component_type),
                value: component.value.clone(),
                sort_order: order as i64,
            })?;
        }
        Ok(())
    }
}

pub(crate) struct AddressMapper;

impl AssociationMapper for AddressMapper {
    type Item = EntityAddress;
    const TABLE: &'static str = AddressRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityAddress>> {
        &mut entity.addresses
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityAddress>> {
        ctx.query_ordered::<AddressRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| {
                let components = load_components::<AddressComponentRow, _>(
                    ctx,
                    "address_key",
                    row.key,
                    |c| Component {
                        component_type: c.component_type.map(Ref::Key),
                        value: c.value,
                    },
                )?;
                Ok(EntityAddress {
                    key: Some(row.key),
                    address_use: row.address_use.map(Ref::Key),
                    components,
                })
            })
            .collect()
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityAddress,
    ) -> StorageResult<()> {
        let key = item_key(item)?;
        ctx.insert(&AddressRow {
            key,
            entity_key: owner,
            address_use: ref_key(&item.address_use),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })?;
        for (order, component) in item.components.iter().enumerate() {
            ctx.insert(&AddressComponentRow {
                key: Uuid::new_v4(),
                address_key: key,
                component_type: ref_key(&component.component_type),
                value: component.value.clone(),
                sort_order: order as i64,
            })?;
        }
        Ok(())
    }
}

pub(crate) struct IdentifierMapper;

impl AssociationMapper for IdentifierMapper {
    type Item = EntityIdentifier;
    const TABLE: &'static str = IdentifierRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityIdentifier>> {
        &mut entity.identifiers
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityIdentifier>> {
        Ok(ctx
            .query_ordered::<IdentifierRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| EntityIdentifier {
                key: Some(row.key),
                authority: Ref::Key(row.authority),
                value: row.value,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityIdentifier,
    ) -> StorageResult<()> {
        let authority = item.authority.key().ok_or_else(|| {
            StorageError::Backend(BackendError::Internal {
                backend_name: "sqlite".to_string(),
                message: "identifier authority was not resolved".to_string(),
                source: None,
            })
        })?;
        ctx.insert(&IdentifierRow {
            key: item_key(item)?,
            entity_key: owner,
            authority,
            value: item.value.clone(),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct TelecomMapper;

impl AssociationMapper for TelecomMapper {
    type Item = EntityTelecom;
    const TABLE: &'static str = TelecomRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityTelecom>> {
        &mut entity.telecoms
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityTelecom>> {
        Ok(ctx
            .query_ordered::<TelecomRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| EntityTelecom {
                key: Some(row.key),
                telecom_use: row.telecom_use.map(Ref::Key),
                value: row.value,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityTelecom,
    ) -> StorageResult<()> {
        ctx.insert(&TelecomRow {
            key: item_key(item)?,
            entity_key: owner,
            telecom_use: ref_key(&item.telecom_use),
            value: item.value.clone(),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct RelationshipMapper;

impl AssociationMapper for RelationshipMapper {
    type Item = EntityRelationship;
    const TABLE: &'static str = RelationshipRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityRelationship>> {
        &mut entity.relationships
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityRelationship>> {
        Ok(ctx
            .query_ordered::<RelationshipRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| EntityRelationship {
                key: Some(row.key),
                relationship_type: Ref::Key(row.relationship_type),
                target_key: row.target_key,
                quantity: row.quantity,
                target: None,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityRelationship,
    ) -> StorageResult<()> {
        let relationship_type = item.relationship_type.key().ok_or_else(|| {
            StorageError::Backend(BackendError::Internal {
                backend_name: "sqlite".to_string(),
                message: "relationship type was not resolved".to_string(),
                source: None,
            })
        })?;
        ctx.insert(&RelationshipRow {
            key: item_key(item)?,
            entity_key: owner,
            relationship_type,
            target_key: item.target_key,
            quantity: item.quantity,
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct NoteMapper;

impl AssociationMapper for NoteMapper {
    type Item = EntityNote;
    const TABLE: &'static str = NoteRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityNote>> {
        &mut entity.notes
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityNote>> {
        Ok(ctx
            .query_ordered::<NoteRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| EntityNote {
                key: Some(row.key),
                author_key: row.author_key,
                text: row.text,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityNote,
    ) -> StorageResult<()> {
        ctx.insert(&NoteRow {
            key: item_key(item)?,
            entity_key: owner,
            author_key: item.author_key,
            text: item.text.clone(),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct ExtensionMapper;

impl AssociationMapper for ExtensionMapper {
    type Item = EntityExtension;
    const TABLE: &'static str = ExtensionRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityExtension>> {
        &mut entity.extensions
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityExtension>> {
        Ok(ctx
            .query_ordered::<ExtensionRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| EntityExtension {
                key: Some(row.key),
                url: row.url,
                value: row.value,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &EntityExtension,
    ) -> StorageResult<()> {
        ctx.insert(&ExtensionRow {
            key: item_key(item)?,
            entity_key: owner,
            url: item.url.clone(),
            value: item.value.clone(),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct PolicyMapper;

impl AssociationMapper for PolicyMapper {
    type Item = SecurityPolicyInstance;
    const TABLE: &'static str = PolicyRow::TABLE;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<SecurityPolicyInstance>> {
        &mut entity.policies
    }

    fn load(
        ctx: &DataContext<'_>,
        filter: SqlFragment,
    ) -> StorageResult<Vec<SecurityPolicyInstance>> {
        ctx.query_ordered::<PolicyRow>(filter, LOAD_ORDER)?
            .into_iter()
            .map(|row| {
                let grant = PolicyGrant::from_i64(row.grant_type).ok_or_else(|| {
                    StorageError::Backend(BackendError::SerializationError {
                        message: format!("unknown policy grant {}", row.grant_type),
                    })
                })?;
                Ok(SecurityPolicyInstance {
                    key: Some(row.key),
                    policy: row.policy,
                    grant,
                })
            })
            .collect()
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        sequence: i64,
        item: &SecurityPolicyInstance,
    ) -> StorageResult<()> {
        ctx.insert(&PolicyRow {
            key: item_key(item)?,
            entity_key: owner,
            policy: item.policy.clone(),
            grant_type: item.grant.as_i64(),
            effective_version_sequence: sequence,
            obsolete_version_sequence: None,
        })
    }
}

pub(crate) struct TagMapper;

impl AssociationMapper for TagMapper {
    type Item = EntityTag;
    const TABLE: &'static str = TagRow::TABLE;
    const VERSIONED: bool = false;

    fn collection(entity: &mut Entity) -> &mut Option<Vec<EntityTag>> {
        &mut entity.tags
    }

    fn load(ctx: &DataContext<'_>, filter: SqlFragment) -> StorageResult<Vec<EntityTag>> {
        Ok(ctx
            .query::<TagRow>(filter)?
            .into_iter()
            .map(|row| EntityTag {
                key: Some(row.key),
                name: row.name,
                value: row.value,
            })
            .collect())
    }

    fn insert(
        ctx: &DataContext<'_>,
        owner: Uuid,
        _sequence: i64,
        item: &EntityTag,
    ) -> StorageResult<()> {
        ctx.insert(&TagRow {
            key: item_key(item)?,
            entity_key: owner,
            name: item.name.clone(),
            value: item.value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::backends::sqlite::rows::{EntityRow, EntityVersionRow};
    use crate::backends::sqlite::schema;
    use crate::context::ActorContext;
    use crate::model::{
        AddressUseKeys, ComponentKeys, EntityClassKeys, EntityKind, NameUseKeys, StatusKeys,
    };
    use chrono::Utc;
    use rusqlite::{Connection, TransactionBehavior};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn context(conn: &mut Connection) -> DataContext<'_> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        DataContext::new(tx, ActorContext::system(), Arc::new(HashSet::new()))
    }

    fn owner(ctx: &DataContext<'_>) -> Uuid {
        let key = Uuid::new_v4();
        ctx.insert(&EntityRow {
            key,
            class_concept: EntityClassKeys::ENTITY,
        })
        .unwrap();
        ctx.insert(&EntityVersionRow {
            version_key: Uuid::new_v4(),
            key,
            sequence: 0,
            previous_version_key: None,
            determiner_concept: None,
            status_concept: StatusKeys::ACTIVE,
            type_concept: None,
            template: None,
            created_at: Utc::now(),
            created_by: ctx.actor().user_key(),
            obsoleted_at: None,
            obsoleted_by: None,
        })
        .unwrap();
        key
    }

    fn smith() -> EntityName {
        EntityName::new(
            NameUseKeys::LEGAL,
            vec![
                Component::new(ComponentKeys::GIVEN, "John"),
                Component::new(ComponentKeys::FAMILY, "Smith"),
            ],
        )
    }

    #[test]
    fn test_components_keep_order() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let owner = owner(&ctx);

        let mut entity = Entity::new(EntityKind::Entity).with_names(vec![smith()]);
        reconcile_all(&ctx, owner, 0, &mut entity).unwrap();

        let names = load::<NameMapper>(&ctx, owner, None).unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].same_content(&smith()));
        assert_eq!(names[0].components[0].value, "John");
    }

    #[test]
    fn test_unsupplied_collection_untouched() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let owner = owner(&ctx);

        let mut first = Entity::new(EntityKind::Entity).with_names(vec![smith()]);
        reconcile_all(&ctx, owner, 0, &mut first).unwrap();

        let mut second = Entity::new(EntityKind::Entity).with_addresses(vec![
            EntityAddress::new(AddressUseKeys::HOME, vec![Component::untyped("1 Main St")]),
        ]);
        let stats = reconcile_all(&ctx, owner, 1, &mut second).unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.obsoleted, 0);
        assert!(second.names.is_none());
        assert_eq!(load::<NameMapper>(&ctx, owner, None).unwrap().len(), 1);
    }

    #[test]
    fn test_removed_item_visible_historically() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let owner = owner(&ctx);

        let mut first = Entity::new(EntityKind::Entity).with_names(vec![smith()]);
        reconcile_all(&ctx, owner, 0, &mut first).unwrap();
        let mut second = Entity::new(EntityKind::Entity).with_names(Vec::new());
        reconcile_all(&ctx, owner, 1, &mut second).unwrap();

        assert!(load::<NameMapper>(&ctx, owner, None).unwrap().is_empty());
        assert_eq!(load::<NameMapper>(&ctx, owner, Some(0)).unwrap().len(), 1);
        assert!(load::<NameMapper>(&ctx, owner, Some(1)).unwrap().is_empty());
    }

    #[test]
    fn test_tags_are_deleted() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let owner = owner(&ctx);

        let mut first =
            Entity::new(EntityKind::Entity).with_tags(vec![EntityTag::new("source", "import")]);
        reconcile_all(&ctx, owner, 0, &mut first).unwrap();
        let mut second = Entity::new(EntityKind::Entity).with_tags(Vec::new());
        reconcile_all(&ctx, owner, 1, &mut second).unwrap();

        assert_eq!(ctx.count::<TagRow>(SqlFragment::always()).unwrap(), 0);
    }

    #[test]
    fn test_purge_all_removes_components() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let owner = owner(&ctx);

        let mut entity = Entity::new(EntityKind::Entity).with_names(vec![smith()]);
        reconcile_all(&ctx, owner, 0, &mut entity).unwrap();
        purge_all(&ctx, owner).unwrap();

        assert_eq!(ctx.count::<NameRow>(SqlFragment::always()).unwrap(), 0);
        assert_eq!(
            ctx.count::<NameComponentRow>(SqlFragment::always()).unwrap(),
            0
        );
    }

    #[test]
    fn test_reconcile_failpoint() {
        let mut conn = open();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();
        let failpoints = Arc::new(HashSet::from(["reconcile.entity_name".to_string()]));
        let ctx = DataContext::new(tx, ActorContext::system(), failpoints);
        let owner = owner(&ctx);

        let mut entity = Entity::new(EntityKind::Entity).with_names(vec![smith()]);
        assert!(reconcile_all(&ctx, owner, 0, &mut entity).is_err());
    }
}
