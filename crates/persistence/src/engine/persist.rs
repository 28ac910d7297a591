//! The write paths: insert, update, obsolete and purge.
//!
//! Each operation runs against a [`DataContext`] supplied by the caller, so
//! any error leaves the surrounding transaction to roll back. Steps always
//! happen in the same order: resolve the classification, validate, resolve
//! the remaining references, write the root version, stitch every level,
//! reconcile associations.

use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{EntityRow, EntityVersionRow};
use crate::config::VersioningPolicy;
use crate::core::AdhocCache;
use crate::error::{
    BackendError, ConcurrencyError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::model::{Entity, EntityKindTag, LoadMode, Ref, StatusKeys, VersionInfo, ref_key};
use crate::query::SqlFragment;

use super::associations::{self, ExtensionMapper};
use super::materialize::Materializer;
use super::registry::ClassKeyRegistry;
use super::resolve::Resolver;
use super::stitch;
use super::validation::{Validator, WritePhase, apply_issues};

pub(crate) fn version_info(row: &EntityVersionRow) -> VersionInfo {
    VersionInfo {
        version_key: row.version_key,
        sequence: row.sequence,
        previous_version_key: row.previous_version_key,
        created_at: row.created_at,
        created_by: row.created_by,
        obsoleted_at: row.obsoleted_at,
        obsoleted_by: row.obsoleted_by,
    }
}

fn not_found(tag: EntityKindTag, key: Uuid) -> StorageError {
    ResourceError::NotFound {
        resource_type: tag.to_string(),
        key,
    }
    .into()
}

/// Everything a write needs besides the transaction.
pub(crate) struct Persister<'a, 'conn> {
    ctx: &'a DataContext<'conn>,
    registry: &'a ClassKeyRegistry,
    validator: &'a dyn Validator,
    policy: VersioningPolicy,
    adhoc: Option<&'a dyn AdhocCache>,
}

impl<'a, 'conn> Persister<'a, 'conn> {
    pub(crate) fn new(
        ctx: &'a DataContext<'conn>,
        registry: &'a ClassKeyRegistry,
        validator: &'a dyn Validator,
        policy: VersioningPolicy,
        adhoc: Option<&'a dyn AdhocCache>,
    ) -> Self {
        Self {
            ctx,
            registry,
            validator,
            policy,
            adhoc,
        }
    }

    fn materializer(&self) -> Materializer<'a, 'conn> {
        Materializer::new(self.ctx, self.registry)
    }

    /// Inserts a new logical record at sequence 0.
    pub(crate) fn insert(&self, mut entity: Entity) -> StorageResult<Entity> {
        let tag = entity.tag();
        Resolver::new(self.ctx, self.adhoc).ensure_opt(&mut entity.class_concept)?;
        let issues = self
            .validator
            .validate(&entity, WritePhase::Insert, self.registry);
        apply_issues(&mut entity, issues, || Ok(Vec::new()))?;

        let key = entity.key.unwrap_or_else(Uuid::new_v4);
        if self.ctx.exists::<EntityRow>(key)? {
            return Err(ResourceError::AlreadyExists {
                resource_type: tag.to_string(),
                key,
            }
            .into());
        }
        Resolver::new(self.ctx, self.adhoc).resolve_entity(&mut entity, key)?;

        let class_code = entity
            .class_key()
            .unwrap_or_else(|| self.registry.class_code(tag));
        self.ctx.insert(&EntityRow {
            key,
            class_concept: class_code,
        })?;

        let version = EntityVersionRow {
            version_key: Uuid::new_v4(),
            key,
            sequence: 0,
            previous_version_key: None,
            determiner_concept: ref_key(&entity.determiner_concept),
            status_concept: entity.status_key().unwrap_or(StatusKeys::ACTIVE),
            type_concept: ref_key(&entity.type_concept),
            template: ref_key(&entity.template),
            created_at: self.ctx.now(),
            created_by: self.ctx.actor().user_key(),
            obsoleted_at: None,
            obsoleted_by: None,
        };
        stitch::insert_version(self.ctx, &version)?;
        stitch::write_levels(
            self.ctx,
            &entity.kind.clone().into_levels(),
            version.version_key,
            None,
            self.policy,
        )?;
        let stats = associations::reconcile_all(self.ctx, key, version.sequence, &mut entity)?;

        entity.key = Some(key);
        if entity.class_concept.is_none() {
            entity.class_concept = Some(Ref::Key(class_code));
        }
        if entity.status_concept.is_none() {
            entity.status_concept = Some(Ref::Key(version.status_concept));
        }
        entity.version = Some(version_info(&version));

        tracing::info!(
            %key,
            kind = %tag,
            version = %version.version_key,
            associations = stats.inserted,
            "Inserted entity"
        );
        Ok(entity)
    }

    /// Appends a new version to an existing record.
    ///
    /// With `expected` set, the current head must be that version.
    pub(crate) fn update(&self, mut entity: Entity, expected: Option<Uuid>) -> StorageResult<Entity> {
        let tag = entity.tag();
        let key = entity.key.ok_or_else(|| ValidationError::MissingRequiredField {
            field: "key".to_string(),
        })?;
        let root = self
            .ctx
            .get::<EntityRow>(key)?
            .ok_or_else(|| not_found(tag, key))?;
        let head = self
            .materializer()
            .head(key)?
            .ok_or_else(|| not_found(tag, key))?;
        if let Some(expected) = expected {
            if expected != head.version_key {
                return Err(ConcurrencyError::VersionChainMismatch {
                    key,
                    expected,
                    actual: head.version_key,
                }
                .into());
            }
        }
        let stored = self.registry.stored_tag(root.class_concept);
        if stored != tag {
            return Err(ValidationError::KindMismatch {
                key,
                stored,
                supplied: tag,
            }
            .into());
        }

        Resolver::new(self.ctx, self.adhoc).ensure_opt(&mut entity.class_concept)?;
        let issues = self
            .validator
            .validate(&entity, WritePhase::Update, self.registry);
        apply_issues(&mut entity, issues, || {
            associations::load::<ExtensionMapper>(self.ctx, key, None)
        })?;
        Resolver::new(self.ctx, self.adhoc).resolve_entity(&mut entity, key)?;

        stitch::obsolete_head(self.ctx, head.version_key)?;
        let version = EntityVersionRow {
            version_key: Uuid::new_v4(),
            key,
            sequence: head.sequence + 1,
            previous_version_key: Some(head.version_key),
            determiner_concept: ref_key(&entity.determiner_concept),
            status_concept: entity.status_key().unwrap_or(head.status_concept),
            type_concept: ref_key(&entity.type_concept),
            template: ref_key(&entity.template),
            created_at: self.ctx.now(),
            created_by: self.ctx.actor().user_key(),
            obsoleted_at: None,
            obsoleted_by: None,
        };
        stitch::insert_version(self.ctx, &version)?;
        stitch::write_levels(
            self.ctx,
            &entity.kind.clone().into_levels(),
            version.version_key,
            Some(head.version_key),
            self.policy,
        )?;
        let stats = associations::reconcile_all(self.ctx, key, version.sequence, &mut entity)?;

        if entity.class_concept.is_none() {
            entity.class_concept = Some(Ref::Key(root.class_concept));
        }
        if entity.status_concept.is_none() {
            entity.status_concept = Some(Ref::Key(version.status_concept));
        }
        entity.version = Some(version_info(&version));

        tracing::info!(
            %key,
            kind = %tag,
            sequence = version.sequence,
            inserted = stats.inserted,
            obsoleted = stats.obsoleted,
            "Updated entity"
        );
        Ok(entity)
    }

    /// Appends a version carrying `status` and the head's data unchanged.
    ///
    /// Only the root rows are read; levels are carried forward in place.
    pub(crate) fn append_status(
        &self,
        key: Uuid,
        status: Uuid,
    ) -> StorageResult<(EntityRow, EntityVersionRow)> {
        let root = self
            .ctx
            .get::<EntityRow>(key)?
            .ok_or_else(|| not_found(EntityKindTag::Entity, key))?;
        let head = self
            .materializer()
            .head(key)?
            .ok_or_else(|| not_found(EntityKindTag::Entity, key))?;

        stitch::obsolete_head(self.ctx, head.version_key)?;
        let version = EntityVersionRow {
            version_key: Uuid::new_v4(),
            key,
            sequence: head.sequence + 1,
            previous_version_key: Some(head.version_key),
            status_concept: status,
            created_at: self.ctx.now(),
            created_by: self.ctx.actor().user_key(),
            obsoleted_at: None,
            obsoleted_by: None,
            ..head.clone()
        };
        stitch::insert_version(self.ctx, &version)?;
        stitch::copy_forward(
            self.ctx,
            self.registry.stored_tag(root.class_concept),
            head.version_key,
            version.version_key,
            self.policy,
        )?;
        tracing::info!(%key, status = %status, sequence = version.sequence, "Obsoleted entity");
        Ok((root, version))
    }

    /// [`append_status`](Self::append_status), returning the new version
    /// materialized with its associations.
    pub(crate) fn obsolete(&self, key: Uuid, status: Uuid) -> StorageResult<Entity> {
        let (root, version) = self.append_status(key, status)?;
        self.materializer()
            .load_version(EntityKindTag::Entity, &root, version, LoadMode::Sync)?
            .ok_or_else(|| {
                StorageError::Backend(BackendError::Internal {
                    backend_name: "sqlite".to_string(),
                    message: format!("obsoleted entity {key} could not be read back"),
                    source: None,
                })
            })
    }

    /// Removes every row of `key`. Returns `false` if it did not exist.
    pub(crate) fn purge(&self, key: Uuid) -> StorageResult<bool> {
        if !self.ctx.exists::<EntityRow>(key)? {
            return Ok(false);
        }
        let associations = associations::purge_all(self.ctx, key)?;
        let levels = stitch::purge_levels(self.ctx, key)?;
        let versions = self
            .ctx
            .delete::<EntityVersionRow>(SqlFragment::column_eq("key", key))?;
        self.ctx
            .delete::<EntityRow>(SqlFragment::column_eq("key", key))?;
        tracing::info!(%key, versions, levels, associations, "Purged entity");
        Ok(true)
    }
}
