//! Load-mode driven materialization.
//!
//! Reads always start from the stored classification code: the registry
//! picks the concrete kind, every level of that kind is stitched back on, and
//! the load mode decides how much of the surrounding graph is attached.
//!
//! | Mode    | Root + levels | Associations | Reference objects |
//! |---------|---------------|--------------|-------------------|
//! | `Quick` | yes           | no           | no                |
//! | `Sync`  | yes           | yes          | no                |
//! | `Full`  | yes           | yes          | yes, relationship targets one level deep |

use std::collections::HashMap;

use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{EntityRow, EntityVersionRow};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::{Entity, EntityKind, EntityKindTag, LoadMode, Ref, VersionInfo};
use crate::query::SqlFragment;

use super::associations;
use super::registry::ClassKeyRegistry;
use super::resolve::Resolvable;
use super::stitch;

/// Reads entities inside one transaction.
pub(crate) struct Materializer<'a, 'conn> {
    ctx: &'a DataContext<'conn>,
    registry: &'a ClassKeyRegistry,
}

impl<'a, 'conn> Materializer<'a, 'conn> {
    pub(crate) fn new(ctx: &'a DataContext<'conn>, registry: &'a ClassKeyRegistry) -> Self {
        Self { ctx, registry }
    }

    /// The current version row of `key`.
    pub(crate) fn head(&self, key: Uuid) -> StorageResult<Option<EntityVersionRow>> {
        self.ctx.first_or_default(
            SqlFragment::column_eq("key", key).and(SqlFragment::new("obsoleted_at IS NULL")),
        )
    }

    /// Every version row of `key`, newest first, following the previous
    /// version links from the head.
    pub(crate) fn chain(&self, key: Uuid) -> StorageResult<Vec<EntityVersionRow>> {
        let rows = self.ctx.query_ordered::<EntityVersionRow>(
            SqlFragment::column_eq("key", key),
            "sequence DESC",
        )?;
        let Some(head) = rows.iter().find(|r| r.obsoleted_at.is_none()).cloned() else {
            return Ok(rows);
        };
        let mut by_key: HashMap<Uuid, EntityVersionRow> =
            rows.into_iter().map(|r| (r.version_key, r)).collect();

        let mut chain = Vec::with_capacity(by_key.len());
        let mut next = Some(head.version_key);
        while let Some(version_key) = next {
            let Some(row) = by_key.remove(&version_key) else {
                tracing::warn!(%key, %version_key, "Broken version chain");
                break;
            };
            next = row.previous_version_key;
            chain.push(row);
        }
        Ok(chain)
    }

    /// Materializes `key` as an instance of `requested`.
    ///
    /// Returns `None` if the key is unknown, `version_key` is not a version
    /// of `key`, or the stored kind is not `requested` or one of its
    /// descendants.
    pub(crate) fn load(
        &self,
        requested: EntityKindTag,
        key: Uuid,
        version_key: Option<Uuid>,
        mode: LoadMode,
    ) -> StorageResult<Option<Entity>> {
        let Some(root) = self.ctx.get::<EntityRow>(key)? else {
            return Ok(None);
        };
        let version = match version_key {
            Some(version_key) => self
                .ctx
                .get::<EntityVersionRow>(version_key)?
                .filter(|v| v.key == key),
            None => self.head(key)?,
        };
        let Some(version) = version else {
            return Ok(None);
        };
        self.load_version(requested, &root, version, mode)
    }

    /// Materializes one known version.
    pub(crate) fn load_version(
        &self,
        requested: EntityKindTag,
        root: &EntityRow,
        version: EntityVersionRow,
        mode: LoadMode,
    ) -> StorageResult<Option<Entity>> {
        let Some(stored) = self.registry.resolve_read(requested, root.class_concept) else {
            return Ok(None);
        };

        let mut tag = stored;
        let levels = loop {
            if let Some(levels) = stitch::load_levels(self.ctx, tag, root.key, version.sequence)? {
                break levels;
            }
            tracing::warn!(
                key = %root.key,
                kind = %tag,
                sequence = version.sequence,
                "Sub-table row missing, degrading to parent kind"
            );
            match tag.parent() {
                Some(parent) => tag = parent,
                None => break Vec::new(),
            }
        };
        if !tag.is_a(requested) {
            return Ok(None);
        }
        let kind = EntityKind::from_levels(tag, levels).ok_or_else(|| {
            StorageError::Backend(BackendError::Internal {
                backend_name: "sqlite".to_string(),
                message: format!("incomplete levels for {tag}"),
                source: None,
            })
        })?;

        let is_head = version.obsoleted_at.is_none();
        let sequence = version.sequence;
        let mut entity = Entity {
            key: Some(root.key),
            version: Some(VersionInfo {
                version_key: version.version_key,
                sequence: version.sequence,
                previous_version_key: version.previous_version_key,
                created_at: version.created_at,
                created_by: version.created_by,
                obsoleted_at: version.obsoleted_at,
                obsoleted_by: version.obsoleted_by,
            }),
            class_concept: Some(Ref::Key(root.class_concept)),
            determiner_concept: version.determiner_concept.map(Ref::Key),
            status_concept: Some(Ref::Key(version.status_concept)),
            type_concept: version.type_concept.map(Ref::Key),
            template: version.template.map(Ref::Key),
            kind,
            ..Default::default()
        };

        if mode.includes_associations() {
            let at = (!is_head).then_some(sequence);
            associations::load_all(self.ctx, root.key, at, &mut entity)?;
        }
        if mode.resolves_references() {
            self.attach_objects(&mut entity)?;
        }
        Ok(Some(entity))
    }

    fn object<T: Resolvable>(&self, reference: &mut Ref<T>) -> StorageResult<()> {
        if let Ref::Key(key) = reference {
            if let Some(row) = self.ctx.get::<T::Row>(*key)? {
                *reference = Ref::Object(T::from_row(row));
            }
        }
        Ok(())
    }

    fn object_opt<T: Resolvable>(&self, reference: &mut Option<Ref<T>>) -> StorageResult<()> {
        match reference {
            Some(r) => self.object(r),
            None => Ok(()),
        }
    }

    /// Replaces bare keys with their records and loads relationship targets.
    fn attach_objects(&self, entity: &mut Entity) -> StorageResult<()> {
        self.object_opt(&mut entity.class_concept)?;
        self.object_opt(&mut entity.determiner_concept)?;
        self.object_opt(&mut entity.status_concept)?;
        self.object_opt(&mut entity.type_concept)?;
        self.object_opt(&mut entity.template)?;

        match &mut entity.kind {
            EntityKind::Entity | EntityKind::Place { .. } | EntityKind::Device { .. } => {}
            EntityKind::Person { person } => {
                self.object_opt(&mut person.gender)?;
                self.object_opt(&mut person.occupation)?;
            }
            EntityKind::Patient { person, patient } => {
                self.object_opt(&mut person.gender)?;
                self.object_opt(&mut person.occupation)?;
                self.object_opt(&mut patient.marital_status)?;
            }
            EntityKind::Provider { person, provider } => {
                self.object_opt(&mut person.gender)?;
                self.object_opt(&mut person.occupation)?;
                self.object_opt(&mut provider.specialty)?;
            }
            EntityKind::UserEntity { person, user } => {
                self.object_opt(&mut person.gender)?;
                self.object_opt(&mut person.occupation)?;
                self.object_opt(&mut user.security_user)?;
            }
            EntityKind::Organization { organization } => {
                self.object_opt(&mut organization.industry)?;
            }
            EntityKind::Material { material }
            | EntityKind::ManufacturedMaterial { material, .. } => {
                self.object_opt(&mut material.form)?;
                self.object_opt(&mut material.quantity_unit)?;
            }
        }

        for name in entity.names.iter_mut().flatten() {
            self.object_opt(&mut name.name_use)?;
            for component in &mut name.components {
                self.object_opt(&mut component.component_type)?;
            }
        }
        for address in entity.addresses.iter_mut().flatten() {
            self.object_opt(&mut address.address_use)?;
            for component in &mut address.components {
                self.object_opt(&mut component.component_type)?;
            }
        }
        for identifier in entity.identifiers.iter_mut().flatten() {
            self.object(&mut identifier.authority)?;
        }
        for telecom in entity.telecoms.iter_mut().flatten() {
            self.object_opt(&mut telecom.telecom_use)?;
        }
        for relationship in entity.relationships.iter_mut().flatten() {
            self.object(&mut relationship.relationship_type)?;
            relationship.target = self
                .load(
                    EntityKindTag::Entity,
                    relationship.target_key,
                    None,
                    LoadMode::Quick,
                )?
                .map(Box::new);
        }
        Ok(())
    }
}
