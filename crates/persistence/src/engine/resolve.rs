//! Reference resolution ("ensure-exists").
//!
//! Every foreign-key-valued field of an entity is resolved before the first
//! owner row is written: bare keys must point at an existing record, inline
//! objects are matched by their natural key (concept mnemonic, authority
//! domain, user name) or inserted.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backends::sqlite::context::DataContext;
use crate::backends::sqlite::rows::{
    AuthorityRow, ConceptRow, DbRow, EntityRow, SecurityUserRow,
};
use crate::core::AdhocCache;
use crate::error::{ReferenceError, StorageResult};
use crate::model::{
    AssigningAuthority, Concept, Entity, EntityKind, Identified, MaterialData, PersonData, Ref,
    SecurityUser,
};
use crate::query::SqlFragment;

/// A shared reference record that can be found or created on demand.
pub(crate) trait Resolvable: Identified {
    /// Target name used in errors and cache keys.
    const TARGET: &'static str;
    /// Column holding the natural key.
    const LOOKUP_COLUMN: &'static str;
    type Row: DbRow;

    fn lookup_value(&self) -> &str;
    fn assign_key(&mut self, key: Uuid);
    fn to_row(&self, key: Uuid, now: DateTime<Utc>) -> Self::Row;
    fn from_row(row: Self::Row) -> Self;
}

impl Resolvable for Concept {
    const TARGET: &'static str = "Concept";
    const LOOKUP_COLUMN: &'static str = "mnemonic";
    type Row = ConceptRow;

    fn lookup_value(&self) -> &str {
        &self.mnemonic
    }

    fn assign_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn to_row(&self, key: Uuid, _now: DateTime<Utc>) -> ConceptRow {
        ConceptRow {
            key,
            mnemonic: self.mnemonic.trim().to_string(),
            display_name: self.display_name.clone(),
        }
    }

    fn from_row(row: ConceptRow) -> Self {
        Concept {
            key: Some(row.key),
            mnemonic: row.mnemonic,
            display_name: row.display_name,
        }
    }
}

impl Resolvable for AssigningAuthority {
    const TARGET: &'static str = "AssigningAuthority";
    const LOOKUP_COLUMN: &'static str = "domain_name";
    type Row = AuthorityRow;

    fn lookup_value(&self) -> &str {
        &self.domain_name
    }

    fn assign_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn to_row(&self, key: Uuid, _now: DateTime<Utc>) -> AuthorityRow {
        AuthorityRow {
            key,
            domain_name: self.domain_name.trim().to_string(),
            name: self.name.clone(),
            oid: self.oid.clone(),
            url: self.url.clone(),
        }
    }

    fn from_row(row: AuthorityRow) -> Self {
        AssigningAuthority {
            key: Some(row.key),
            domain_name: row.domain_name,
            name: row.name,
            oid: row.oid,
            url: row.url,
        }
    }
}

impl Resolvable for SecurityUser {
    const TARGET: &'static str = "SecurityUser";
    const LOOKUP_COLUMN: &'static str = "user_name";
    type Row = SecurityUserRow;

    fn lookup_value(&self) -> &str {
        &self.user_name
    }

    fn assign_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn to_row(&self, key: Uuid, now: DateTime<Utc>) -> SecurityUserRow {
        SecurityUserRow {
            key,
            user_name: self.user_name.trim().to_string(),
            email: self.email.clone(),
            created_at: self.created_at.unwrap_or(now),
            obsoleted_at: self.obsoleted_at,
        }
    }

    fn from_row(row: SecurityUserRow) -> Self {
        SecurityUser {
            key: Some(row.key),
            user_name: row.user_name,
            email: row.email,
            created_at: Some(row.created_at),
            obsoleted_at: row.obsoleted_at,
        }
    }
}

/// Resolves references within one transaction.
pub(crate) struct Resolver<'a, 'conn> {
    ctx: &'a DataContext<'conn>,
    adhoc: Option<&'a dyn AdhocCache>,
}

impl<'a, 'conn> Resolver<'a, 'conn> {
    pub(crate) fn new(ctx: &'a DataContext<'conn>, adhoc: Option<&'a dyn AdhocCache>) -> Self {
        Self { ctx, adhoc }
    }

    /// Resolves `reference` to a stored key, inserting an inline object if
    /// it is new. Inline objects get their key filled in.
    pub(crate) fn ensure_exists<T: Resolvable>(&self, reference: &mut Ref<T>) -> StorageResult<Uuid> {
        match reference {
            Ref::Key(key) => {
                if !self.ctx.exists::<T::Row>(*key)? {
                    return Err(ReferenceError::NotFound {
                        target: T::TARGET.to_string(),
                        key: *key,
                    }
                    .into());
                }
                Ok(*key)
            }
            Ref::Object(object) => {
                if let Some(key) = object.key() {
                    if !self.ctx.exists::<T::Row>(key)? {
                        self.ctx.insert(&object.to_row(key, self.ctx.now()))?;
                        tracing::debug!(record = T::TARGET, %key, "Inserted inline reference");
                    }
                    return Ok(key);
                }
                let key = self.find_or_insert(object)?;
                object.assign_key(key);
                Ok(key)
            }
        }
    }

    /// [`ensure_exists`](Self::ensure_exists) for an optional field.
    pub(crate) fn ensure_opt<T: Resolvable>(
        &self,
        reference: &mut Option<Ref<T>>,
    ) -> StorageResult<Option<Uuid>> {
        reference
            .as_mut()
            .map(|r| self.ensure_exists(r))
            .transpose()
    }

    fn find_or_insert<T: Resolvable>(&self, object: &T) -> StorageResult<Uuid> {
        let value = object.lookup_value().trim();
        if value.is_empty() {
            return Err(ReferenceError::Unidentifiable {
                target: T::TARGET.to_string(),
                message: format!("{} is blank", T::LOOKUP_COLUMN),
            }
            .into());
        }
        let cache_key = format!("{}:{value}", T::TARGET);

        if let Some(key) = self.adhoc.and_then(|c| c.get(&cache_key)) {
            return Ok(key);
        }
        if let Some(key) = self.ctx.pending_adhoc(&cache_key) {
            return Ok(key);
        }

        let existing = self
            .ctx
            .first_or_default::<T::Row>(SqlFragment::column_eq(T::LOOKUP_COLUMN, value))?
            .map(|row| row.key());
        let key = match existing {
            Some(key) => key,
            None => {
                let key = Uuid::new_v4();
                self.ctx.insert(&object.to_row(key, self.ctx.now()))?;
                tracing::debug!(record = T::TARGET, %key, lookup = value, "Created reference record");
                key
            }
        };
        self.ctx.defer_adhoc(cache_key, key);
        Ok(key)
    }

    /// Resolves every reference on `entity`: root fields, each level's
    /// fields, then the references inside supplied associations.
    ///
    /// `owner` is the entity's own key, which relationships may target before
    /// the entity row exists.
    pub(crate) fn resolve_entity(&self, entity: &mut Entity, owner: Uuid) -> StorageResult<()> {
        self.ensure_opt(&mut entity.class_concept)?;
        self.ensure_opt(&mut entity.determiner_concept)?;
        self.ensure_opt(&mut entity.status_concept)?;
        self.ensure_opt(&mut entity.type_concept)?;
        self.ensure_opt(&mut entity.template)?;
        self.resolve_kind(&mut entity.kind)?;

        for name in entity.names.iter_mut().flatten() {
            self.ensure_opt(&mut name.name_use)?;
            for component in &mut name.components {
                self.ensure_opt(&mut component.component_type)?;
            }
        }
        for address in entity.addresses.iter_mut().flatten() {
            self.ensure_opt(&mut address.address_use)?;
            for component in &mut address.components {
                self.ensure_opt(&mut component.component_type)?;
            }
        }
        for identifier in entity.identifiers.iter_mut().flatten() {
            self.ensure_exists(&mut identifier.authority)?;
        }
        for telecom in entity.telecoms.iter_mut().flatten() {
            self.ensure_opt(&mut telecom.telecom_use)?;
        }
        for relationship in entity.relationships.iter_mut().flatten() {
            self.ensure_exists(&mut relationship.relationship_type)?;
            let target = relationship.target_key;
            if target != owner && !self.ctx.exists::<EntityRow>(target)? {
                return Err(ReferenceError::NotFound {
                    target: "Entity".to_string(),
                    key: target,
                }
                .into());
            }
        }
        Ok(())
    }

    fn resolve_kind(&self, kind: &mut EntityKind) -> StorageResult<()> {
        match kind {
            EntityKind::Entity | EntityKind::Place { .. } | EntityKind::Device { .. } => {}
            EntityKind::Person { person } => self.resolve_person(person)?,
            EntityKind::Patient { person, patient } => {
                self.resolve_person(person)?;
                self.ensure_opt(&mut patient.marital_status)?;
            }
            EntityKind::Provider { person, provider } => {
                self.resolve_person(person)?;
                self.ensure_opt(&mut provider.specialty)?;
            }
            EntityKind::UserEntity { person, user } => {
                self.resolve_person(person)?;
                self.ensure_opt(&mut user.security_user)?;
            }
            EntityKind::Organization { organization } => {
                self.ensure_opt(&mut organization.industry)?;
            }
            EntityKind::Material { material }
            | EntityKind::ManufacturedMaterial { material, .. } => {
                self.resolve_material(material)?;
            }
        }
        Ok(())
    }

    fn resolve_person(&self, person: &mut PersonData) -> StorageResult<()> {
        self.ensure_opt(&mut person.gender)?;
        self.ensure_opt(&mut person.occupation)?;
        Ok(())
    }

    fn resolve_material(&self, material: &mut MaterialData) -> StorageResult<()> {
        self.ensure_opt(&mut material.form)?;
        self.ensure_opt(&mut material.quantity_unit)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::backends::sqlite::schema;
    use crate::context::ActorContext;
    use crate::core::MemoryAdhocCache;
    use crate::error::StorageError;
    use crate::model::{GenderKeys, StatusKeys};
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

    #[test]
    fn test_bare_key_must_exist() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let resolver = Resolver::new(&ctx, None);

        let mut known: Ref<Concept> = Ref::Key(StatusKeys::ACTIVE);
        assert_eq!(resolver.ensure_exists(&mut known).unwrap(), StatusKeys::ACTIVE);

        let missing = Uuid::new_v4();
        let err = resolver
            .ensure_exists(&mut Ref::<Concept>::Key(missing))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Reference(ReferenceError::NotFound { key, .. }) if key == missing
        ));
    }

    #[test]
    fn test_inline_object_found_by_mnemonic() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let resolver = Resolver::new(&ctx, None);

        let mut inline = Ref::Object(Concept::new("Gender-Female"));
        assert_eq!(resolver.ensure_exists(&mut inline).unwrap(), GenderKeys::FEMALE);
        assert_eq!(inline.key(), Some(GenderKeys::FEMALE));
    }

    #[test]
    fn test_inline_object_inserted_once() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let resolver = Resolver::new(&ctx, None);

        let mut first = Ref::Object(AssigningAuthority::new("MRN"));
        let mut second = Ref::Object(AssigningAuthority::new(" MRN "));
        let a = resolver.ensure_exists(&mut first).unwrap();
        let b = resolver.ensure_exists(&mut second).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            ctx.count::<AuthorityRow>(SqlFragment::always()).unwrap(),
            1
        );
        assert_eq!(ctx.pending_adhoc("AssigningAuthority:MRN"), Some(a));
    }

    #[test]
    fn test_adhoc_cache_consulted_first() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let cache = MemoryAdhocCache::new();
        cache.put("Concept:Cached", StatusKeys::NEW);
        let resolver = Resolver::new(&ctx, Some(&cache));

        let mut inline = Ref::Object(Concept::new("Cached"));
        assert_eq!(resolver.ensure_exists(&mut inline).unwrap(), StatusKeys::NEW);
    }

    #[test]
    fn test_blank_lookup_is_unidentifiable() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let resolver = Resolver::new(&ctx, None);

        let err = resolver
            .ensure_exists(&mut Ref::Object(Concept::new("  ")))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Reference(ReferenceError::Unidentifiable { .. })
        ));
    }

    #[test]
    fn test_relationship_target_must_exist() {
        let mut conn = open();
        let ctx = context(&mut conn);
        let resolver = Resolver::new(&ctx, None);
        let owner = Uuid::new_v4();

        let mut own = Entity::new(EntityKind::Entity).with_relationships(vec![
            crate::model::EntityRelationship::new(
                crate::model::RelationshipTypeKeys::MOTHER,
                owner,
            ),
        ]);
        resolver.resolve_entity(&mut own, owner).unwrap();

        let mut dangling = Entity::new(EntityKind::Entity).with_relationships(vec![
            crate::model::EntityRelationship::new(
                crate::model::RelationshipTypeKeys::MOTHER,
                Uuid::new_v4(),
            ),
        ]);
        assert!(resolver.resolve_entity(&mut dangling, owner).is_err());
    }
}
