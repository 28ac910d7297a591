//! Predicate translation for SQLite.
//!
//! [`SqliteQueryTranslator`] turns a [`Predicate`] into a statement selecting
//! entity keys. Sub-table properties are reached through `LEFT JOIN`s on the
//! current version key; `any()` over a collection becomes a correlated
//! `EXISTS` restricted to live rows. Registered [`QueryHack`]s are offered
//! every node outside `any()` first.
//!
//! # Null handling
//!
//! `= null` and `!= null` translate to `IS NULL` / `IS NOT NULL`. `!=`
//! against a value also matches rows where the column is null. Ordering and
//! text comparisons against null cannot be translated.

use std::sync::Arc;

use crate::error::{QueryError, StorageResult};
use crate::model::SubTable;
use crate::query::{
    Collection, CompareOp, Predicate, Property, PropertyScope, QueryHack, QueryTranslator,
    QueryValue, SqlFragment, SqlParam, TranslationScope,
};

fn untranslatable(message: impl Into<String>) -> QueryError {
    QueryError::Untranslatable {
        message: message.into(),
    }
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn root_column(property: Property, scope: &TranslationScope) -> Option<String> {
    let (alias, column) = match property {
        Property::Key => (scope.entity, "key"),
        Property::ClassConcept => (scope.entity, "class_concept"),
        Property::DeterminerConcept => (scope.version, "determiner_concept"),
        Property::StatusConcept => (scope.version, "status_concept"),
        Property::TypeConcept => (scope.version, "type_concept"),
        Property::Template => (scope.version, "template"),
        Property::CreationTime => (scope.version, "created_at"),
        Property::VersionSequence => (scope.version, "sequence"),
        _ => return None,
    };
    Some(format!("{alias}.{column}"))
}

fn level_column(property: Property) -> Option<(SubTable, &'static str)> {
    let column = match property {
        Property::DateOfBirth => "date_of_birth",
        Property::Gender => "gender",
        Property::Occupation => "occupation",
        Property::DeceasedDate => "deceased_date",
        Property::MultipleBirthOrder => "multiple_birth_order",
        Property::MaritalStatus => "marital_status",
        Property::Specialty => "specialty",
        Property::SecurityUser => "security_user",
        Property::Industry => "industry",
        Property::IsMobile => "is_mobile",
        Property::Latitude => "lat",
        Property::Longitude => "lng",
        Property::Quantity => "quantity",
        Property::ExpiryDate => "expiry_date",
        Property::LotNumber => "lot_number",
        Property::ManufacturerModelName => "manufacturer_model_name",
        Property::OperatingSystemName => "operating_system_name",
        _ => return None,
    };
    match property.scope() {
        PropertyScope::Level(sub_table) => Some((sub_table, column)),
        _ => None,
    }
}

/// `FROM` clause of a collection, aliased `a` (item), `c` (component) and
/// `aa` (assigning authority).
fn collection_source(collection: Collection) -> &'static str {
    match collection {
        Collection::Names => {
            "entity_name a LEFT JOIN entity_name_component c ON c.name_key = a.key"
        }
        Collection::Addresses => {
            "entity_address a LEFT JOIN entity_address_component c ON c.address_key = a.key"
        }
        Collection::Identifiers => {
            "entity_identifier a LEFT JOIN assigning_authority aa ON aa.key = a.authority"
        }
        Collection::Telecoms => "entity_telecom a",
        Collection::Relationships => "entity_relationship a",
        Collection::Tags => "entity_tag a",
    }
}

/// Tags are not versioned, so every stored tag is live.
fn is_versioned(collection: Collection) -> bool {
    collection != Collection::Tags
}

fn member_column(collection: Collection, property: Property) -> Option<&'static str> {
    use Collection as C;
    use Property as P;
    Some(match (collection, property) {
        (C::Names, P::Use) => "a.name_use",
        (C::Addresses, P::Use) => "a.address_use",
        (C::Telecoms, P::Use) => "a.telecom_use",
        (C::Names | C::Addresses, P::ComponentType) => "c.component_type",
        (C::Names | C::Addresses, P::ComponentValue) => "c.value",
        (C::Identifiers, P::IdentifierValue) => "a.value",
        (C::Identifiers, P::AuthorityKey) => "a.authority",
        (C::Identifiers, P::AuthorityDomain) => "aa.domain_name",
        (C::Telecoms, P::TelecomValue) => "a.value",
        (C::Relationships, P::RelationshipType) => "a.relationship_type",
        (C::Relationships, P::RelationshipTarget) => "a.target_key",
        (C::Tags, P::TagName) => "a.name",
        (C::Tags, P::TagValue) => "a.value",
        _ => return None,
    })
}

/// Column searched by free text within a collection.
fn text_column(collection: Collection) -> Option<&'static str> {
    match collection {
        Collection::Names | Collection::Addresses => Some("c.value"),
        Collection::Identifiers | Collection::Telecoms | Collection::Tags => Some("a.value"),
        Collection::Relationships => None,
    }
}

fn compare(column: &str, op: CompareOp, value: &QueryValue) -> StorageResult<SqlFragment> {
    let fragment = match (op, value) {
        (CompareOp::Eq, QueryValue::Null) => SqlFragment::new(format!("{column} IS NULL")),
        (CompareOp::NotEq, QueryValue::Null) => SqlFragment::new(format!("{column} IS NOT NULL")),
        (_, QueryValue::Null) => {
            return Err(untranslatable(format!("{op:?} against null on {column}")).into());
        }
        (CompareOp::Contains, QueryValue::Text(text)) => {
            SqlFragment::new(format!("{column} LIKE ? ESCAPE '\\'"))
                .bind(format!("%{}%", like_escape(text)))
        }
        (CompareOp::StartsWith, QueryValue::Text(text)) => {
            SqlFragment::new(format!("{column} LIKE ? ESCAPE '\\'"))
                .bind(format!("{}%", like_escape(text)))
        }
        (CompareOp::Contains | CompareOp::StartsWith, other) => {
            return Err(untranslatable(format!("text match on non-text value {other:?}")).into());
        }
        (CompareOp::Eq, v) => SqlFragment::new(format!("{column} = ?")).bind(v),
        (CompareOp::NotEq, v) => {
            SqlFragment::new(format!("({column} IS NULL OR {column} <> ?)")).bind(v)
        }
        (CompareOp::Lt, v) => SqlFragment::new(format!("{column} < ?")).bind(v),
        (CompareOp::Lte, v) => SqlFragment::new(format!("{column} <= ?")).bind(v),
        (CompareOp::Gt, v) => SqlFragment::new(format!("{column} > ?")).bind(v),
        (CompareOp::Gte, v) => SqlFragment::new(format!("{column} >= ?")).bind(v),
    };
    Ok(fragment)
}

fn in_list(column: &str, values: &[QueryValue]) -> SqlFragment {
    let has_null = values.iter().any(QueryValue::is_null);
    let listed = SqlFragment::column_in(column, values.iter().filter(|v| !v.is_null()));
    if has_null {
        listed.or(SqlFragment::new(format!("{column} IS NULL")))
    } else {
        listed
    }
}

/// Translates predicates for the SQLite schema.
#[derive(Clone, Default)]
pub struct SqliteQueryTranslator {
    hacks: Vec<Arc<dyn QueryHack>>,
}

impl std::fmt::Debug for SqliteQueryTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteQueryTranslator")
            .field("hacks", &self.hack_names())
            .finish()
    }
}

impl SqliteQueryTranslator {
    /// A translator with no hacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// A translator with the built-in hacks.
    pub fn with_standard_hacks() -> Self {
        Self::new()
            .with_hack(Arc::new(IdentifierDomainHack))
            .with_hack(Arc::new(FreeTextNameHack))
            .with_hack(Arc::new(CreationTimeHack))
            .with_hack(Arc::new(RelationshipGuardHack))
    }

    /// Appends a hack; hacks are tried in registration order.
    pub fn with_hack(mut self, hack: Arc<dyn QueryHack>) -> Self {
        self.hacks.push(hack);
        self
    }

    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> StorageResult<SqlFragment> {
        for hack in &self.hacks {
            if let Some(fragment) = hack.translate(predicate, scope) {
                tracing::debug!(hack = hack.name(), "Predicate translated by hack");
                return Ok(fragment);
            }
        }
        match predicate {
            Predicate::True => Ok(SqlFragment::always()),
            Predicate::And(ps) => Ok(SqlFragment::join(
                ps.iter()
                    .map(|p| self.translate(p, scope))
                    .collect::<StorageResult<_>>()?,
                "AND",
                SqlFragment::always(),
            )),
            Predicate::Or(ps) => Ok(SqlFragment::join(
                ps.iter()
                    .map(|p| self.translate(p, scope))
                    .collect::<StorageResult<_>>()?,
                "OR",
                SqlFragment::never(),
            )),
            Predicate::Not(p) => Ok(self.translate(p, scope)?.not()),
            Predicate::Compare {
                property,
                op,
                value,
            } => compare(&self.column(*property, scope)?, *op, value),
            Predicate::In { property, values } => {
                Ok(in_list(&self.column(*property, scope)?, values))
            }
            Predicate::IsNull { property } => Ok(SqlFragment::new(format!(
                "{} IS NULL",
                self.column(*property, scope)?
            ))),
            Predicate::Any {
                collection,
                guard,
                inner,
            } => self.any_exists(*collection, guard.as_deref(), inner, scope),
            Predicate::FreeText { collection, text } => self.free_text(*collection, text, scope),
        }
    }

    fn column(&self, property: Property, scope: &TranslationScope) -> StorageResult<String> {
        if let Some(column) = root_column(property, scope) {
            return Ok(column);
        }
        if let Some((sub_table, column)) = level_column(property) {
            return Ok(format!("{}.{column}", sub_table.table_name()));
        }
        Err(untranslatable(format!("{property:?} is only valid inside any()")).into())
    }

    fn any_exists(
        &self,
        collection: Collection,
        guard: Option<&Predicate>,
        inner: &Predicate,
        scope: &TranslationScope,
    ) -> StorageResult<SqlFragment> {
        let mut condition = SqlFragment::new(format!("a.entity_key = {}", scope.owner_key()));
        if is_versioned(collection) {
            condition = condition.and(SqlFragment::new("a.obsolete_version_sequence IS NULL"));
        }
        if let Some(guard) = guard {
            condition = condition.and(self.translate_member(guard, collection, scope)?);
        }
        condition = condition.and(self.translate_member(inner, collection, scope)?);

        let mut out = SqlFragment::new(format!(
            "EXISTS (SELECT 1 FROM {} WHERE ",
            collection_source(collection)
        ));
        out.push(condition);
        out.push_sql(")");
        Ok(out)
    }

    fn translate_member(
        &self,
        predicate: &Predicate,
        collection: Collection,
        scope: &TranslationScope,
    ) -> StorageResult<SqlFragment> {
        let column = |property: Property| -> StorageResult<String> {
            if let Some(column) = member_column(collection, property) {
                return Ok(column.to_string());
            }
            root_column(property, scope).ok_or_else(|| {
                untranslatable(format!("{property:?} is not a member of {collection:?}")).into()
            })
        };
        match predicate {
            Predicate::True => Ok(SqlFragment::always()),
            Predicate::And(ps) => Ok(SqlFragment::join(
                ps.iter()
                    .map(|p| self.translate_member(p, collection, scope))
                    .collect::<StorageResult<_>>()?,
                "AND",
                SqlFragment::always(),
            )),
            Predicate::Or(ps) => Ok(SqlFragment::join(
                ps.iter()
                    .map(|p| self.translate_member(p, collection, scope))
                    .collect::<StorageResult<_>>()?,
                "OR",
                SqlFragment::never(),
            )),
            Predicate::Not(p) => Ok(self.translate_member(p, collection, scope)?.not()),
            Predicate::Compare {
                property,
                op,
                value,
            } => compare(&column(*property)?, *op, value),
            Predicate::In { property, values } => Ok(in_list(&column(*property)?, values)),
            Predicate::IsNull { property } => {
                Ok(SqlFragment::new(format!("{} IS NULL", column(*property)?)))
            }
            Predicate::Any { .. } | Predicate::FreeText { .. } => {
                Err(untranslatable("nested collection predicates are not supported").into())
            }
        }
    }

    fn free_text(
        &self,
        collection: Collection,
        text: &str,
        scope: &TranslationScope,
    ) -> StorageResult<SqlFragment> {
        let column = text_column(collection)
            .ok_or_else(|| untranslatable(format!("free text over {collection:?}")))?;
        let terms = text
            .split_whitespace()
            .map(|term| {
                let mut condition =
                    SqlFragment::new(format!("a.entity_key = {}", scope.owner_key()));
                if is_versioned(collection) {
                    condition =
                        condition.and(SqlFragment::new("a.obsolete_version_sequence IS NULL"));
                }
                condition = condition.and(
                    SqlFragment::new(format!("{column} LIKE ? ESCAPE '\\'"))
                        .bind(format!("%{}%", like_escape(term))),
                );
                let mut exists = SqlFragment::new(format!(
                    "EXISTS (SELECT 1 FROM {} WHERE ",
                    collection_source(collection)
                ));
                exists.push(condition);
                exists.push_sql(")");
                exists
            })
            .collect();
        Ok(SqlFragment::join(terms, "AND", SqlFragment::always()))
    }
}

impl QueryTranslator for SqliteQueryTranslator {
    fn select_keys(
        &self,
        predicate: &Predicate,
        class_codes: &[uuid::Uuid],
    ) -> StorageResult<SqlFragment> {
        let scope = TranslationScope::default();
        let (e, v) = (scope.entity, scope.version);
        let mut statement = SqlFragment::new(format!(
            "SELECT {e}.key FROM entity {e} \
             JOIN entity_version {v} ON {v}.key = {e}.key AND {v}.obsoleted_at IS NULL"
        ));
        for sub_table in predicate.level_tables() {
            let table = sub_table.table_name();
            statement.push_sql(&format!(
                " LEFT JOIN {table} ON {table}.version_key = {v}.version_key"
            ));
        }

        let class_filter = if class_codes.is_empty() {
            SqlFragment::always()
        } else {
            SqlFragment::column_in(&format!("{e}.class_concept"), class_codes.iter().copied())
        };
        let filter = class_filter.and(self.translate(predicate, &scope)?);

        statement.push_sql(" WHERE ");
        statement.push(filter);
        statement.push_sql(&format!(" ORDER BY {e}.rowid"));
        Ok(statement)
    }

    fn count(
        &self,
        predicate: &Predicate,
        class_codes: &[uuid::Uuid],
    ) -> StorageResult<SqlFragment> {
        let mut statement = SqlFragment::new("SELECT COUNT(*) FROM (");
        statement.push(self.select_keys(predicate, class_codes)?);
        statement.push_sql(")");
        Ok(statement)
    }

    fn hack_names(&self) -> Vec<&'static str> {
        self.hacks.iter().map(|h| h.name()).collect()
    }
}

// ============================================================================
// Hacks
// ============================================================================

fn text_eq(predicate: &Predicate, property: Property) -> Option<&str> {
    match predicate {
        Predicate::Compare {
            property: p,
            op: CompareOp::Eq,
            value: QueryValue::Text(text),
        } if *p == property => Some(text),
        _ => None,
    }
}

fn key_eq(predicate: &Predicate, property: Property) -> Option<uuid::Uuid> {
    match predicate {
        Predicate::Compare {
            property: p,
            op: CompareOp::Eq,
            value: QueryValue::Key(key),
        } if *p == property => Some(*key),
        _ => None,
    }
}

/// Identifier lookup by assigning-authority domain and value.
///
/// Handles `any(identifiers, domain = d and value = v)` (in either order, or
/// with the domain test as the guard) as a single indexed join.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifierDomainHack;

impl QueryHack for IdentifierDomainHack {
    fn name(&self) -> &'static str {
        "identifier-domain"
    }

    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> Option<SqlFragment> {
        let Predicate::Any {
            collection: Collection::Identifiers,
            guard,
            inner,
        } = predicate
        else {
            return None;
        };
        let (domain, value) = match (guard.as_deref(), inner.as_ref()) {
            (Some(g), inner) => (
                text_eq(g, Property::AuthorityDomain)?,
                text_eq(inner, Property::IdentifierValue)?,
            ),
            (None, Predicate::And(parts)) if parts.len() == 2 => {
                let (a, b) = (&parts[0], &parts[1]);
                match (
                    text_eq(a, Property::AuthorityDomain),
                    text_eq(b, Property::IdentifierValue),
                ) {
                    (Some(d), Some(v)) => (d, v),
                    _ => (
                        text_eq(b, Property::AuthorityDomain)?,
                        text_eq(a, Property::IdentifierValue)?,
                    ),
                }
            }
            _ => return None,
        };
        Some(
            SqlFragment::new(format!(
                "{} IN (SELECT i.entity_key FROM entity_identifier i \
                 JOIN assigning_authority aa ON aa.key = i.authority \
                 WHERE aa.domain_name = ? AND i.value = ? AND i.obsolete_version_sequence IS NULL)",
                scope.owner_key()
            ))
            .bind(domain)
            .bind(value),
        )
    }
}

/// Free-text search over name and address components.
///
/// Every whitespace-separated term must occur in some live component. Blank
/// text is left to the generic translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeTextNameHack;

impl QueryHack for FreeTextNameHack {
    fn name(&self) -> &'static str {
        "free-text-name"
    }

    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> Option<SqlFragment> {
        let Predicate::FreeText { collection, text } = predicate else {
            return None;
        };
        let (table, component_table, parent_column) = match collection {
            Collection::Names => ("entity_name", "entity_name_component", "name_key"),
            Collection::Addresses => ("entity_address", "entity_address_component", "address_key"),
            _ => return None,
        };
        let terms: Vec<&str> = text.split_whitespace().collect();
        if terms.is_empty() {
            return None;
        }
        let parts = terms
            .into_iter()
            .map(|term| {
                SqlFragment::new(format!(
                    "{} IN (SELECT n.entity_key FROM {table} n \
                     JOIN {component_table} nc ON nc.{parent_column} = n.key \
                     WHERE n.obsolete_version_sequence IS NULL AND nc.value LIKE ? ESCAPE '\\')",
                    scope.owner_key()
                ))
                .bind(format!("%{}%", like_escape(term)))
            })
            .collect();
        Some(SqlFragment::join(parts, "AND", SqlFragment::always()))
    }
}

/// Range comparisons on version creation time.
///
/// Compares through `julianday()` so stored and bound timestamps are compared
/// as instants (to the millisecond) rather than as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreationTimeHack;

impl QueryHack for CreationTimeHack {
    fn name(&self) -> &'static str {
        "creation-time"
    }

    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> Option<SqlFragment> {
        let Predicate::Compare {
            property: Property::CreationTime,
            op,
            value: QueryValue::Timestamp(at),
        } = predicate
        else {
            return None;
        };
        let op = match op {
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            _ => return None,
        };
        Some(
            SqlFragment::new(format!(
                "julianday({}.created_at) {op} julianday(?)",
                scope.version
            ))
            .bind(SqlParam::Timestamp(*at)),
        )
    }
}

/// Relationship lookups narrowed by relationship type.
///
/// Handles `any(relationships where type = t, target = k)` and
/// `target in (...)` as a single indexed lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipGuardHack;

impl QueryHack for RelationshipGuardHack {
    fn name(&self) -> &'static str {
        "relationship-guard"
    }

    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> Option<SqlFragment> {
        let Predicate::Any {
            collection: Collection::Relationships,
            guard: Some(guard),
            inner,
        } = predicate
        else {
            return None;
        };
        let relationship_type = key_eq(guard, Property::RelationshipType)?;
        let targets: Vec<uuid::Uuid> = match inner.as_ref() {
            Predicate::In {
                property: Property::RelationshipTarget,
                values,
            } => values
                .iter()
                .map(|v| match v {
                    QueryValue::Key(k) => Some(*k),
                    _ => None,
                })
                .collect::<Option<_>>()?,
            other => vec![key_eq(other, Property::RelationshipTarget)?],
        };
        if targets.is_empty() {
            return None;
        }
        let mut fragment = SqlFragment::new(format!(
            "{} IN (SELECT r.entity_key FROM entity_relationship r \
             WHERE r.obsolete_version_sequence IS NULL AND r.relationship_type = ? AND ",
            scope.owner_key()
        ))
        .bind(relationship_type);
        fragment.push(SqlFragment::column_in("r.target_key", targets));
        fragment.push_sql(")");
        Some(fragment)
    }
}
