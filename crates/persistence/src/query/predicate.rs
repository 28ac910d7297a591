//! Declarative predicates over entity properties.
//!
//! A [`Predicate`] is a boolean tree over [`Property`] comparisons. Root and
//! sub-table properties test the entity's current version; member properties
//! are only meaningful inside [`Predicate::Any`], which matches when at least
//! one live item of a child collection satisfies the inner predicate (and the
//! optional guard evaluated first).

// Variants are named after the properties and operators they select
#![allow(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::SubTable;

/// A child collection that can be searched with [`Predicate::Any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Names,
    Addresses,
    Identifiers,
    Telecoms,
    Relationships,
    Tags,
}

/// Where a property lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyScope {
    /// On `entity` or `entity_version`.
    Root,
    /// On a sub-table joined by version key.
    Level(SubTable),
    /// On an item of a child collection.
    Member(&'static [Collection]),
}

/// A searchable property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Property {
    // Root
    Key,
    ClassConcept,
    DeterminerConcept,
    StatusConcept,
    TypeConcept,
    Template,
    CreationTime,
    VersionSequence,
    // Sub-table levels
    DateOfBirth,
    Gender,
    Occupation,
    DeceasedDate,
    MultipleBirthOrder,
    MaritalStatus,
    Specialty,
    SecurityUser,
    Industry,
    IsMobile,
    Latitude,
    Longitude,
    Quantity,
    ExpiryDate,
    LotNumber,
    ManufacturerModelName,
    OperatingSystemName,
    // Collection members
    Use,
    ComponentType,
    ComponentValue,
    IdentifierValue,
    AuthorityKey,
    AuthorityDomain,
    TelecomValue,
    RelationshipType,
    RelationshipTarget,
    TagName,
    TagValue,
}

impl Property {
    /// Where this property is stored.
    pub fn scope(self) -> PropertyScope {
        use Collection as C;
        match self {
            Property::Key
            | Property::ClassConcept
            | Property::DeterminerConcept
            | Property::StatusConcept
            | Property::TypeConcept
            | Property::Template
            | Property::CreationTime
            | Property::VersionSequence => PropertyScope::Root,
            Property::DateOfBirth | Property::Gender | Property::Occupation => {
                PropertyScope::Level(SubTable::Person)
            }
            Property::DeceasedDate | Property::MultipleBirthOrder | Property::MaritalStatus => {
                PropertyScope::Level(SubTable::Patient)
            }
            Property::Specialty => PropertyScope::Level(SubTable::Provider),
            Property::SecurityUser => PropertyScope::Level(SubTable::UserEntity),
            Property::Industry => PropertyScope::Level(SubTable::Organization),
            Property::IsMobile | Property::Latitude | Property::Longitude => {
                PropertyScope::Level(SubTable::Place)
            }
            Property::Quantity | Property::ExpiryDate => PropertyScope::Level(SubTable::Material),
            Property::LotNumber => PropertyScope::Level(SubTable::ManufacturedMaterial),
            Property::ManufacturerModelName | Property::OperatingSystemName => {
                PropertyScope::Level(SubTable::Device)
            }
            Property::Use => PropertyScope::Member(&[C::Names, C::Addresses, C::Telecoms]),
            Property::ComponentType | Property::ComponentValue => {
                PropertyScope::Member(&[C::Names, C::Addresses])
            }
            Property::IdentifierValue | Property::AuthorityKey | Property::AuthorityDomain => {
                PropertyScope::Member(&[C::Identifiers])
            }
            Property::TelecomValue => PropertyScope::Member(&[C::Telecoms]),
            Property::RelationshipType | Property::RelationshipTarget => {
                PropertyScope::Member(&[C::Relationships])
            }
            Property::TagName | Property::TagValue => PropertyScope::Member(&[C::Tags]),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Substring match (text only).
    Contains,
    /// Prefix match (text only).
    StartsWith,
}

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryValue {
    Key(Uuid),
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Bool(bool),
    Null,
}

impl QueryValue {
    /// Returns `true` for [`QueryValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }
}

impl From<Uuid> for QueryValue {
    fn from(v: Uuid) -> Self {
        QueryValue::Key(v)
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Text(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Text(v)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Integer(v)
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::Float(v)
    }
}

impl From<NaiveDate> for QueryValue {
    fn from(v: NaiveDate) -> Self {
        QueryValue::Date(v)
    }
}

impl From<DateTime<Utc>> for QueryValue {
    fn from(v: DateTime<Utc>) -> Self {
        QueryValue::Timestamp(v)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

/// A boolean predicate over entity properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    /// Matches everything.
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        property: Property,
        op: CompareOp,
        value: QueryValue,
    },
    In {
        property: Property,
        values: Vec<QueryValue>,
    },
    IsNull {
        property: Property,
    },
    /// At least one live item of `collection` satisfies `guard` and `inner`.
    Any {
        collection: Collection,
        guard: Option<Box<Predicate>>,
        inner: Box<Predicate>,
    },
    /// Free-text search across the text of a collection's items.
    FreeText {
        collection: Collection,
        text: String,
    },
}

impl Predicate {
    /// `property = value`.
    pub fn equals(property: Property, value: impl Into<QueryValue>) -> Self {
        Self::compare(property, CompareOp::Eq, value)
    }

    /// `property <op> value`.
    pub fn compare(property: Property, op: CompareOp, value: impl Into<QueryValue>) -> Self {
        Predicate::Compare {
            property,
            op,
            value: value.into(),
        }
    }

    /// Substring match on a text property.
    pub fn contains(property: Property, text: impl Into<String>) -> Self {
        Self::compare(property, CompareOp::Contains, QueryValue::Text(text.into()))
    }

    /// `property IN (values)`.
    pub fn is_in<V: Into<QueryValue>>(
        property: Property,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            property,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Any live item of `collection` matches `inner`.
    pub fn any(collection: Collection, inner: Predicate) -> Self {
        Predicate::Any {
            collection,
            guard: None,
            inner: Box::new(inner),
        }
    }

    /// Any live item of `collection` matching `guard` also matches `inner`.
    pub fn any_where(collection: Collection, guard: Predicate, inner: Predicate) -> Self {
        Predicate::Any {
            collection,
            guard: Some(Box::new(guard)),
            inner: Box::new(inner),
        }
    }

    /// Conjunction.
    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(predicates.into_iter().collect())
    }

    /// Disjunction.
    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(predicates.into_iter().collect())
    }

    /// Negation.
    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Restricts to the active statuses.
    pub fn active() -> Self {
        Self::is_in(
            Property::StatusConcept,
            crate::model::StatusKeys::ACTIVE_SET,
        )
    }

    /// Every sub-table the predicate touches outside of `Any`.
    pub fn level_tables(&self) -> Vec<SubTable> {
        let mut tables = Vec::new();
        self.collect_levels(&mut tables);
        tables.sort();
        tables.dedup();
        tables
    }

    fn collect_levels(&self, out: &mut Vec<SubTable>) {
        match self {
            Predicate::True | Predicate::Any { .. } | Predicate::FreeText { .. } => {}
            Predicate::And(ps) | Predicate::Or(ps) => {
                ps.iter().for_each(|p| p.collect_levels(out));
            }
            Predicate::Not(p) => p.collect_levels(out),
            Predicate::Compare { property, .. }
            | Predicate::In { property, .. }
            | Predicate::IsNull { property } => {
                if let PropertyScope::Level(t) = property.scope() {
                    out.push(t);
                }
            }
        }
    }
}
