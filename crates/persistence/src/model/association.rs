//! Child records owned by an entity's version chain.
//!
//! Every association except [`EntityTag`] is versioned: it records the owner
//! sequence at which it became effective and the sequence at which it was
//! obsoleted, so any prior owner version can be reconstructed with the
//! associations valid at that time. Tags use plain replace semantics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::entity::Entity;
use super::reference::{AssigningAuthority, Concept, Ref, ref_key};
use super::version::Identified;

/// Common behaviour of association items.
pub trait Association: Identified + Clone {
    /// Assigns the storage key.
    fn set_key(&mut self, key: Uuid);

    /// Compares content, ignoring keys and whether references are loaded.
    fn same_content(&self, other: &Self) -> bool;
}

/// One ordered part of a name or address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component type (given, family, city, ...).
    pub component_type: Option<Ref<Concept>>,
    /// Component text.
    pub value: String,
}

impl Component {
    /// Creates a typed component.
    pub fn new(component_type: Uuid, value: impl Into<String>) -> Self {
        Self {
            component_type: Some(Ref::Key(component_type)),
            value: value.into(),
        }
    }

    /// Creates an untyped component.
    pub fn untyped(value: impl Into<String>) -> Self {
        Self {
            component_type: None,
            value: value.into(),
        }
    }
}

fn same_components(a: &[Component], b: &[Component]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.value == y.value && ref_key(&x.component_type) == ref_key(&y.component_type)
        })
}

/// A name with ordered components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityName {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Name use (legal, assigned, ...).
    pub name_use: Option<Ref<Concept>>,
    /// Components in display order.
    pub components: Vec<Component>,
}

impl EntityName {
    /// Creates a name with the given use and components.
    pub fn new(name_use: Uuid, components: Vec<Component>) -> Self {
        Self {
            key: None,
            name_use: Some(Ref::Key(name_use)),
            components,
        }
    }

    /// Creates a name with a single untyped component.
    pub fn simple(name_use: Uuid, value: impl Into<String>) -> Self {
        Self::new(name_use, vec![Component::untyped(value)])
    }
}

impl Identified for EntityName {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityName {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        ref_key(&self.name_use) == ref_key(&other.name_use)
            && same_components(&self.components, &other.components)
    }
}

/// An address with ordered components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAddress {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Address use (home, work, ...).
    pub address_use: Option<Ref<Concept>>,
    /// Components in display order.
    pub components: Vec<Component>,
}

impl EntityAddress {
    /// Creates an address with the given use and components.
    pub fn new(address_use: Uuid, components: Vec<Component>) -> Self {
        Self {
            key: None,
            address_use: Some(Ref::Key(address_use)),
            components,
        }
    }
}

impl Identified for EntityAddress {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityAddress {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        ref_key(&self.address_use) == ref_key(&other.address_use)
            && same_components(&self.components, &other.components)
    }
}

/// An identifier issued by an assigning authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityIdentifier {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Issuing authority.
    pub authority: Ref<AssigningAuthority>,
    /// Identifier value.
    pub value: String,
}

impl EntityIdentifier {
    /// Creates an identifier.
    pub fn new(authority: impl Into<Ref<AssigningAuthority>>, value: impl Into<String>) -> Self {
        Self {
            key: None,
            authority: authority.into(),
            value: value.into(),
        }
    }
}

impl Identified for EntityIdentifier {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityIdentifier {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.value == other.value && self.authority.key() == other.authority.key()
    }
}

/// A telecommunications address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTelecom {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Telecom use (home, work, mobile, ...).
    pub telecom_use: Option<Ref<Concept>>,
    /// URI-style value (`tel:`, `mailto:`).
    pub value: String,
}

impl EntityTelecom {
    /// Creates a telecom address.
    pub fn new(telecom_use: Uuid, value: impl Into<String>) -> Self {
        Self {
            key: None,
            telecom_use: Some(Ref::Key(telecom_use)),
            value: value.into(),
        }
    }
}

impl Identified for EntityTelecom {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityTelecom {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.value == other.value && ref_key(&self.telecom_use) == ref_key(&other.telecom_use)
    }
}

/// A typed link from the owning entity to another entity.
///
/// Targets are stored by key. The target object is only materialized, one
/// level deep, when an owner is loaded in full mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelationship {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Relationship type.
    pub relationship_type: Ref<Concept>,
    /// Key of the target entity.
    pub target_key: Uuid,
    /// Optional quantity.
    pub quantity: Option<i64>,
    /// The loaded target (full load mode only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Box<Entity>>,
}

impl EntityRelationship {
    /// Creates a relationship.
    pub fn new(relationship_type: Uuid, target_key: Uuid) -> Self {
        Self {
            key: None,
            relationship_type: Ref::Key(relationship_type),
            target_key,
            quantity: None,
            target: None,
        }
    }
}

impl Identified for EntityRelationship {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityRelationship {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.target_key == other.target_key
            && self.quantity == other.quantity
            && self.relationship_type.key() == other.relationship_type.key()
    }
}

/// A free-text note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNote {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Entity that authored the note.
    pub author_key: Option<Uuid>,
    /// Note text.
    pub text: String,
}

impl EntityNote {
    /// Creates a note.
    pub fn new(author_key: Option<Uuid>, text: impl Into<String>) -> Self {
        Self {
            key: None,
            author_key,
            text: text.into(),
        }
    }
}

impl Identified for EntityNote {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityNote {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.text == other.text && self.author_key == other.author_key
    }
}

/// A structured extension value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityExtension {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Extension type URL.
    pub url: String,
    /// Extension value.
    pub value: Value,
}

impl EntityExtension {
    /// Creates an extension.
    pub fn new(url: impl Into<String>, value: Value) -> Self {
        Self {
            key: None,
            url: url.into(),
            value,
        }
    }
}

impl Identified for EntityExtension {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityExtension {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.url == other.url && self.value == other.value
    }
}

/// How a security policy applies to the owning entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyGrant {
    /// Access denied.
    Deny,
    /// Access requires elevation.
    Elevate,
    /// Access granted.
    Grant,
}

impl PolicyGrant {
    /// Stored integer form.
    pub fn as_i64(self) -> i64 {
        match self {
            PolicyGrant::Deny => 0,
            PolicyGrant::Elevate => 1,
            PolicyGrant::Grant => 2,
        }
    }

    /// Parses the stored integer form.
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(PolicyGrant::Deny),
            1 => Some(PolicyGrant::Elevate),
            2 => Some(PolicyGrant::Grant),
            _ => None,
        }
    }
}

/// A security policy attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicyInstance {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Policy identifier (OID).
    pub policy: String,
    /// Grant type.
    pub grant: PolicyGrant,
}

impl SecurityPolicyInstance {
    /// Creates a policy instance.
    pub fn new(policy: impl Into<String>, grant: PolicyGrant) -> Self {
        Self {
            key: None,
            policy: policy.into(),
            grant,
        }
    }
}

impl Identified for SecurityPolicyInstance {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for SecurityPolicyInstance {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.policy == other.policy && self.grant == other.grant
    }
}

/// An unversioned name/value tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTag {
    /// Storage key.
    pub key: Option<Uuid>,
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl EntityTag {
    /// Creates a tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: None,
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Identified for EntityTag {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Association for EntityTag {
    fn set_key(&mut self, key: Uuid) {
        self.key = Some(key);
    }

    fn same_content(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::keys::{ComponentKeys, NameUseKeys};

    #[test]
    fn test_name_same_content_ignores_key() {
        let a = EntityName::new(
            NameUseKeys::LEGAL,
            vec![
                Component::new(ComponentKeys::GIVEN, "Justin"),
                Component::new(ComponentKeys::FAMILY, "Smith"),
            ],
        );
        let mut b = a.clone();
        b.set_key(Uuid::new_v4());
        assert!(a.same_content(&b));
    }

    #[test]
    fn test_name_component_order_matters() {
        let a = EntityName::new(
            NameUseKeys::LEGAL,
            vec![
                Component::new(ComponentKeys::GIVEN, "Justin"),
                Component::new(ComponentKeys::FAMILY, "Smith"),
            ],
        );
        let b = EntityName::new(
            NameUseKeys::LEGAL,
            vec![
                Component::new(ComponentKeys::FAMILY, "Smith"),
                Component::new(ComponentKeys::GIVEN, "Justin"),
            ],
        );
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_policy_grant_round_trip() {
        for grant in [PolicyGrant::Deny, PolicyGrant::Elevate, PolicyGrant::Grant] {
            assert_eq!(PolicyGrant::from_i64(grant.as_i64()), Some(grant));
        }
        assert_eq!(PolicyGrant::from_i64(9), None);
    }
}
