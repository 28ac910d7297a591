//! Shared reference records and the [`Ref`] field type that points at them.
//!
//! Reference records (concepts, assigning authorities, security users) are
//! vocabulary shared by many owners. An owner never embeds them; it stores a
//! key. Callers may still supply the record inline, in which case it is
//! resolved (found or inserted) before the owner is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::version::Identified;

/// A foreign-key-valued field: either a bare key or an inline object.
///
/// Absence is modelled with `Option<Ref<T>>` on the owning field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ref<T> {
    /// A bare key to an existing record.
    Key(Uuid),
    /// An inline object, with or without a key.
    Object(T),
}

impl<T: Identified> Ref<T> {
    /// Returns the referenced key, if known.
    pub fn key(&self) -> Option<Uuid> {
        match self {
            Ref::Key(key) => Some(*key),
            Ref::Object(obj) => obj.key(),
        }
    }

    /// Returns the inline object, if one was supplied or loaded.
    pub fn object(&self) -> Option<&T> {
        match self {
            Ref::Key(_) => None,
            Ref::Object(obj) => Some(obj),
        }
    }

    /// Returns `true` if this reference carries a keyed object.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Ref::Object(obj) if obj.key().is_some())
    }
}

impl<T> From<Uuid> for Ref<T> {
    fn from(key: Uuid) -> Self {
        Ref::Key(key)
    }
}

impl From<Concept> for Ref<Concept> {
    fn from(concept: Concept) -> Self {
        Ref::Object(concept)
    }
}

impl From<AssigningAuthority> for Ref<AssigningAuthority> {
    fn from(authority: AssigningAuthority) -> Self {
        Ref::Object(authority)
    }
}

impl From<SecurityUser> for Ref<SecurityUser> {
    fn from(user: SecurityUser) -> Self {
        Ref::Object(user)
    }
}

/// Returns the key of an optional reference.
pub fn ref_key<T: Identified>(reference: &Option<Ref<T>>) -> Option<Uuid> {
    reference.as_ref().and_then(Ref::key)
}

/// A vocabulary concept (status, classification, use codes, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    /// Concept key.
    pub key: Option<Uuid>,
    /// Unique mnemonic.
    pub mnemonic: String,
    /// Human readable name.
    pub display_name: Option<String>,
}

impl Concept {
    /// Creates an unkeyed concept identified by its mnemonic.
    pub fn new(mnemonic: impl Into<String>) -> Self {
        Self {
            key: None,
            mnemonic: mnemonic.into(),
            display_name: None,
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl Identified for Concept {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

/// An identity domain that issues identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssigningAuthority {
    /// Authority key.
    pub key: Option<Uuid>,
    /// Unique domain name (e.g. `NHID`).
    pub domain_name: String,
    /// Descriptive name.
    pub name: Option<String>,
    /// Object identifier.
    pub oid: Option<String>,
    /// Canonical URL.
    pub url: Option<String>,
}

impl AssigningAuthority {
    /// Creates an unkeyed authority identified by its domain name.
    pub fn new(domain_name: impl Into<String>) -> Self {
        Self {
            key: None,
            domain_name: domain_name.into(),
            name: None,
            oid: None,
            url: None,
        }
    }

    /// Sets the object identifier.
    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = Some(oid.into());
        self
    }
}

impl Identified for AssigningAuthority {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

/// A security principal.
///
/// Security users are consumed by the authorization service; the engine
/// records them as the actor on every version it writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityUser {
    /// User key.
    pub key: Option<Uuid>,
    /// Unique login name.
    pub user_name: String,
    /// Contact e-mail.
    pub email: Option<String>,
    /// When the user was created.
    pub created_at: Option<DateTime<Utc>>,
    /// When the user was obsoleted.
    pub obsoleted_at: Option<DateTime<Utc>>,
}

impl SecurityUser {
    /// Creates an unkeyed user.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            key: None,
            user_name: user_name.into(),
            email: None,
            created_at: None,
            obsoleted_at: None,
        }
    }

    /// Returns `true` if the user has not been obsoleted.
    pub fn is_active(&self) -> bool {
        self.obsoleted_at.is_none()
    }
}

impl Identified for SecurityUser {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_key() {
        let key = Uuid::new_v4();
        let bare: Ref<Concept> = Ref::Key(key);
        assert_eq!(bare.key(), Some(key));
        assert!(bare.object().is_none());
        assert!(!bare.is_loaded());

        let inline = Ref::Object(Concept::new("Thing"));
        assert_eq!(inline.key(), None);
        assert!(!inline.is_loaded());

        let mut concept = Concept::new("Thing");
        concept.key = Some(key);
        let loaded = Ref::Object(concept);
        assert!(loaded.is_loaded());
        assert_eq!(ref_key(&Some(loaded)), Some(key));
    }

    #[test]
    fn test_ref_serde_shape() {
        let key = Uuid::nil();
        let value = serde_json::to_value(Ref::<Concept>::Key(key)).unwrap();
        assert_eq!(value["key"], key.to_string());
    }
}
