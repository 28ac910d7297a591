//! The predicate translation contract.
//!
//! A [`QueryTranslator`] turns a [`Predicate`] into a statement selecting the
//! logical keys of matching entities. Before falling back to generic
//! translation, every node of the predicate is offered to the registered
//! [`QueryHack`]s in order; the first one that returns a fragment wins.

use uuid::Uuid;

use super::fragment::SqlFragment;
use super::predicate::Predicate;
use crate::error::StorageResult;
use crate::model::EntityKindTag;

/// Table aliases visible to a translated fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationScope {
    /// Alias of the logical `entity` row.
    pub entity: &'static str,
    /// Alias of the current `entity_version` row.
    pub version: &'static str,
}

impl Default for TranslationScope {
    fn default() -> Self {
        Self {
            entity: "e",
            version: "v",
        }
    }
}

impl TranslationScope {
    /// SQL expression for the owning entity's logical key.
    pub fn owner_key(&self) -> String {
        format!("{}.key", self.entity)
    }
}

/// A hand-written override for one predicate shape.
///
/// A hack must agree with the generic translator on argument order and null
/// handling. When it recognises a shape but cannot honour every part of it,
/// it declines by returning `None`.
pub trait QueryHack: Send + Sync {
    /// Name used in log records.
    fn name(&self) -> &'static str;

    /// Translates `predicate`, or returns `None` to decline.
    fn translate(&self, predicate: &Predicate, scope: &TranslationScope) -> Option<SqlFragment>;
}

/// Translates predicates into key-selecting statements.
pub trait QueryTranslator: Send + Sync {
    /// Builds a statement returning `key` for each entity whose current
    /// version matches `predicate` and whose class code is one of
    /// `class_codes` (unrestricted when empty), in insertion order.
    fn select_keys(
        &self,
        predicate: &Predicate,
        class_codes: &[Uuid],
    ) -> StorageResult<SqlFragment>;

    /// Builds a statement returning the number of matches.
    fn count(&self, predicate: &Predicate, class_codes: &[Uuid]) -> StorageResult<SqlFragment>;

    /// Names of the registered hacks, in the order they are tried.
    fn hack_names(&self) -> Vec<&'static str>;
}

/// Requested kind plus its descendants, for documentation in log records.
pub fn describe_target(tag: EntityKindTag) -> String {
    tag.descendants()
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join("|")
}
