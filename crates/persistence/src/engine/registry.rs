//! Classification code dispatch.
//!
//! [`ClassKeyRegistry`] maps every concrete [`EntityKindTag`] to exactly one
//! classification code and back. It is built once at startup; an incomplete or
//! ambiguous registration fails the build.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::ConfigurationError;
use crate::model::EntityKindTag;

/// One-to-one map between entity kinds and classification codes.
#[derive(Debug, Clone)]
pub struct ClassKeyRegistry {
    by_code: HashMap<Uuid, EntityKindTag>,
    by_tag: HashMap<EntityKindTag, Uuid>,
}

/// Collects registrations for a [`ClassKeyRegistry`].
#[derive(Debug, Default)]
pub struct ClassKeyRegistryBuilder {
    entries: Vec<(EntityKindTag, Uuid)>,
}

impl ClassKeyRegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `code` as the classification code of `tag`.
    pub fn register(mut self, tag: EntityKindTag, code: Uuid) -> Self {
        self.entries.push((tag, code));
        self
    }

    /// Registers every kind with its conventional code.
    pub fn register_defaults(mut self) -> Self {
        for tag in EntityKindTag::ALL {
            self.entries.push((tag, tag.default_class_key()));
        }
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// * [`ConfigurationError::DuplicateRegistration`] if a kind is registered twice
    /// * [`ConfigurationError::DuplicateClassCode`] if two kinds share a code
    /// * [`ConfigurationError::MissingRegistration`] if a kind has no code
    pub fn build(self) -> Result<ClassKeyRegistry, ConfigurationError> {
        let mut by_code = HashMap::new();
        let mut by_tag = HashMap::new();
        for (tag, code) in self.entries {
            if by_tag.insert(tag, code).is_some() {
                return Err(ConfigurationError::DuplicateRegistration { tag });
            }
            if let Some(first) = by_code.insert(code, tag) {
                return Err(ConfigurationError::DuplicateClassCode {
                    code,
                    first,
                    second: tag,
                });
            }
        }
        if let Some(tag) = EntityKindTag::ALL
            .into_iter()
            .find(|t| !by_tag.contains_key(t))
        {
            return Err(ConfigurationError::MissingRegistration { tag });
        }
        tracing::debug!(kinds = by_tag.len(), "Built classification registry");
        Ok(ClassKeyRegistry { by_code, by_tag })
    }
}

impl ClassKeyRegistry {
    /// Starts a registration.
    pub fn builder() -> ClassKeyRegistryBuilder {
        ClassKeyRegistryBuilder::new()
    }

    /// The registry of conventional codes.
    pub fn standard() -> Self {
        let by_tag: HashMap<_, _> = EntityKindTag::ALL
            .into_iter()
            .map(|t| (t, t.default_class_key()))
            .collect();
        let by_code = by_tag.iter().map(|(t, c)| (*c, *t)).collect();
        Self { by_code, by_tag }
    }

    /// Kind registered for `code`.
    pub fn tag_for(&self, code: Uuid) -> Option<EntityKindTag> {
        self.by_code.get(&code).copied()
    }

    /// Code registered for `tag`.
    pub fn class_code(&self, tag: EntityKindTag) -> Uuid {
        self.by_tag
            .get(&tag)
            .copied()
            .unwrap_or_else(|| tag.default_class_key())
    }

    /// Codes a query for `tag` must match: the kind and every descendant.
    ///
    /// Empty for the generic root, which matches every stored code.
    pub fn codes_for(&self, tag: EntityKindTag) -> Vec<Uuid> {
        if tag == EntityKindTag::Entity {
            return Vec::new();
        }
        tag.descendants()
            .into_iter()
            .map(|t| self.class_code(t))
            .collect()
    }

    /// Kind stored under `code`, treating unmapped codes as the generic root.
    pub fn stored_tag(&self, code: Uuid) -> EntityKindTag {
        self.tag_for(code).unwrap_or(EntityKindTag::Entity)
    }

    /// Concrete kind to materialize for a record stored under `code` when
    /// `requested` was asked for.
    ///
    /// Returns `None` if the record is not an instance of `requested`. An
    /// unmapped code yields the generic shape when the generic root was
    /// requested.
    pub fn resolve_read(&self, requested: EntityKindTag, code: Uuid) -> Option<EntityKindTag> {
        match self.tag_for(code) {
            Some(tag) if tag.is_a(requested) => Some(tag),
            Some(_) => None,
            None => {
                tracing::warn!(
                    class_code = %code,
                    requested = %requested,
                    "Unmapped classification code, returning generic shape"
                );
                (requested == EntityKindTag::Entity).then_some(EntityKindTag::Entity)
            }
        }
    }
}

impl Default for ClassKeyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityClassKeys;

    #[test]
    fn test_standard_round_trip() {
        let registry = ClassKeyRegistry::standard();
        for tag in EntityKindTag::ALL {
            assert_eq!(registry.tag_for(registry.class_code(tag)), Some(tag));
        }
    }

    #[test]
    fn test_builder_matches_standard() {
        let built = ClassKeyRegistry::builder()
            .register_defaults()
            .build()
            .unwrap();
        assert_eq!(
            built.tag_for(EntityClassKeys::PATIENT),
            Some(EntityKindTag::Patient)
        );
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let mut builder = ClassKeyRegistry::builder();
        for tag in EntityKindTag::ALL {
            let code = if tag == EntityKindTag::Device {
                EntityClassKeys::PLACE
            } else {
                tag.default_class_key()
            };
            builder = builder.register(tag, code);
        }
        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateClassCode {
                first: EntityKindTag::Place,
                second: EntityKindTag::Device,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_and_missing_registration() {
        let err = ClassKeyRegistry::builder()
            .register_defaults()
            .register(EntityKindTag::Place, Uuid::new_v4())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DuplicateRegistration {
                tag: EntityKindTag::Place
            }
        ));

        let err = ClassKeyRegistry::builder()
            .register(EntityKindTag::Entity, EntityClassKeys::ENTITY)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingRegistration {
                tag: EntityKindTag::Person
            }
        ));
    }

    #[test]
    fn test_codes_for_includes_descendants() {
        let registry = ClassKeyRegistry::standard();
        assert!(registry.codes_for(EntityKindTag::Entity).is_empty());
        let people = registry.codes_for(EntityKindTag::Person);
        assert_eq!(people.len(), 4);
        assert!(people.contains(&EntityClassKeys::PATIENT));
        assert!(!people.contains(&EntityClassKeys::PLACE));
    }

    #[test]
    fn test_resolve_read() {
        let registry = ClassKeyRegistry::standard();
        assert_eq!(
            registry.resolve_read(EntityKindTag::Entity, EntityClassKeys::PATIENT),
            Some(EntityKindTag::Patient)
        );
        assert_eq!(
            registry.resolve_read(EntityKindTag::Place, EntityClassKeys::PATIENT),
            None
        );

        let unmapped = Uuid::new_v4();
        assert_eq!(
            registry.resolve_read(EntityKindTag::Entity, unmapped),
            Some(EntityKindTag::Entity)
        );
        assert_eq!(registry.resolve_read(EntityKindTag::Person, unmapped), None);
        assert_eq!(registry.stored_tag(unmapped), EntityKindTag::Entity);
    }
}
