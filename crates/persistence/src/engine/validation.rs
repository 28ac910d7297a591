//! Domain validation ("detected issues").
//!
//! A [`Validator`] inspects an entity before anything is written and reports
//! every issue it finds. Blocking issues abort the write with
//! [`ValidationError::DetectedIssues`]; the rest are stored on the entity as
//! the [`DETECTED_ISSUES_EXTENSION`] extension.
//!
//! The classification reference is resolved before validation runs, so an
//! inline class concept arrives with its stored key.

use crate::error::{DetectedIssue, StorageResult, ValidationError};
use crate::model::{Entity, EntityExtension, EntityKindTag, Ref};

use super::registry::ClassKeyRegistry;

/// Extension url under which non-blocking issues are stored.
pub const DETECTED_ISSUES_EXTENSION: &str = "urn:helios:extension:detected-issues";

/// Which write is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// A new logical record.
    Insert,
    /// A new version of an existing record.
    Update,
}

/// Business-rule checks run before every insert and update.
pub trait Validator: Send + Sync {
    /// Returns every issue found, blocking or not.
    fn validate(
        &self,
        entity: &Entity,
        phase: WritePhase,
        registry: &ClassKeyRegistry,
    ) -> Vec<DetectedIssue>;
}

/// The built-in rules.
///
/// Blocking: classification code contradicting the kind, names without
/// content, identifiers without a value, deceased before birth.
/// Non-blocking: a person with no name and no identifier, a place with only
/// one coordinate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardValidator;

impl Validator for StandardValidator {
    fn validate(
        &self,
        entity: &Entity,
        phase: WritePhase,
        registry: &ClassKeyRegistry,
    ) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();
        check_class(entity, registry, &mut issues);

        for (i, name) in entity.names.iter().flatten().enumerate() {
            if name.components.iter().all(|c| c.value.trim().is_empty()) {
                issues.push(DetectedIssue::error(
                    "name.empty",
                    format!("name {i} has no component values"),
                ));
            }
        }
        for (i, identifier) in entity.identifiers.iter().flatten().enumerate() {
            if identifier.value.trim().is_empty() {
                issues.push(DetectedIssue::error(
                    "identifier.empty",
                    format!("identifier {i} has no value"),
                ));
            }
        }

        if let (Some(person), Some(patient)) = (entity.kind.person(), entity.kind.patient()) {
            if let (Some(born), Some(died)) = (person.date_of_birth, patient.deceased_date) {
                if died < born {
                    issues.push(DetectedIssue::error(
                        "lifespan.order",
                        format!("deceased date {died} precedes date of birth {born}"),
                    ));
                }
            }
        }

        if entity.tag().is_a(EntityKindTag::Person) && lacks_identity(entity, phase) {
            issues.push(DetectedIssue::warning(
                "identity.missing",
                "person has neither a name nor an identifier",
            ));
        }

        if let Some(place) = entity.kind.place() {
            if place.lat.is_some() != place.lng.is_some() {
                issues.push(DetectedIssue::warning(
                    "geo.partial",
                    "only one of latitude and longitude is set",
                ));
            }
        }
        issues
    }
}

fn check_class(entity: &Entity, registry: &ClassKeyRegistry, issues: &mut Vec<DetectedIssue>) {
    let tag = entity.tag();
    let Some(class) = &entity.class_concept else {
        return;
    };
    let mismatch = match class.key() {
        Some(code) => match registry.tag_for(code) {
            Some(claimed) => claimed != tag,
            None => tag != EntityKindTag::Entity,
        },
        None => tag != EntityKindTag::Entity,
    };
    if mismatch {
        let shown = match (class, class.key()) {
            (Ref::Key(k), _) => k.to_string(),
            (Ref::Object(c), Some(code)) => format!("{} ({code})", c.mnemonic),
            (Ref::Object(c), None) => format!("{} (unresolved)", c.mnemonic),
        };
        issues.push(DetectedIssue::error(
            "class.mismatch",
            format!("classification {shown} does not identify a {tag}"),
        ));
    }
}

/// On update only collections actually supplied are known.
fn lacks_identity(entity: &Entity, phase: WritePhase) -> bool {
    let empty = |len: Option<usize>| match phase {
        WritePhase::Insert => len.unwrap_or(0) == 0,
        WritePhase::Update => len == Some(0),
    };
    empty(entity.names.as_ref().map(Vec::len))
        && empty(entity.identifiers.as_ref().map(Vec::len))
}

/// Applies validation results to an entity about to be written.
///
/// Fails with every issue if any is blocking. Otherwise the engine-managed
/// extension is replaced with the current warnings. When the caller left
/// `extensions` unset, `stored` supplies the live extensions so the rest of
/// the collection is carried over unchanged.
pub fn apply_issues<F>(entity: &mut Entity, issues: Vec<DetectedIssue>, stored: F) -> StorageResult<()>
where
    F: FnOnce() -> StorageResult<Vec<EntityExtension>>,
{
    if issues.iter().any(DetectedIssue::is_blocking) {
        return Err(ValidationError::DetectedIssues { issues }.into());
    }

    let mut extensions = match entity.extensions.take() {
        Some(supplied) => supplied,
        None => {
            let stored = stored()?;
            let had_issues = stored.iter().any(|e| e.url == DETECTED_ISSUES_EXTENSION);
            if issues.is_empty() && !had_issues {
                return Ok(());
            }
            stored
        }
    };

    extensions.retain(|e| e.url != DETECTED_ISSUES_EXTENSION);
    if !issues.is_empty() {
        tracing::debug!(count = issues.len(), "Recording non-blocking issues");
        extensions.push(EntityExtension::new(
            DETECTED_ISSUES_EXTENSION,
            serde_json::to_value(&issues)?,
        ));
    }
    entity.extensions = Some(extensions);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::model::{
        AssigningAuthority, Component, Concept, EntityClassKeys, EntityIdentifier, EntityKind,
        EntityName, NameUseKeys, PatientData, PersonData, PlaceData,
    };
    use chrono::NaiveDate;

    fn patient(born: &str, died: Option<&str>) -> Entity {
        Entity::new(EntityKind::Patient {
            person: PersonData {
                date_of_birth: Some(NaiveDate::parse_from_str(born, "%Y-%m-%d").unwrap()),
                ..Default::default()
            },
            patient: PatientData {
                deceased_date: died.map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").unwrap()),
                ..Default::default()
            },
        })
        .with_names(vec![EntityName::simple(NameUseKeys::LEGAL, "Smith")])
    }

    fn codes(issues: &[DetectedIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_blocking_rules_collect_every_issue() {
        let entity = patient("2000-01-01", Some("1999-12-31"))
            .with_class_concept(EntityClassKeys::PLACE)
            .with_names(vec![EntityName::new(
                NameUseKeys::LEGAL,
                vec![Component::untyped("  ")],
            )])
            .with_identifiers(vec![EntityIdentifier::new(AssigningAuthority::new("MRN"), "")]);
        let issues =
            StandardValidator.validate(&entity, WritePhase::Insert, &ClassKeyRegistry::standard());
        assert_eq!(
            codes(&issues),
            vec!["class.mismatch", "name.empty", "identifier.empty", "lifespan.order"]
        );
        assert!(issues.iter().all(DetectedIssue::is_blocking));
    }

    #[test]
    fn test_generic_entity_may_use_unmapped_class() {
        let entity = Entity::new(EntityKind::Entity).with_class_concept(uuid::Uuid::new_v4());
        let issues =
            StandardValidator.validate(&entity, WritePhase::Insert, &ClassKeyRegistry::standard());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_class_mismatch_names_the_concept() {
        let registry = ClassKeyRegistry::standard();
        let place = Entity::new(EntityKind::Place {
            place: PlaceData::default(),
        });

        let mut unresolved = place.clone();
        unresolved.class_concept = Some(Ref::Object(Concept::new("Patient")));
        let issues = StandardValidator.validate(&unresolved, WritePhase::Insert, &registry);
        assert_eq!(issues[0].text, "classification Patient (unresolved) does not identify a Place");

        let mut concept = Concept::new("Patient");
        concept.key = Some(EntityClassKeys::PATIENT);
        let mut resolved = place;
        resolved.class_concept = Some(Ref::Object(concept));
        let issues = StandardValidator.validate(&resolved, WritePhase::Insert, &registry);
        assert_eq!(
            issues[0].text,
            format!(
                "classification Patient ({}) does not identify a Place",
                EntityClassKeys::PATIENT
            )
        );
    }

    #[test]
    fn test_identity_warning_depends_on_phase() {
        let entity = Entity::new(EntityKind::Person {
            person: PersonData::default(),
        });
        let registry = ClassKeyRegistry::standard();
        assert_eq!(
            codes(&StandardValidator.validate(&entity, WritePhase::Insert, &registry)),
            vec!["identity.missing"]
        );
        assert!(
            StandardValidator
                .validate(&entity, WritePhase::Update, &registry)
                .is_empty()
        );
    }

    #[test]
    fn test_apply_issues_records_warnings() {
        let mut entity = Entity::new(EntityKind::Place {
            place: PlaceData {
                is_mobile: false,
                lat: Some(1.0),
                lng: None,
            },
        });
        let issues =
            StandardValidator.validate(&entity, WritePhase::Insert, &ClassKeyRegistry::standard());
        apply_issues(&mut entity, issues, || Ok(Vec::new())).unwrap();

        let extensions = entity.extensions.unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].url, DETECTED_ISSUES_EXTENSION);
        assert_eq!(extensions[0].value[0]["code"], "geo.partial");
    }

    #[test]
    fn test_apply_issues_strips_stale_extension() {
        let mut entity = Entity::new(EntityKind::Entity);
        let stored = vec![
            EntityExtension::new("urn:other", serde_json::json!(1)),
            EntityExtension::new(DETECTED_ISSUES_EXTENSION, serde_json::json!([])),
        ];
        apply_issues(&mut entity, Vec::new(), || Ok(stored)).unwrap();
        let extensions = entity.extensions.unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].url, "urn:other");
    }

    #[test]
    fn test_apply_issues_untouched_without_news() {
        let mut entity = Entity::new(EntityKind::Entity);
        apply_issues(&mut entity, Vec::new(), || Ok(Vec::new())).unwrap();
        assert!(entity.extensions.is_none());
    }

    #[test]
    fn test_apply_issues_blocking_fails() {
        let mut entity = Entity::new(EntityKind::Entity);
        let err = apply_issues(
            &mut entity,
            vec![
                DetectedIssue::error("a", "a"),
                DetectedIssue::warning("b", "b"),
            ],
            || Ok(Vec::new()),
        )
        .unwrap_err();
        match err {
            StorageError::Validation(ValidationError::DetectedIssues { issues }) => {
                assert_eq!(issues.len(), 2)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
