//! The entity record and its class hierarchy.
//!
//! An entity is a versioned root row extended by zero, one or two sub-table
//! levels. The concrete shape is a closed set of [`EntityKind`] variants; each
//! variant carries one data struct per level below the root, in ascending
//! inheritance order. [`EntityKindTag`] is the payload-free mirror of the
//! variant used for dispatch, and [`SubTable`] names the table each level's
//! columns live in.

// Variants and level fields are named after the columns they map to
#![allow(missing_docs)]

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::association::{
    EntityAddress, EntityExtension, EntityIdentifier, EntityName, EntityNote, EntityRelationship,
    EntityTag, EntityTelecom, SecurityPolicyInstance,
};
use super::keys::EntityClassKeys;
use super::reference::{Concept, Ref, SecurityUser, ref_key};
use super::version::{Identified, VersionInfo, Versioned};

/// Concrete entity kinds, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKindTag {
    Entity,
    Person,
    Patient,
    Provider,
    UserEntity,
    Organization,
    Place,
    Material,
    ManufacturedMaterial,
    Device,
}

impl EntityKindTag {
    /// Every kind, roots before descendants.
    pub const ALL: [EntityKindTag; 10] = [
        EntityKindTag::Entity,
        EntityKindTag::Person,
        EntityKindTag::Patient,
        EntityKindTag::Provider,
        EntityKindTag::UserEntity,
        EntityKindTag::Organization,
        EntityKindTag::Place,
        EntityKindTag::Material,
        EntityKindTag::ManufacturedMaterial,
        EntityKindTag::Device,
    ];

    /// The direct ancestor kind.
    pub fn parent(self) -> Option<EntityKindTag> {
        match self {
            EntityKindTag::Entity => None,
            EntityKindTag::Person
            | EntityKindTag::Organization
            | EntityKindTag::Place
            | EntityKindTag::Material
            | EntityKindTag::Device => Some(EntityKindTag::Entity),
            EntityKindTag::Patient | EntityKindTag::Provider | EntityKindTag::UserEntity => {
                Some(EntityKindTag::Person)
            }
            EntityKindTag::ManufacturedMaterial => Some(EntityKindTag::Material),
        }
    }

    /// Sub-tables holding this kind's columns, in ascending inheritance order.
    pub fn sub_tables(self) -> &'static [SubTable] {
        match self {
            EntityKindTag::Entity => &[],
            EntityKindTag::Person => &[SubTable::Person],
            EntityKindTag::Patient => &[SubTable::Person, SubTable::Patient],
            EntityKindTag::Provider => &[SubTable::Person, SubTable::Provider],
            EntityKindTag::UserEntity => &[SubTable::Person, SubTable::UserEntity],
            EntityKindTag::Organization => &[SubTable::Organization],
            EntityKindTag::Place => &[SubTable::Place],
            EntityKindTag::Material => &[SubTable::Material],
            EntityKindTag::ManufacturedMaterial => {
                &[SubTable::Material, SubTable::ManufacturedMaterial]
            }
            EntityKindTag::Device => &[SubTable::Device],
        }
    }

    /// Returns `true` if `self` is `ancestor` or derives from it.
    pub fn is_a(self, ancestor: EntityKindTag) -> bool {
        let mut current = Some(self);
        while let Some(tag) = current {
            if tag == ancestor {
                return true;
            }
            current = tag.parent();
        }
        false
    }

    /// This kind and every kind deriving from it.
    pub fn descendants(self) -> Vec<EntityKindTag> {
        Self::ALL.into_iter().filter(|t| t.is_a(self)).collect()
    }

    /// The classification code conventionally registered for this kind.
    pub fn default_class_key(self) -> Uuid {
        match self {
            EntityKindTag::Entity => EntityClassKeys::ENTITY,
            EntityKindTag::Person => EntityClassKeys::PERSON,
            EntityKindTag::Patient => EntityClassKeys::PATIENT,
            EntityKindTag::Provider => EntityClassKeys::PROVIDER,
            EntityKindTag::UserEntity => EntityClassKeys::USER_ENTITY,
            EntityKindTag::Organization => EntityClassKeys::ORGANIZATION,
            EntityKindTag::Place => EntityClassKeys::PLACE,
            EntityKindTag::Material => EntityClassKeys::MATERIAL,
            EntityKindTag::ManufacturedMaterial => EntityClassKeys::MANUFACTURED_MATERIAL,
            EntityKindTag::Device => EntityClassKeys::DEVICE,
        }
    }

    /// Type name.
    pub fn name(self) -> &'static str {
        match self {
            EntityKindTag::Entity => "Entity",
            EntityKindTag::Person => "Person",
            EntityKindTag::Patient => "Patient",
            EntityKindTag::Provider => "Provider",
            EntityKindTag::UserEntity => "UserEntity",
            EntityKindTag::Organization => "Organization",
            EntityKindTag::Place => "Place",
            EntityKindTag::Material => "Material",
            EntityKindTag::ManufacturedMaterial => "ManufacturedMaterial",
            EntityKindTag::Device => "Device",
        }
    }
}

impl fmt::Display for EntityKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A table holding one inheritance level's columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTable {
    Person,
    Patient,
    Provider,
    UserEntity,
    Organization,
    Place,
    Material,
    ManufacturedMaterial,
    Device,
}

impl SubTable {
    /// Every sub-table.
    pub const ALL: [SubTable; 9] = [
        SubTable::Person,
        SubTable::Patient,
        SubTable::Provider,
        SubTable::UserEntity,
        SubTable::Organization,
        SubTable::Place,
        SubTable::Material,
        SubTable::ManufacturedMaterial,
        SubTable::Device,
    ];

    /// Physical table name.
    pub fn table_name(self) -> &'static str {
        match self {
            SubTable::Person => "person_version",
            SubTable::Patient => "patient_version",
            SubTable::Provider => "provider_version",
            SubTable::UserEntity => "user_entity_version",
            SubTable::Organization => "organization_version",
            SubTable::Place => "place_version",
            SubTable::Material => "material_version",
            SubTable::ManufacturedMaterial => "manufactured_material_version",
            SubTable::Device => "device_version",
        }
    }
}

impl fmt::Display for SubTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Person-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonData {
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Ref<Concept>>,
    pub occupation: Option<Ref<Concept>>,
}

/// Patient-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientData {
    pub deceased_date: Option<NaiveDate>,
    pub multiple_birth_order: Option<i64>,
    pub marital_status: Option<Ref<Concept>>,
}

/// Provider-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderData {
    pub specialty: Option<Ref<Concept>>,
}

/// User-entity-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntityData {
    pub security_user: Option<Ref<SecurityUser>>,
}

/// Organization-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationData {
    pub industry: Option<Ref<Concept>>,
}

/// Place-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceData {
    pub is_mobile: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Material-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialData {
    pub quantity: Option<f64>,
    pub form: Option<Ref<Concept>>,
    pub quantity_unit: Option<Ref<Concept>>,
    pub expiry_date: Option<NaiveDate>,
    pub is_administrative: bool,
}

/// Manufactured-material-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufacturedMaterialData {
    pub lot_number: Option<String>,
}

/// Device-level columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceData {
    pub manufacturer_model_name: Option<String>,
    pub operating_system_name: Option<String>,
}

/// One level's data, detached from its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelData {
    Person(PersonData),
    Patient(PatientData),
    Provider(ProviderData),
    UserEntity(UserEntityData),
    Organization(OrganizationData),
    Place(PlaceData),
    Material(MaterialData),
    ManufacturedMaterial(ManufacturedMaterialData),
    Device(DeviceData),
}

impl LevelData {
    /// The table this level is stored in.
    pub fn sub_table(&self) -> SubTable {
        match self {
            LevelData::Person(_) => SubTable::Person,
            LevelData::Patient(_) => SubTable::Patient,
            LevelData::Provider(_) => SubTable::Provider,
            LevelData::UserEntity(_) => SubTable::UserEntity,
            LevelData::Organization(_) => SubTable::Organization,
            LevelData::Place(_) => SubTable::Place,
            LevelData::Material(_) => SubTable::Material,
            LevelData::ManufacturedMaterial(_) => SubTable::ManufacturedMaterial,
            LevelData::Device(_) => SubTable::Device,
        }
    }
}

/// The concrete shape of an entity, with one data struct per sub-table level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityKind {
    #[default]
    Entity,
    Person {
        person: PersonData,
    },
    Patient {
        person: PersonData,
        patient: PatientData,
    },
    Provider {
        person: PersonData,
        provider: ProviderData,
    },
    UserEntity {
        person: PersonData,
        user: UserEntityData,
    },
    Organization {
        organization: OrganizationData,
    },
    Place {
        place: PlaceData,
    },
    Material {
        material: MaterialData,
    },
    ManufacturedMaterial {
        material: MaterialData,
        manufactured: ManufacturedMaterialData,
    },
    Device {
        device: DeviceData,
    },
}

impl EntityKind {
    /// The payload-free tag of this kind.
    pub fn tag(&self) -> EntityKindTag {
        match self {
            EntityKind::Entity => EntityKindTag::Entity,
            EntityKind::Person { .. } => EntityKindTag::Person,
            EntityKind::Patient { .. } => EntityKindTag::Patient,
            EntityKind::Provider { .. } => EntityKindTag::Provider,
            EntityKind::UserEntity { .. } => EntityKindTag::UserEntity,
            EntityKind::Organization { .. } => EntityKindTag::Organization,
            EntityKind::Place { .. } => EntityKindTag::Place,
            EntityKind::Material { .. } => EntityKindTag::Material,
            EntityKind::ManufacturedMaterial { .. } => EntityKindTag::ManufacturedMaterial,
            EntityKind::Device { .. } => EntityKindTag::Device,
        }
    }

    /// Person-level data, for every kind deriving from Person.
    pub fn person(&self) -> Option<&PersonData> {
        match self {
            EntityKind::Person { person }
            | EntityKind::Patient { person, .. }
            | EntityKind::Provider { person, .. }
            | EntityKind::UserEntity { person, .. } => Some(person),
            _ => None,
        }
    }

    /// Patient-level data.
    pub fn patient(&self) -> Option<&PatientData> {
        match self {
            EntityKind::Patient { patient, .. } => Some(patient),
            _ => None,
        }
    }

    /// Material-level data, for Material and ManufacturedMaterial.
    pub fn material(&self) -> Option<&MaterialData> {
        match self {
            EntityKind::Material { material } | EntityKind::ManufacturedMaterial { material, .. } => {
                Some(material)
            }
            _ => None,
        }
    }

    /// Place-level data.
    pub fn place(&self) -> Option<&PlaceData> {
        match self {
            EntityKind::Place { place } => Some(place),
            _ => None,
        }
    }

    /// Splits the kind into its per-level data, in ascending order.
    pub fn into_levels(self) -> Vec<LevelData> {
        match self {
            EntityKind::Entity => vec![],
            EntityKind::Person { person } => vec![LevelData::Person(person)],
            EntityKind::Patient { person, patient } => {
                vec![LevelData::Person(person), LevelData::Patient(patient)]
            }
            EntityKind::Provider { person, provider } => {
                vec![LevelData::Person(person), LevelData::Provider(provider)]
            }
            EntityKind::UserEntity { person, user } => {
                vec![LevelData::Person(person), LevelData::UserEntity(user)]
            }
            EntityKind::Organization { organization } => {
                vec![LevelData::Organization(organization)]
            }
            EntityKind::Place { place } => vec![LevelData::Place(place)],
            EntityKind::Material { material } => vec![LevelData::Material(material)],
            EntityKind::ManufacturedMaterial {
                material,
                manufactured,
            } => vec![
                LevelData::Material(material),
                LevelData::ManufacturedMaterial(manufactured),
            ],
            EntityKind::Device { device } => vec![LevelData::Device(device)],
        }
    }

    /// Rebuilds a kind from per-level data.
    ///
    /// Returns `None` if a level required by `tag` is missing.
    pub fn from_levels(tag: EntityKindTag, levels: Vec<LevelData>) -> Option<EntityKind> {
        let mut person = None;
        let mut patient = None;
        let mut provider = None;
        let mut user = None;
        let mut organization = None;
        let mut place = None;
        let mut material = None;
        let mut manufactured = None;
        let mut device = None;
        for level in levels {
            match level {
                LevelData::Person(d) => person = Some(d),
                LevelData::Patient(d) => patient = Some(d),
                LevelData::Provider(d) => provider = Some(d),
                LevelData::UserEntity(d) => user = Some(d),
                LevelData::Organization(d) => organization = Some(d),
                LevelData::Place(d) => place = Some(d),
                LevelData::Material(d) => material = Some(d),
                LevelData::ManufacturedMaterial(d) => manufactured = Some(d),
                LevelData::Device(d) => device = Some(d),
            }
        }
        Some(match tag {
            EntityKindTag::Entity => EntityKind::Entity,
            EntityKindTag::Person => EntityKind::Person { person: person? },
            EntityKindTag::Patient => EntityKind::Patient {
                person: person?,
                patient: patient?,
            },
            EntityKindTag::Provider => EntityKind::Provider {
                person: person?,
                provider: provider?,
            },
            EntityKindTag::UserEntity => EntityKind::UserEntity {
                person: person?,
                user: user?,
            },
            EntityKindTag::Organization => EntityKind::Organization {
                organization: organization?,
            },
            EntityKindTag::Place => EntityKind::Place { place: place? },
            EntityKindTag::Material => EntityKind::Material {
                material: material?,
            },
            EntityKindTag::ManufacturedMaterial => EntityKind::ManufacturedMaterial {
                material: material?,
                manufactured: manufactured?,
            },
            EntityKindTag::Device => EntityKind::Device { device: device? },
        })
    }
}

/// A versioned, polymorphic entity.
///
/// Association collections use PATCH semantics: `None` leaves the stored
/// collection untouched on update, `Some(vec![])` removes every item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Logical key.
    pub key: Option<Uuid>,
    /// Version metadata, populated on read.
    pub version: Option<VersionInfo>,
    /// Classification; forced to the registered code for the kind on write.
    pub class_concept: Option<Ref<Concept>>,
    pub determiner_concept: Option<Ref<Concept>>,
    pub status_concept: Option<Ref<Concept>>,
    pub type_concept: Option<Ref<Concept>>,
    pub template: Option<Ref<Concept>>,
    /// Concrete shape and sub-table data.
    pub kind: EntityKind,
    pub names: Option<Vec<EntityName>>,
    pub addresses: Option<Vec<EntityAddress>>,
    pub identifiers: Option<Vec<EntityIdentifier>>,
    pub telecoms: Option<Vec<EntityTelecom>>,
    pub relationships: Option<Vec<EntityRelationship>>,
    pub notes: Option<Vec<EntityNote>>,
    pub extensions: Option<Vec<EntityExtension>>,
    pub policies: Option<Vec<SecurityPolicyInstance>>,
    pub tags: Option<Vec<EntityTag>>,
}

impl Entity {
    /// Creates an unsaved entity of the given kind.
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// The concrete kind tag.
    pub fn tag(&self) -> EntityKindTag {
        self.kind.tag()
    }

    /// Key of the status concept.
    pub fn status_key(&self) -> Option<Uuid> {
        ref_key(&self.status_concept)
    }

    /// Key of the class concept.
    pub fn class_key(&self) -> Option<Uuid> {
        ref_key(&self.class_concept)
    }

    pub fn with_key(mut self, key: Uuid) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_status(mut self, status: Uuid) -> Self {
        self.status_concept = Some(Ref::Key(status));
        self
    }

    pub fn with_class_concept(mut self, class: Uuid) -> Self {
        self.class_concept = Some(Ref::Key(class));
        self
    }

    pub fn with_type_concept(mut self, type_concept: impl Into<Ref<Concept>>) -> Self {
        self.type_concept = Some(type_concept.into());
        self
    }

    pub fn with_names(mut self, names: Vec<EntityName>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<EntityAddress>) -> Self {
        self.addresses = Some(addresses);
        self
    }

    pub fn with_identifiers(mut self, identifiers: Vec<EntityIdentifier>) -> Self {
        self.identifiers = Some(identifiers);
        self
    }

    pub fn with_telecoms(mut self, telecoms: Vec<EntityTelecom>) -> Self {
        self.telecoms = Some(telecoms);
        self
    }

    pub fn with_relationships(mut self, relationships: Vec<EntityRelationship>) -> Self {
        self.relationships = Some(relationships);
        self
    }

    pub fn with_notes(mut self, notes: Vec<EntityNote>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<EntityExtension>) -> Self {
        self.extensions = Some(extensions);
        self
    }

    pub fn with_policies(mut self, policies: Vec<SecurityPolicyInstance>) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn with_tags(mut self, tags: Vec<EntityTag>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Drops every association collection (quick shape).
    pub fn clear_associations(&mut self) {
        self.names = None;
        self.addresses = None;
        self.identifiers = None;
        self.telecoms = None;
        self.relationships = None;
        self.notes = None;
        self.extensions = None;
        self.policies = None;
        self.tags = None;
    }
}

impl Identified for Entity {
    fn key(&self) -> Option<Uuid> {
        self.key
    }
}

impl Versioned for Entity {
    fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }
}
