//! The identified/versioned record model.
//!
//! - [`version`]: identity and version metadata, load modes
//! - [`entity`]: the entity record, its kinds and sub-table levels
//! - [`association`]: child records owned by an entity
//! - [`reference`]: shared vocabulary records and the [`Ref`] field type
//! - [`keys`]: well-known seeded keys

pub mod association;
pub mod entity;
pub mod keys;
pub mod reference;
pub mod version;

pub use association::{
    Association, Component, EntityAddress, EntityExtension, EntityIdentifier, EntityName,
    EntityNote, EntityRelationship, EntityTag, EntityTelecom, PolicyGrant, SecurityPolicyInstance,
};
pub use entity::{
    DeviceData, Entity, EntityKind, EntityKindTag, LevelData, ManufacturedMaterialData,
    MaterialData, OrganizationData, PatientData, PersonData, PlaceData, ProviderData, SubTable,
    UserEntityData,
};
pub use keys::{
    AddressUseKeys, ComponentKeys, DeterminerKeys, EntityClassKeys, GenderKeys, NameUseKeys,
    RelationshipTypeKeys, SecurityUserKeys, StatusKeys,
};
pub use reference::{AssigningAuthority, Concept, Ref, SecurityUser, ref_key};
pub use version::{Identified, LoadMode, VersionInfo, Versioned};
