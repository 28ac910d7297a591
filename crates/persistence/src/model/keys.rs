//! Well-known keys for seeded vocabulary.
//!
//! These concepts are inserted when the schema is initialised so that records
//! can reference them by key without supplying the concept inline.

use uuid::Uuid;

const fn key(value: u128) -> Uuid {
    Uuid::from_u128(value)
}

/// Record status concepts.
pub struct StatusKeys;

impl StatusKeys {
    /// Newly created, not yet reviewed.
    pub const NEW: Uuid = key(0xc8064cbd_fa06_4530_b430_1a52f1530c27);
    /// Active and in use.
    pub const ACTIVE: Uuid = key(0xc8064cbd_fa06_4530_b430_1a52f1530c28);
    /// Logically removed.
    pub const OBSOLETE: Uuid = key(0xc8064cbd_fa06_4530_b430_1a52f1530c29);
    /// Entered in error.
    pub const NULLIFIED: Uuid = key(0xc8064cbd_fa06_4530_b430_1a52f1530c2a);
    /// Removed from the live store (purged or archived).
    pub const PURGED: Uuid = key(0xc8064cbd_fa06_4530_b430_1a52f1530c2b);

    /// Statuses that count as "active" for queries restricted to live records.
    pub const ACTIVE_SET: [Uuid; 2] = [Self::NEW, Self::ACTIVE];
}

/// Classification codes, one per concrete entity kind.
pub struct EntityClassKeys;

impl EntityClassKeys {
    /// Generic entity with no sub-table data.
    pub const ENTITY: Uuid = key(0xe29fcfad_ec1d_4c60_a055_039a494248ae);
    /// A person.
    pub const PERSON: Uuid = key(0x9de2a846_ddf2_4ebc_902e_84508c5089ea);
    /// A person receiving care.
    pub const PATIENT: Uuid = key(0xbacd9c6f_3fa9_481e_9636_37457962804d);
    /// A person providing care.
    pub const PROVIDER: Uuid = key(0x6b04fed8_c164_469c_910b_f824c2bda4f0);
    /// A person bound to a security user.
    pub const USER_ENTITY: Uuid = key(0x6a2b00ba_501b_4523_b57c_f96d8ae44684);
    /// An organization.
    pub const ORGANIZATION: Uuid = key(0x7c08bd55_4d42_49cd_92f8_6388d6c4183f);
    /// A place.
    pub const PLACE: Uuid = key(0x21ab7873_8ef3_4d78_9c19_4582b3c40631);
    /// A material.
    pub const MATERIAL: Uuid = key(0xd39073be_0f8f_440e_b8c8_7034cc138a95);
    /// A manufactured material (carries a lot number).
    pub const MANUFACTURED_MATERIAL: Uuid = key(0xfafec286_89d5_420b_9085_054aca9d1eef);
    /// A device.
    pub const DEVICE: Uuid = key(0x1373ff04_a6ef_420a_b1d0_4a07465fe8e8);
}

/// Determiner concepts.
pub struct DeterminerKeys;

impl DeterminerKeys {
    /// A specific instance.
    pub const SPECIFIC: Uuid = key(0xf29f08de_78a7_4a5e_aeaf_7b545ba19a09);
    /// A kind of thing rather than an instance.
    pub const DESCRIBED: Uuid = key(0xad28a7ac_a66b_42c4_91b4_de40a2b11980);
}

/// Name use concepts.
pub struct NameUseKeys;

impl NameUseKeys {
    /// Legal name.
    pub const LEGAL: Uuid = key(0xeffe122d_8d30_491d_805d_addcb4466c35);
    /// Assigned name.
    pub const ASSIGNED: Uuid = key(0xa87a6d21_2ca6_4aea_88f3_6135cceb58d1);
    /// Name used on a license.
    pub const LICENSE: Uuid = key(0x48075d19_7b29_4ca5_9c73_0cbd31248446);
    /// Alias.
    pub const PSEUDONYM: Uuid = key(0xc31564ef_ca8d_4528_85a8_88245fcef344);
}

/// Name and address component type concepts.
pub struct ComponentKeys;

impl ComponentKeys {
    /// Given name.
    pub const GIVEN: Uuid = key(0x2f64bde2_a696_4b0a_9690_b21ebd7e5092);
    /// Family name.
    pub const FAMILY: Uuid = key(0x29b98455_ed61_49f8_a161_2d73363e1df0);
    /// Name prefix.
    pub const PREFIX: Uuid = key(0xa787187b_6be4_401e_8836_97fc000c5d16);
    /// Street address line.
    pub const STREET: Uuid = key(0x4a27e9d3_af42_4dc6_bd61_c7e8ab9bb6c1);
    /// City.
    pub const CITY: Uuid = key(0x05b85461_578b_4988_bca6_e3e94be9db76);
    /// State or province.
    pub const STATE: Uuid = key(0x8cf4b0b0_84e5_4122_85fe_6afa8240c218);
    /// Postal code.
    pub const POSTAL_CODE: Uuid = key(0x78a47122_f9bf_450f_a93f_90a103c5f1e8);
    /// Country.
    pub const COUNTRY: Uuid = key(0x48b2ffb3_07db_47ba_ad73_fc8fb8502471);
}

/// Address and telecom use concepts.
pub struct AddressUseKeys;

impl AddressUseKeys {
    /// Home address or contact.
    pub const HOME: Uuid = key(0x493c3e9d_4f65_4e4d_9582_c9008f4f2eb4);
    /// Work address or contact.
    pub const WORK: Uuid = key(0xeaa6f08e_bb8e_4457_9dc0_3a1555fadf5c);
    /// Mobile contact.
    pub const MOBILE: Uuid = key(0xe161f90e_5939_430e_861a_f8e885cc353d);
}

/// Entity relationship type concepts.
pub struct RelationshipTypeKeys;

impl RelationshipTypeKeys {
    /// Target is the source's mother.
    pub const MOTHER: Uuid = key(0x29ff64e5_b564_411a_92c7_6818c02a9e48);
    /// Target is the source's next of kin.
    pub const NEXT_OF_KIN: Uuid = key(0x1ee4e74f_542d_4544_96f6_266a6247f274);
    /// Target employs the source.
    pub const EMPLOYEE: Uuid = key(0xb43c9513_1c1c_4ed0_92db_55a904c122e6);
    /// Source delivers services at target.
    pub const SERVICE_DELIVERY_LOCATION: Uuid = key(0x455f1772_f580_47e8_86bd_b5ce25d351f9);
}

/// Administrative gender concepts.
pub struct GenderKeys;

impl GenderKeys {
    /// Female.
    pub const FEMALE: Uuid = key(0x094941e9_a3db_48b5_862c_bc289bd7f86c);
    /// Male.
    pub const MALE: Uuid = key(0xf4e3a6bb_612e_46b2_9f77_ff844d971198);
    /// Undifferentiated.
    pub const UNDIFFERENTIATED: Uuid = key(0xae94a782_1485_4241_9bca_5b09db2156bf);
}

/// Well-known security users.
pub struct SecurityUserKeys;

impl SecurityUserKeys {
    /// The engine's own identity, used when no caller identity is available.
    pub const SYSTEM: Uuid = key(0xfadca076_3690_4a6e_af9e_f1cd68e8c7e8);
}

/// Every seeded concept with its mnemonic.
pub const WELL_KNOWN_CONCEPTS: &[(Uuid, &str)] = &[
    (StatusKeys::NEW, "New"),
    (StatusKeys::ACTIVE, "Active"),
    (StatusKeys::OBSOLETE, "Obsolete"),
    (StatusKeys::NULLIFIED, "Nullified"),
    (StatusKeys::PURGED, "Purged"),
    (EntityClassKeys::ENTITY, "Entity"),
    (EntityClassKeys::PERSON, "Person"),
    (EntityClassKeys::PATIENT, "Patient"),
    (EntityClassKeys::PROVIDER, "Provider"),
    (EntityClassKeys::USER_ENTITY, "UserEntity"),
    (EntityClassKeys::ORGANIZATION, "Organization"),
    (EntityClassKeys::PLACE, "Place"),
    (EntityClassKeys::MATERIAL, "Material"),
    (EntityClassKeys::MANUFACTURED_MATERIAL, "ManufacturedMaterial"),
    (EntityClassKeys::DEVICE, "Device"),
    (DeterminerKeys::SPECIFIC, "Specific"),
    (DeterminerKeys::DESCRIBED, "Described"),
    (NameUseKeys::LEGAL, "NameUse-Legal"),
    (NameUseKeys::ASSIGNED, "NameUse-Assigned"),
    (NameUseKeys::LICENSE, "NameUse-License"),
    (NameUseKeys::PSEUDONYM, "NameUse-Pseudonym"),
    (ComponentKeys::GIVEN, "Component-Given"),
    (ComponentKeys::FAMILY, "Component-Family"),
    (ComponentKeys::PREFIX, "Component-Prefix"),
    (ComponentKeys::STREET, "Component-Street"),
    (ComponentKeys::CITY, "Component-City"),
    (ComponentKeys::STATE, "Component-State"),
    (ComponentKeys::POSTAL_CODE, "Component-PostalCode"),
    (ComponentKeys::COUNTRY, "Component-Country"),
    (AddressUseKeys::HOME, "Use-Home"),
    (AddressUseKeys::WORK, "Use-Work"),
    (AddressUseKeys::MOBILE, "Use-Mobile"),
    (RelationshipTypeKeys::MOTHER, "Relationship-Mother"),
    (RelationshipTypeKeys::NEXT_OF_KIN, "Relationship-NextOfKin"),
    (RelationshipTypeKeys::EMPLOYEE, "Relationship-Employee"),
    (
        RelationshipTypeKeys::SERVICE_DELIVERY_LOCATION,
        "Relationship-ServiceDeliveryLocation",
    ),
    (GenderKeys::FEMALE, "Gender-Female"),
    (GenderKeys::MALE, "Gender-Male"),
    (GenderKeys::UNDIFFERENTIATED, "Gender-Undifferentiated"),
];

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_well_known_concepts_are_unique() {
        let keys: HashSet<_> = WELL_KNOWN_CONCEPTS.iter().map(|(k, _)| *k).collect();
        let mnemonics: HashSet<_> = WELL_KNOWN_CONCEPTS.iter().map(|(_, m)| *m).collect();
        assert_eq!(keys.len(), WELL_KNOWN_CONCEPTS.len());
        assert_eq!(mnemonics.len(), WELL_KNOWN_CONCEPTS.len());
    }
}
