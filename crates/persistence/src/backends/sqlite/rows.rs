//! Row shapes for every table and the [`DbRow`] contract used by
//! [`DataContext`](super::DataContext).
//!
//! Rows are flat: every foreign key is a bare `Uuid`. Converting between rows
//! and model objects happens in the engine.

// Row fields are named after their columns
#![allow(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;
use rusqlite::types::{Null, ToSql, ToSqlOutput};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{
    DeviceData, LevelData, ManufacturedMaterialData, MaterialData, OrganizationData, PatientData,
    PersonData, PlaceData, ProviderData, Ref, SubTable, UserEntityData, ref_key,
};
use crate::query::SqlParam;

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlParam::Key(k) => k.to_sql(),
            SqlParam::Text(s) => s.to_sql(),
            SqlParam::Integer(i) => i.to_sql(),
            SqlParam::Float(f) => f.to_sql(),
            SqlParam::Bool(b) => b.to_sql(),
            SqlParam::Date(d) => d.to_sql(),
            SqlParam::Timestamp(t) => t.to_sql(),
            SqlParam::Null => Ok(ToSqlOutput::from(Null)),
        }
    }
}

/// A row of a single table.
///
/// `COLUMNS` starts with the key column; `to_values` and `from_row` use the
/// same order.
pub trait DbRow: Sized {
    /// Table name.
    const TABLE: &'static str;
    /// Primary key column.
    const KEY_COLUMN: &'static str;
    /// Every column, key first.
    const COLUMNS: &'static [&'static str];

    /// Primary key value.
    fn key(&self) -> Uuid;

    /// Column values in `COLUMNS` order.
    fn to_values(&self) -> Vec<SqlParam>;

    /// Reads a row selected in `COLUMNS` order.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! db_row {
    (
        $(#[$meta:meta])*
        pub struct $name:ident in $table:literal {
            key $key:ident,
            $($field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub $key: Uuid,
            $(pub $field: $ty,)*
        }

        impl DbRow for $name {
            const TABLE: &'static str = $table;
            const KEY_COLUMN: &'static str = stringify!($key);
            const COLUMNS: &'static [&'static str] = &[stringify!($key), $(stringify!($field)),*];

            fn key(&self) -> Uuid {
                self.$key
            }

            fn to_values(&self) -> Vec<SqlParam> {
                vec![SqlParam::from(self.$key), $(SqlParam::from(self.$field.clone())),*]
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                let mut idx = 0usize;
                Ok(Self {
                    $key: row.get(0)?,
                    $($field: {
                        idx += 1;
                        row.get(idx)?
                    },)*
                })
            }
        }
    };
}

// ============================================================================
// Reference rows
// ============================================================================

db_row! {
    /// A vocabulary concept.
    pub struct ConceptRow in "concept" {
        key key,
        mnemonic: String,
        display_name: Option<String>,
    }
}

db_row! {
    /// An assigning authority.
    pub struct AuthorityRow in "assigning_authority" {
        key key,
        domain_name: String,
        name: Option<String>,
        oid: Option<String>,
        url: Option<String>,
    }
}

db_row! {
    /// A security user.
    pub struct SecurityUserRow in "security_user" {
        key key,
        user_name: String,
        email: Option<String>,
        created_at: DateTime<Utc>,
        obsoleted_at: Option<DateTime<Utc>>,
    }
}

// ============================================================================
// Entity root and version chain
// ============================================================================

db_row! {
    /// The logical entity.
    pub struct EntityRow in "entity" {
        key key,
        class_concept: Uuid,
    }
}

db_row! {
    /// One version of an entity.
    pub struct EntityVersionRow in "entity_version" {
        key version_key,
        key: Uuid,
        sequence: i64,
        previous_version_key: Option<Uuid>,
        determiner_concept: Option<Uuid>,
        status_concept: Uuid,
        type_concept: Option<Uuid>,
        template: Option<Uuid>,
        created_at: DateTime<Utc>,
        created_by: Uuid,
        obsoleted_at: Option<DateTime<Utc>>,
        obsoleted_by: Option<Uuid>,
    }
}

// ============================================================================
// Sub-table rows
// ============================================================================

db_row! {
    pub struct PersonRow in "person_version" {
        key version_key,
        date_of_birth: Option<NaiveDate>,
        gender: Option<Uuid>,
        occupation: Option<Uuid>,
    }
}

db_row! {
    pub struct PatientRow in "patient_version" {
        key version_key,
        deceased_date: Option<NaiveDate>,
        multiple_birth_order: Option<i64>,
        marital_status: Option<Uuid>,
    }
}

db_row! {
    pub struct ProviderRow in "provider_version" {
        key version_key,
        specialty: Option<Uuid>,
    }
}

db_row! {
    pub struct UserEntityRow in "user_entity_version" {
        key version_key,
        security_user: Option<Uuid>,
    }
}

db_row! {
    pub struct OrganizationRow in "organization_version" {
        key version_key,
        industry: Option<Uuid>,
    }
}

db_row! {
    pub struct PlaceRow in "place_version" {
        key version_key,
        is_mobile: bool,
        lat: Option<f64>,
        lng: Option<f64>,
    }
}

db_row! {
    pub struct MaterialRow in "material_version" {
        key version_key,
        quantity: Option<f64>,
        form: Option<Uuid>,
        quantity_unit: Option<Uuid>,
        expiry_date: Option<NaiveDate>,
        is_administrative: bool,
    }
}

db_row! {
    pub struct ManufacturedMaterialRow in "manufactured_material_version" {
        key version_key,
        lot_number: Option<String>,
    }
}

db_row! {
    pub struct DeviceRow in "device_version" {
        key version_key,
        manufacturer_model_name: Option<String>,
        operating_system_name: Option<String>,
    }
}

/// One sub-table row, tagged by level.
#[derive(Debug, Clone, PartialEq)]
pub enum LevelRow {
    Person(PersonRow),
    Patient(PatientRow),
    Provider(ProviderRow),
    UserEntity(UserEntityRow),
    Organization(OrganizationRow),
    Place(PlaceRow),
    Material(MaterialRow),
    ManufacturedMaterial(ManufacturedMaterialRow),
    Device(DeviceRow),
}

/// Columns of a sub-table, version key first.
pub fn sub_table_columns(sub_table: SubTable) -> &'static [&'static str] {
    match sub_table {
        SubTable::Person => PersonRow::COLUMNS,
        SubTable::Patient => PatientRow::COLUMNS,
        SubTable::Provider => ProviderRow::COLUMNS,
        SubTable::UserEntity => UserEntityRow::COLUMNS,
        SubTable::Organization => OrganizationRow::COLUMNS,
        SubTable::Place => PlaceRow::COLUMNS,
        SubTable::Material => MaterialRow::COLUMNS,
        SubTable::ManufacturedMaterial => ManufacturedMaterialRow::COLUMNS,
        SubTable::Device => DeviceRow::COLUMNS,
    }
}

impl LevelRow {
    /// The table this row belongs to.
    pub fn sub_table(&self) -> SubTable {
        match self {
            LevelRow::Person(_) => SubTable::Person,
            LevelRow::Patient(_) => SubTable::Patient,
            LevelRow::Provider(_) => SubTable::Provider,
            LevelRow::UserEntity(_) => SubTable::UserEntity,
            LevelRow::Organization(_) => SubTable::Organization,
            LevelRow::Place(_) => SubTable::Place,
            LevelRow::Material(_) => SubTable::Material,
            LevelRow::ManufacturedMaterial(_) => SubTable::ManufacturedMaterial,
            LevelRow::Device(_) => SubTable::Device,
        }
    }

    /// Maps level data onto its row, storing references by key.
    pub fn from_level(version_key: Uuid, level: &LevelData) -> Self {
        match level {
            LevelData::Person(d) => LevelRow::Person(PersonRow {
                version_key,
                date_of_birth: d.date_of_birth,
                gender: ref_key(&d.gender),
                occupation: ref_key(&d.occupation),
            }),
            LevelData::Patient(d) => LevelRow::Patient(PatientRow {
                version_key,
                deceased_date: d.deceased_date,
                multiple_birth_order: d.multiple_birth_order,
                marital_status: ref_key(&d.marital_status),
            }),
            LevelData::Provider(d) => LevelRow::Provider(ProviderRow {
                version_key,
                specialty: ref_key(&d.specialty),
            }),
            LevelData::UserEntity(d) => LevelRow::UserEntity(UserEntityRow {
                version_key,
                security_user: ref_key(&d.security_user),
            }),
            LevelData::Organization(d) => LevelRow::Organization(OrganizationRow {
                version_key,
                industry: ref_key(&d.industry),
            }),
            LevelData::Place(d) => LevelRow::Place(PlaceRow {
                version_key,
                is_mobile: d.is_mobile,
                lat: d.lat,
                lng: d.lng,
            }),
            LevelData::Material(d) => LevelRow::Material(MaterialRow {
                version_key,
                quantity: d.quantity,
                form: ref_key(&d.form),
                quantity_unit: ref_key(&d.quantity_unit),
                expiry_date: d.expiry_date,
                is_administrative: d.is_administrative,
            }),
            LevelData::ManufacturedMaterial(d) => {
                LevelRow::ManufacturedMaterial(ManufacturedMaterialRow {
                    version_key,
                    lot_number: d.lot_number.clone(),
                })
            }
            LevelData::Device(d) => LevelRow::Device(DeviceRow {
                version_key,
                manufacturer_model_name: d.manufacturer_model_name.clone(),
                operating_system_name: d.operating_system_name.clone(),
            }),
        }
    }

    /// Converts the row back into level data with bare-key references.
    pub fn into_level(self) -> LevelData {
        match self {
            LevelRow::Person(r) => LevelData::Person(PersonData {
                date_of_birth: r.date_of_birth,
                gender: r.gender.map(Ref::Key),
                occupation: r.occupation.map(Ref::Key),
            }),
            LevelRow::Patient(r) => LevelData::Patient(PatientData {
                deceased_date: r.deceased_date,
                multiple_birth_order: r.multiple_birth_order,
                marital_status: r.marital_status.map(Ref::Key),
            }),
            LevelRow::Provider(r) => LevelData::Provider(ProviderData {
                specialty: r.specialty.map(Ref::Key),
            }),
            LevelRow::UserEntity(r) => LevelData::UserEntity(UserEntityData {
                security_user: r.security_user.map(Ref::Key),
            }),
            LevelRow::Organization(r) => LevelData::Organization(OrganizationData {
                industry: r.industry.map(Ref::Key),
            }),
            LevelRow::Place(r) => LevelData::Place(PlaceData {
                is_mobile: r.is_mobile,
                lat: r.lat,
                lng: r.lng,
            }),
            LevelRow::Material(r) => LevelData::Material(MaterialData {
                quantity: r.quantity,
                form: r.form.map(Ref::Key),
                quantity_unit: r.quantity_unit.map(Ref::Key),
                expiry_date: r.expiry_date,
                is_administrative: r.is_administrative,
            }),
            LevelRow::ManufacturedMaterial(r) => {
                LevelData::ManufacturedMaterial(ManufacturedMaterialData {
                    lot_number: r.lot_number,
                })
            }
            LevelRow::Device(r) => LevelData::Device(DeviceData {
                manufacturer_model_name: r.manufacturer_model_name,
                operating_system_name: r.operating_system_name,
            }),
        }
    }
}

// ============================================================================
// Association rows
// ============================================================================

db_row! {
    pub struct NameRow in "entity_name" {
        key key,
        entity_key: Uuid,
        name_use: Option<Uuid>,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct NameComponentRow in "entity_name_component" {
        key key,
        name_key: Uuid,
        component_type: Option<Uuid>,
        value: String,
        sort_order: i64,
    }
}

db_row! {
    pub struct AddressRow in "entity_address" {
        key key,
        entity_key: Uuid,
        address_use: Option<Uuid>,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct AddressComponentRow in "entity_address_component" {
        key key,
        address_key: Uuid,
        component_type: Option<Uuid>,
        value: String,
        sort_order: i64,
    }
}

db_row! {
    pub struct IdentifierRow in "entity_identifier" {
        key key,
        entity_key: Uuid,
        authority: Uuid,
        value: String,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct TelecomRow in "entity_telecom" {
        key key,
        entity_key: Uuid,
        telecom_use: Option<Uuid>,
        value: String,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct RelationshipRow in "entity_relationship" {
        key key,
        entity_key: Uuid,
        relationship_type: Uuid,
        target_key: Uuid,
        quantity: Option<i64>,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct NoteRow in "entity_note" {
        key key,
        entity_key: Uuid,
        author_key: Option<Uuid>,
        text: String,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct ExtensionRow in "entity_extension" {
        key key,
        entity_key: Uuid,
        url: String,
        value: Value,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct PolicyRow in "entity_policy" {
        key key,
        entity_key: Uuid,
        policy: String,
        grant_type: i64,
        effective_version_sequence: i64,
        obsolete_version_sequence: Option<i64>,
    }
}

db_row! {
    pub struct TagRow in "entity_tag" {
        key key,
        entity_key: Uuid,
        name: String,
        value: String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKindTag;

    #[test]
    fn test_columns_start_with_key() {
        assert_eq!(EntityVersionRow::COLUMNS[0], "version_key");
        assert_eq!(EntityVersionRow::KEY_COLUMN, "version_key");
        assert_eq!(EntityVersionRow::COLUMNS.len(), 12);
        assert_eq!(NameRow::TABLE, "entity_name");
    }

    #[test]
    fn test_sub_table_names_agree_with_rows() {
        for tag in EntityKindTag::ALL {
            for sub_table in tag.sub_tables() {
                assert_eq!(sub_table_columns(*sub_table)[0], "version_key");
            }
        }
        assert_eq!(PersonRow::TABLE, SubTable::Person.table_name());
        assert_eq!(
            ManufacturedMaterialRow::TABLE,
            SubTable::ManufacturedMaterial.table_name()
        );
    }

    #[test]
    fn test_level_row_round_trip() {
        let vk = Uuid::new_v4();
        let gender = Uuid::new_v4();
        let level = LevelData::Person(PersonData {
            date_of_birth: NaiveDate::from_ymd_opt(1980, 5, 1),
            gender: Some(Ref::Key(gender)),
            occupation: None,
        });
        let row = LevelRow::from_level(vk, &level);
        assert_eq!(row.sub_table(), SubTable::Person);
        if let LevelRow::Person(r) = &row {
            assert_eq!(r.to_values().len(), PersonRow::COLUMNS.len());
        }
        assert_eq!(row.into_level(), level);
    }
}
