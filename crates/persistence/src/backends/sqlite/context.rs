//! The per-transaction data context.
//!
//! A [`DataContext`] wraps one open `BEGIN IMMEDIATE` transaction. Every row
//! written by an engine call goes through it, so dropping the context without
//! calling [`DataContext::commit`] rolls back every step of the call.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Transaction, params_from_iter};
use uuid::Uuid;

use crate::context::ActorContext;
use crate::error::{BackendError, StorageError, StorageResult};
use crate::model::SubTable;
use crate::query::{SqlFragment, SqlParam};

use super::rows::{
    DbRow, DeviceRow, LevelRow, ManufacturedMaterialRow, MaterialRow, OrganizationRow, PatientRow,
    PersonRow, PlaceRow, ProviderRow, UserEntityRow, sub_table_columns,
};

/// A string-keyed cache entry written once the transaction commits.
pub type PendingAdhoc = (String, Uuid);

/// One open transaction plus the state every step of an engine call shares.
pub struct DataContext<'conn> {
    tx: Transaction<'conn>,
    actor: ActorContext,
    now: DateTime<Utc>,
    failpoints: Arc<HashSet<String>>,
    pending_adhoc: RefCell<Vec<PendingAdhoc>>,
}

impl std::fmt::Debug for DataContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("actor", &self.actor)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

fn column_list(columns: &[&str]) -> String {
    columns.join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl<'conn> DataContext<'conn> {
    /// Wraps an open transaction.
    pub fn new(
        tx: Transaction<'conn>,
        actor: ActorContext,
        failpoints: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            tx,
            actor,
            now: Utc::now(),
            failpoints,
            pending_adhoc: RefCell::new(Vec::new()),
        }
    }

    /// Actor performing this call.
    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    /// Timestamp stamped on every version written by this call.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Fails with a backend error when `name` is an enabled failpoint.
    pub fn failpoint(&self, name: &str) -> StorageResult<()> {
        if self.failpoints.contains(name) {
            tracing::debug!(failpoint = name, "Failpoint triggered");
            return Err(StorageError::Backend(BackendError::Failpoint {
                name: name.to_string(),
            }));
        }
        Ok(())
    }

    /// Queues an ad-hoc cache write for after commit.
    pub fn defer_adhoc(&self, key: impl Into<String>, value: Uuid) {
        self.pending_adhoc.borrow_mut().push((key.into(), value));
    }

    /// Returns a cache entry queued earlier in this transaction.
    pub fn pending_adhoc(&self, key: &str) -> Option<Uuid> {
        self.pending_adhoc
            .borrow()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    /// Commits the transaction and hands back the deferred cache writes.
    pub fn commit(self) -> StorageResult<Vec<PendingAdhoc>> {
        self.tx.commit()?;
        Ok(self.pending_adhoc.into_inner())
    }

    // ------------------------------------------------------------------
    // Row operations
    // ------------------------------------------------------------------

    /// Inserts a row.
    pub fn insert<R: DbRow>(&self, row: &R) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            R::TABLE,
            column_list(R::COLUMNS),
            placeholders(R::COLUMNS.len())
        );
        self.tx.execute(&sql, params_from_iter(row.to_values()))?;
        Ok(())
    }

    /// Overwrites every column of the row with the same key.
    ///
    /// Returns the number of rows touched.
    pub fn update<R: DbRow>(&self, row: &R) -> StorageResult<usize> {
        let assignments = R::COLUMNS[1..]
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            R::TABLE,
            assignments,
            R::KEY_COLUMN
        );
        let mut values = row.to_values();
        let key = values.remove(0);
        values.push(key);
        Ok(self.tx.execute(&sql, params_from_iter(values))?)
    }

    /// Deletes matching rows.
    pub fn delete<R: DbRow>(&self, filter: SqlFragment) -> StorageResult<usize> {
        let sql = format!("DELETE FROM {} WHERE {}", R::TABLE, filter.sql);
        Ok(self.tx.execute(&sql, params_from_iter(filter.params))?)
    }

    /// Loads matching rows in storage order.
    pub fn query<R: DbRow>(&self, filter: SqlFragment) -> StorageResult<Vec<R>> {
        self.query_ordered(filter, "rowid")
    }

    /// Loads matching rows in the given order.
    pub fn query_ordered<R: DbRow>(
        &self,
        filter: SqlFragment,
        order_by: &str,
    ) -> StorageResult<Vec<R>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            column_list(R::COLUMNS),
            R::TABLE,
            filter.sql,
            order_by
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(filter.params), |row| R::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// First matching row, if any.
    pub fn first_or_default<R: DbRow>(&self, filter: SqlFragment) -> StorageResult<Option<R>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY rowid LIMIT 1",
            column_list(R::COLUMNS),
            R::TABLE,
            filter.sql
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.params))?;
        match rows.next()? {
            Some(row) => Ok(Some(R::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Row with the given primary key.
    pub fn get<R: DbRow>(&self, key: Uuid) -> StorageResult<Option<R>> {
        self.first_or_default(SqlFragment::column_eq(R::KEY_COLUMN, key))
    }

    /// Returns `true` if a row with the given key exists.
    pub fn exists<R: DbRow>(&self, key: Uuid) -> StorageResult<bool> {
        Ok(self.count::<R>(SqlFragment::column_eq(R::KEY_COLUMN, key))? > 0)
    }

    /// Number of matching rows.
    pub fn count<R: DbRow>(&self, filter: SqlFragment) -> StorageResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", R::TABLE, filter.sql);
        let n: i64 = self
            .tx
            .query_row(&sql, params_from_iter(filter.params), |r| r.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Runs a statement and returns the number of rows touched.
    pub fn execute(&self, statement: SqlFragment) -> StorageResult<usize> {
        Ok(self
            .tx
            .execute(&statement.sql, params_from_iter(statement.params))?)
    }

    /// Runs a statement selecting a single key column.
    pub fn query_keys(&self, statement: SqlFragment) -> StorageResult<Vec<Uuid>> {
        let mut stmt = self.tx.prepare(&statement.sql)?;
        let keys = stmt
            .query_map(params_from_iter(statement.params), |row| row.get(0))?
            .collect::<Result<Vec<Uuid>, _>>()?;
        Ok(keys)
    }

    /// Runs a statement selecting a single integer.
    pub fn query_count(&self, statement: SqlFragment) -> StorageResult<usize> {
        let n: i64 = self.tx.query_row(
            &statement.sql,
            params_from_iter(statement.params),
            |r| r.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Sub-table helpers
    // ------------------------------------------------------------------

    /// Inserts a sub-table row.
    pub fn insert_level(&self, row: &LevelRow) -> StorageResult<()> {
        match row {
            LevelRow::Person(r) => self.insert(r),
            LevelRow::Patient(r) => self.insert(r),
            LevelRow::Provider(r) => self.insert(r),
            LevelRow::UserEntity(r) => self.insert(r),
            LevelRow::Organization(r) => self.insert(r),
            LevelRow::Place(r) => self.insert(r),
            LevelRow::Material(r) => self.insert(r),
            LevelRow::ManufacturedMaterial(r) => self.insert(r),
            LevelRow::Device(r) => self.insert(r),
        }
    }

    /// Overwrites a sub-table row in place.
    pub fn update_level(&self, row: &LevelRow) -> StorageResult<usize> {
        match row {
            LevelRow::Person(r) => self.update(r),
            LevelRow::Patient(r) => self.update(r),
            LevelRow::Provider(r) => self.update(r),
            LevelRow::UserEntity(r) => self.update(r),
            LevelRow::Organization(r) => self.update(r),
            LevelRow::Place(r) => self.update(r),
            LevelRow::Material(r) => self.update(r),
            LevelRow::ManufacturedMaterial(r) => self.update(r),
            LevelRow::Device(r) => self.update(r),
        }
    }

    /// The sub-table row serving version `sequence` of `key`.
    ///
    /// This is the row owned by the nearest version at or after `sequence`,
    /// which is the exact version unless sub-table rows were moved forward.
    pub fn load_level(
        &self,
        sub_table: SubTable,
        key: Uuid,
        sequence: i64,
    ) -> StorageResult<Option<LevelRow>> {
        let filter = SqlFragment::new(format!(
            "t.version_key = (SELECT lv.version_key FROM {table} lt \
             JOIN entity_version lv ON lv.version_key = lt.version_key \
             WHERE lv.key = ? AND lv.sequence >= ? ORDER BY lv.sequence LIMIT 1)",
            table = sub_table.table_name()
        ))
        .bind(key)
        .bind(sequence);
        Ok(match sub_table {
            SubTable::Person => self.level_row::<PersonRow>(filter)?.map(LevelRow::Person),
            SubTable::Patient => self.level_row::<PatientRow>(filter)?.map(LevelRow::Patient),
            SubTable::Provider => self.level_row::<ProviderRow>(filter)?.map(LevelRow::Provider),
            SubTable::UserEntity => self
                .level_row::<UserEntityRow>(filter)?
                .map(LevelRow::UserEntity),
            SubTable::Organization => self
                .level_row::<OrganizationRow>(filter)?
                .map(LevelRow::Organization),
            SubTable::Place => self.level_row::<PlaceRow>(filter)?.map(LevelRow::Place),
            SubTable::Material => self.level_row::<MaterialRow>(filter)?.map(LevelRow::Material),
            SubTable::ManufacturedMaterial => self
                .level_row::<ManufacturedMaterialRow>(filter)?
                .map(LevelRow::ManufacturedMaterial),
            SubTable::Device => self.level_row::<DeviceRow>(filter)?.map(LevelRow::Device),
        })
    }

    fn level_row<R: DbRow>(&self, filter: SqlFragment) -> StorageResult<Option<R>> {
        let columns = R::COLUMNS
            .iter()
            .map(|c| format!("t.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns} FROM {} t WHERE {} LIMIT 1",
            R::TABLE,
            filter.sql
        );
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.params))?;
        match rows.next()? {
            Some(row) => Ok(Some(R::from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Copies a sub-table row unchanged to a new version key.
    pub fn copy_level(&self, sub_table: SubTable, from: Uuid, to: Uuid) -> StorageResult<usize> {
        let columns = sub_table_columns(sub_table);
        let rest = column_list(&columns[1..]);
        let statement = SqlFragment::new(format!(
            "INSERT INTO {table} ({key}, {rest}) SELECT ?, {rest} FROM {table} WHERE {key} = ?",
            table = sub_table.table_name(),
            key = columns[0],
        ))
        .bind(to)
        .bind(from);
        self.execute(statement)
    }

    /// Moves a sub-table row to a new version key.
    pub fn rekey_level(&self, sub_table: SubTable, from: Uuid, to: Uuid) -> StorageResult<usize> {
        let statement = SqlFragment::new(format!(
            "UPDATE {} SET version_key = ? WHERE version_key = ?",
            sub_table.table_name()
        ))
        .bind(to)
        .bind(from);
        self.execute(statement)
    }

    /// Returns `true` if `sub_table` holds a row for `version_key`.
    pub fn has_level(&self, sub_table: SubTable, version_key: Uuid) -> StorageResult<bool> {
        let statement = SqlFragment::new(format!(
            "SELECT COUNT(*) FROM {} WHERE version_key = ?",
            sub_table.table_name()
        ))
        .bind(version_key);
        Ok(self.query_count(statement)? > 0)
    }
}

/// Renders bound parameters for log records.
pub(crate) fn describe_params(params: &[SqlParam]) -> String {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Key(k) => k.to_string(),
            SqlParam::Text(s) => format!("{s:?}"),
            SqlParam::Integer(i) => i.to_string(),
            SqlParam::Float(f) => f.to_string(),
            SqlParam::Bool(b) => b.to_string(),
            SqlParam::Date(d) => d.to_string(),
            SqlParam::Timestamp(t) => t.to_rfc3339(),
            SqlParam::Null => "NULL".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
