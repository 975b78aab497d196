//! Record store over the externally owned employee table.
//!
//! Reads pending rows through the resolved [`ColumnMapping`] and writes back
//! exactly three things per row: the sync flag, the sync date and the remote
//! identifier. Business columns are never written, and rows are never
//! inserted or deleted.
//!
//! A connection is opened for each logical operation and dropped when that
//! operation returns, so no connection is held while the caller talks to the
//! remote directory.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags, Row, params, types::ValueRef};
use serde::Serialize;

use crate::{
    error::{ConnectivityError, PersistError, RowMappingError, SchemaError, StoreError},
    mapping::{ColumnMapping, Field},
    schema::{self, MigrationReport, TableLayout, quote_identifier},
    values::{self, Cell, DecodeError},
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of the employee table as seen through the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub hire_date: Option<NaiveDateTime>,
    pub synced: bool,
    pub synced_at: Option<NaiveDateTime>,
    pub remote_id: Option<String>,
}

impl fmt::Display for EmployeeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} <{}> (#{})",
            self.first_name, self.last_name, self.email, self.id
        )
    }
}

/// Which rows count as pending for a given mapping and table shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPredicate {
    /// Sync flag does not read as true: NULL, zero, a false token or
    /// anything else [`values::decode_boolean`] would not decode as true.
    SyncFlagUnset,
    /// Remote id is NULL; used when no sync flag column is configured.
    RemoteIdMissing,
    /// The predicate column does not exist yet, so nothing has been synced.
    Everything,
}

impl PendingPredicate {
    pub fn choose(mapping: &ColumnMapping, layout: &TableLayout) -> Self {
        let field = if mapping.supports_sync_columns() {
            Field::SyncFlag
        } else {
            Field::RemoteId
        };
        match (field, layout.index(field)) {
            (_, None) => PendingPredicate::Everything,
            (Field::SyncFlag, Some(_)) => PendingPredicate::SyncFlagUnset,
            _ => PendingPredicate::RemoteIdMissing,
        }
    }

    fn where_clause(self, mapping: &ColumnMapping) -> Result<String, SchemaError> {
        Ok(match self {
            PendingPredicate::SyncFlagUnset => {
                let flag = quote_identifier(mapping.column(Field::SyncFlag))?;
                let truthy = values::TRUE_TOKENS
                    .iter()
                    .map(|token| format!("'{token}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    " WHERE NOT COALESCE(CASE WHEN typeof({flag}) IN ('integer', 'real') \
                     THEN {flag} <> 0 \
                     ELSE lower(trim({flag}, ' ' || char(9) || char(10) || char(13))) IN ({truthy}) END, 0)"
                )
            }
            PendingPredicate::RemoteIdMissing => {
                let remote_id = quote_identifier(mapping.column(Field::RemoteId))?;
                format!(" WHERE {remote_id} IS NULL")
            }
            PendingPredicate::Everything => String::new(),
        })
    }
}

/// Result of a pending fetch: the rows that mapped and the ones that did not.
#[derive(Debug, Default)]
pub struct FetchResult {
    pub records: Vec<EmployeeRecord>,
    pub skipped: Vec<RowMappingError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// The row vanished or its key changed between fetch and update.
    NoMatchingRow,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    mapping: ColumnMapping,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>, mapping: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            mapping,
        }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    /// Open the database without creating it; a wrong path is an error.
    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn open_for_read(&self) -> Result<Connection, StoreError> {
        self.connect().map_err(|source| StoreError::Open {
            location: self.location(),
            source,
        })
    }

    pub fn test_connectivity(&self) -> Result<(), ConnectivityError> {
        let conn = self
            .connect()
            .map_err(|source| ConnectivityError::Database {
                location: self.location(),
                source,
            })?;
        let answer: i64 = conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .map_err(|source| ConnectivityError::Database {
                location: self.location(),
                source,
            })?;
        if answer != 1 {
            return Err(ConnectivityError::Unresponsive {
                location: self.location(),
            });
        }
        Ok(())
    }

    /// Live shape of the table against the mapping.
    pub fn layout(&self) -> Result<TableLayout, StoreError> {
        let conn = self.open_for_read()?;
        Ok(TableLayout::resolve(&conn, &self.mapping)?)
    }

    /// Every pending row, eagerly materialised.
    ///
    /// Rows that fail to map are collected in [`FetchResult::skipped`] and do
    /// not stop the fetch.
    pub fn fetch_pending(&self) -> Result<FetchResult, StoreError> {
        let conn = self.open_for_read()?;
        let layout = self.readable_layout(&conn)?;
        let predicate = PendingPredicate::choose(&self.mapping, &layout);
        let sql = format!(
            "SELECT {} FROM {}{}",
            layout.select_list()?,
            quote_identifier(self.mapping.table())?,
            predicate.where_clause(&self.mapping)?
        );
        debug!("Executing: {sql}");

        let query = |source: rusqlite::Error| StoreError::Query {
            table: self.mapping.table().to_string(),
            source,
        };
        let mut stmt = conn.prepare(&sql).map_err(query)?;
        let mut rows = stmt.query([]).map_err(query)?;
        let mut result = FetchResult::default();
        let mut row_number = 0usize;
        while let Some(row) = rows.next().map_err(query)? {
            row_number += 1;
            match map_row(row, row_number, &layout, &self.mapping) {
                Ok(record) => result.records.push(record),
                Err(err) => {
                    warn!("Skipping row: {err}");
                    result.skipped.push(err);
                }
            }
        }
        debug!(
            "Fetched {} pending row(s) with {:?}, skipped {}",
            result.records.len(),
            predicate,
            result.skipped.len()
        );
        Ok(result)
    }

    /// One row by primary key, whatever its sync state.
    pub fn fetch_by_id(&self, id: i64) -> Result<EmployeeRecord, StoreError> {
        let conn = self.open_for_read()?;
        let layout = self.readable_layout(&conn)?;
        let id_column = self.mapping.column(Field::Id);
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            layout.select_list()?,
            quote_identifier(self.mapping.table())?,
            quote_identifier(id_column)?
        );
        debug!("Executing: {sql} [{id}]");

        let query = |source: rusqlite::Error| StoreError::Query {
            table: self.mapping.table().to_string(),
            source,
        };
        let mut stmt = conn.prepare(&sql).map_err(query)?;
        let mut rows = stmt.query(params![id]).map_err(query)?;
        match rows.next().map_err(query)? {
            Some(row) => Ok(map_row(row, 1, &layout, &self.mapping)?),
            None => Err(StoreError::NotFound {
                table: self.mapping.table().to_string(),
                column: id_column.to_string(),
                id,
            }),
        }
    }

    fn readable_layout(&self, conn: &Connection) -> Result<TableLayout, StoreError> {
        let layout = TableLayout::resolve(conn, &self.mapping)?;
        if let Some(field) = layout.missing_required() {
            return Err(StoreError::MissingColumn {
                table: self.mapping.table().to_string(),
                field: field.key(),
                column: self.mapping.column(field).to_string(),
            });
        }
        Ok(layout)
    }

    /// Add any missing bookkeeping columns.
    pub fn ensure_sync_columns(&self) -> Result<MigrationReport, PersistError> {
        let conn = self.connect().map_err(|source| PersistError::Open {
            location: self.location(),
            source,
        })?;
        Ok(schema::ensure_sync_columns(&conn, &self.mapping)?)
    }

    /// Mark `record` synchronised with its resolved remote identifier.
    ///
    /// The bookkeeping columns are ensured first; a migration failure is only
    /// logged, since the update below reports the real problem if the columns
    /// are still missing.
    pub fn mark_synced(&self, record: &EmployeeRecord) -> Result<UpdateOutcome, PersistError> {
        let remote_id = record
            .remote_id
            .as_deref()
            .ok_or(PersistError::MissingRemoteId { id: record.id })?;
        let conn = self.connect().map_err(|source| PersistError::Open {
            location: self.location(),
            source,
        })?;

        match schema::ensure_sync_columns(&conn, &self.mapping) {
            Ok(report) if !report.is_noop() => info!(
                "Prepared table '{}' with column(s) {}",
                self.mapping.table(),
                report.added.join(", ")
            ),
            Ok(_) => {}
            Err(err) => warn!("Could not verify bookkeeping columns: {err}"),
        }

        let bookkeeping = self.mapping.bookkeeping();
        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2, {} = ?3 WHERE {} = ?4",
            quote_identifier(self.mapping.table())?,
            quote_identifier(&bookkeeping.flag)?,
            quote_identifier(&bookkeeping.date)?,
            quote_identifier(&bookkeeping.remote_id)?,
            quote_identifier(self.mapping.column(Field::Id))?
        );
        let synced_at = values::format_timestamp(&Local::now().naive_local());
        debug!("Executing: {sql} [{}]", record.id);

        let changed = conn
            .execute(&sql, params![true, synced_at, remote_id, record.id])
            .map_err(|source| PersistError::Update {
                id: record.id,
                source,
            })?;
        if changed == 0 {
            warn!(
                "No row with {} = {} in '{}'; sync status not recorded locally",
                self.mapping.column(Field::Id),
                record.id,
                self.mapping.table()
            );
            return Ok(UpdateOutcome::NoMatchingRow);
        }
        debug!("Record {} marked synced as {remote_id}", record.id);
        Ok(UpdateOutcome::Updated)
    }
}

fn read_cell<T>(
    row: &Row<'_>,
    row_number: usize,
    layout: &TableLayout,
    mapping: &ColumnMapping,
    field: Field,
    decode: fn(ValueRef<'_>) -> Result<Option<T>, DecodeError>,
) -> Result<Cell<T>, RowMappingError> {
    let Some(idx) = layout.index(field) else {
        return Ok(Cell::Absent);
    };
    let raw = row.get_ref(idx).map_err(|source| RowMappingError::Read {
        row: row_number,
        source,
    })?;
    let column = || mapping.column(field).to_string();
    match decode(raw) {
        Ok(value) => Ok(Cell::from(value)),
        Err(DecodeError::WrongType { expected, found }) => Err(RowMappingError::WrongType {
            row: row_number,
            column: column(),
            expected,
            found,
        }),
        Err(DecodeError::Unparseable(detail)) => Err(RowMappingError::Unparseable {
            row: row_number,
            column: column(),
            detail,
        }),
    }
}

/// Like [`read_cell`], but a value that cannot be decoded is logged and read
/// as unset instead of failing the row.
fn read_optional<T>(
    row: &Row<'_>,
    row_number: usize,
    layout: &TableLayout,
    mapping: &ColumnMapping,
    field: Field,
    decode: fn(ValueRef<'_>) -> Result<Option<T>, DecodeError>,
) -> Result<Cell<T>, RowMappingError> {
    match read_cell(row, row_number, layout, mapping, field, decode) {
        Err(err @ (RowMappingError::WrongType { .. } | RowMappingError::Unparseable { .. })) => {
            warn!("Ignoring unreadable {field}: {err}");
            Ok(Cell::Null)
        }
        other => other,
    }
}

fn map_row(
    row: &Row<'_>,
    row_number: usize,
    layout: &TableLayout,
    mapping: &ColumnMapping,
) -> Result<EmployeeRecord, RowMappingError> {
    let text = |field| read_cell(row, row_number, layout, mapping, field, values::decode_text);
    let null_error = |field: Field| RowMappingError::NullValue {
        row: row_number,
        column: mapping.column(field).to_string(),
    };

    let id = read_cell(row, row_number, layout, mapping, Field::Id, values::decode_integer)?
        .into_option()
        .ok_or_else(|| null_error(Field::Id))?;
    let email = text(Field::Email)?
        .into_option()
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| null_error(Field::Email))?;

    let optional_time = |field| {
        read_optional(row, row_number, layout, mapping, field, values::decode_timestamp)
    };
    let synced =
        read_optional(row, row_number, layout, mapping, Field::SyncFlag, values::decode_boolean)?;
    let hire_date = optional_time(Field::HireDate)?;
    let synced_at = optional_time(Field::SyncDate)?;
    let remote_id =
        read_optional(row, row_number, layout, mapping, Field::RemoteId, values::decode_text)?;

    Ok(EmployeeRecord {
        id,
        first_name: text(Field::FirstName)?.into_option().unwrap_or_default(),
        last_name: text(Field::LastName)?.into_option().unwrap_or_default(),
        email,
        department: text(Field::Department)?.into_option(),
        position: text(Field::Position)?.into_option(),
        hire_date: hire_date.into_option(),
        synced: synced.into_option().unwrap_or(false),
        synced_at: synced_at.into_option(),
        remote_id: remote_id.into_option(),
    })
}
