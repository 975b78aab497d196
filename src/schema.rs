//! Table introspection and additive migration of the bookkeeping columns.
//!
//! The employee table is not ours. This module reads its shape through
//! `PRAGMA table_info`, resolves which mapped columns it actually has into a
//! [`TableLayout`], and adds the three sync-status columns when they are
//! missing. Nothing here ever drops, renames or retypes an existing column.

use std::fmt;

use log::{debug, info};
use rusqlite::Connection;

use crate::{
    error::SchemaError,
    mapping::{ColumnMapping, Field},
};

/// Quote an identifier for interpolation into SQL text.
pub fn quote_identifier(identifier: &str) -> Result<String, SchemaError> {
    let ident = identifier.trim();
    if ident.is_empty() || ident.contains('\0') {
        return Err(SchemaError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(format!("\"{}\"", ident.replace('"', "\"\"")))
}

/// Column names of `table` in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, SchemaError> {
    let sql = format!("PRAGMA table_info({})", quote_identifier(table)?);
    let introspection = |source: rusqlite::Error| SchemaError::Introspection {
        table: table.to_string(),
        source,
    };
    let mut stmt = conn.prepare(&sql).map_err(introspection)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(introspection)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(introspection)?;
    if columns.is_empty() {
        return Err(SchemaError::MissingTable {
            table: table.to_string(),
        });
    }
    Ok(columns)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, SchemaError> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|existing| existing.eq_ignore_ascii_case(column.trim())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPresence {
    Present,
    Absent,
}

impl fmt::Display for ColumnPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnPresence::Present => f.write_str("present"),
            ColumnPresence::Absent => f.write_str("absent"),
        }
    }
}

/// Which mapped columns a table has, and where each sits in the select list
/// built by [`TableLayout::select_list`].
#[derive(Debug, Clone)]
pub struct TableLayout {
    selected: Vec<(Field, String)>,
}

impl TableLayout {
    pub fn resolve(conn: &Connection, mapping: &ColumnMapping) -> Result<Self, SchemaError> {
        let existing = table_columns(conn, mapping.table())?;
        Ok(Self::from_columns(&existing, mapping))
    }

    pub fn from_columns(existing: &[String], mapping: &ColumnMapping) -> Self {
        let selected = mapping
            .entries()
            .filter_map(|(field, column)| {
                existing
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(column))
                    .map(|name| (field, name.clone()))
            })
            .collect();
        Self { selected }
    }

    pub fn presence(&self, field: Field) -> ColumnPresence {
        if self.index(field).is_some() {
            ColumnPresence::Present
        } else {
            ColumnPresence::Absent
        }
    }

    /// Position of `field` in the select list, when the table has its column.
    pub fn index(&self, field: Field) -> Option<usize> {
        self.selected.iter().position(|(f, _)| *f == field)
    }

    pub fn missing_required(&self) -> Option<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| field.is_required())
            .find(|field| self.index(*field).is_none())
    }

    pub fn has_all_bookkeeping(&self) -> bool {
        Field::BOOKKEEPING
            .iter()
            .all(|field| self.index(*field).is_some())
    }

    pub fn select_list(&self) -> Result<String, SchemaError> {
        let quoted = self
            .selected
            .iter()
            .map(|(_, name)| quote_identifier(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(quoted.join(", "))
    }
}

/// Columns added by one [`ensure_sync_columns`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub added: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

fn column_definition(field: Field) -> &'static str {
    match field {
        Field::SyncFlag => "BOOLEAN DEFAULT 0",
        Field::SyncDate => "TIMESTAMP NULL",
        _ => "VARCHAR(100) NULL",
    }
}

/// Add whichever of the sync flag, sync date and remote id columns the
/// table lacks.
///
/// Returns immediately when all three exist. Each missing column is checked
/// again right before its `ALTER TABLE`, and a "duplicate column" failure is
/// treated as another process having won the race.
pub fn ensure_sync_columns(
    conn: &Connection,
    mapping: &ColumnMapping,
) -> Result<MigrationReport, SchemaError> {
    let table = mapping.table();
    let layout = TableLayout::resolve(conn, mapping)?;
    let mut report = MigrationReport::default();
    if layout.has_all_bookkeeping() {
        return Ok(report);
    }

    let quoted_table = quote_identifier(table)?;
    for (field, column) in mapping.bookkeeping().iter() {
        if column_exists(conn, table, column)? {
            continue;
        }
        let sql = format!(
            "ALTER TABLE {quoted_table} ADD COLUMN {} {}",
            quote_identifier(column)?,
            column_definition(field)
        );
        debug!("Executing: {sql}");
        match conn.execute(&sql, []) {
            Ok(_) => {
                info!("Added column '{column}' to table '{table}'");
                report.added.push(column.to_string());
            }
            Err(err) if is_duplicate_column(&err) => {
                debug!("Column '{column}' appeared concurrently on '{table}'");
            }
            Err(source) => {
                return Err(SchemaError::Alter {
                    table: table.to_string(),
                    column: column.to_string(),
                    source,
                });
            }
        }
    }
    Ok(report)
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("duplicate column")
}
