//! Logical-field to physical-column mapping for the employee table.
//!
//! The table belongs to another system, so none of its names are known at
//! compile time. [`MappingConfig`] is the raw, deserialised form; it is
//! resolved once into an immutable [`ColumnMapping`] that every component
//! borrows.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SYNC_FLAG_COLUMN: &str = "synced";
pub const DEFAULT_SYNC_DATE_COLUMN: &str = "synced_at";
pub const DEFAULT_REMOTE_ID_COLUMN: &str = "remote_id";

/// Logical fields of an employee record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    FirstName,
    LastName,
    Email,
    Department,
    Position,
    HireDate,
    SyncFlag,
    SyncDate,
    RemoteId,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Id,
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::Department,
        Field::Position,
        Field::HireDate,
        Field::SyncFlag,
        Field::SyncDate,
        Field::RemoteId,
    ];

    pub const BOOKKEEPING: [Field; 3] = [Field::SyncFlag, Field::SyncDate, Field::RemoteId];

    pub fn key(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::Email => "email",
            Field::Department => "department",
            Field::Position => "position",
            Field::HireDate => "hire_date",
            Field::SyncFlag => "sync_flag",
            Field::SyncDate => "sync_date",
            Field::RemoteId => "remote_id",
        }
    }

    /// Fields whose column must exist for a row to be mapped at all.
    pub fn is_required(self) -> bool {
        matches!(
            self,
            Field::Id
                | Field::FirstName
                | Field::LastName
                | Field::Email
                | Field::Department
                | Field::Position
        )
    }

    pub fn is_bookkeeping(self) -> bool {
        Field::BOOKKEEPING.contains(&self)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnNames {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department: String,
    pub position: String,
    pub hire_date: String,
    /// An omitted key means "not configured", whether or not the file has a
    /// `columns` section. Only [`ColumnNames::builtin`] names all three.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_flag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id: "employee_id".to_string(),
            first_name: "first_name".to_string(),
            last_name: "last_name".to_string(),
            email: "email".to_string(),
            department: "department".to_string(),
            position: "position".to_string(),
            hire_date: "hire_date".to_string(),
            sync_flag: None,
            sync_date: None,
            remote_id: None,
        }
    }
}

impl ColumnNames {
    /// Names used when no configuration file exists at all.
    pub fn builtin() -> Self {
        Self {
            sync_flag: Some(DEFAULT_SYNC_FLAG_COLUMN.to_string()),
            sync_date: Some(DEFAULT_SYNC_DATE_COLUMN.to_string()),
            remote_id: Some(DEFAULT_REMOTE_ID_COLUMN.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MappingConfig {
    pub table: String,
    pub columns: ColumnNames,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            table: "employees".to_string(),
            columns: ColumnNames::default(),
        }
    }
}

impl MappingConfig {
    pub fn builtin() -> Self {
        Self {
            columns: ColumnNames::builtin(),
            ..Self::default()
        }
    }
}

/// The three sync-status columns this tool adds to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookkeepingColumns {
    pub flag: String,
    pub date: String,
    pub remote_id: String,
}

impl BookkeepingColumns {
    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        [
            (Field::SyncFlag, self.flag.as_str()),
            (Field::SyncDate, self.date.as_str()),
            (Field::RemoteId, self.remote_id.as_str()),
        ]
        .into_iter()
    }
}

/// Immutable, validated mapping resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    table: String,
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    department: String,
    position: String,
    hire_date: String,
    bookkeeping: BookkeepingColumns,
    supports_sync_columns: bool,
}

impl ColumnMapping {
    pub fn resolve(config: &MappingConfig) -> Result<Self, ConfigError> {
        let table = required("mapping.table", &config.table)?;
        let columns = &config.columns;
        let optional = |key: &str, value: &Option<String>, default: &str| {
            match value.as_deref().map(str::trim) {
                Some("") => Err(ConfigError::Empty {
                    key: format!("mapping.columns.{key}"),
                }),
                Some(name) => checked_identifier(&format!("mapping.columns.{key}"), name),
                None => Ok(default.to_string()),
            }
        };

        Ok(Self {
            table,
            id: required("mapping.columns.id", &columns.id)?,
            first_name: required("mapping.columns.first_name", &columns.first_name)?,
            last_name: required("mapping.columns.last_name", &columns.last_name)?,
            email: required("mapping.columns.email", &columns.email)?,
            department: required("mapping.columns.department", &columns.department)?,
            position: required("mapping.columns.position", &columns.position)?,
            hire_date: required("mapping.columns.hire_date", &columns.hire_date)?,
            bookkeeping: BookkeepingColumns {
                flag: optional("sync_flag", &columns.sync_flag, DEFAULT_SYNC_FLAG_COLUMN)?,
                date: optional("sync_date", &columns.sync_date, DEFAULT_SYNC_DATE_COLUMN)?,
                remote_id: optional("remote_id", &columns.remote_id, DEFAULT_REMOTE_ID_COLUMN)?,
            },
            supports_sync_columns: columns.sync_flag.is_some(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn column(&self, field: Field) -> &str {
        match field {
            Field::Id => &self.id,
            Field::FirstName => &self.first_name,
            Field::LastName => &self.last_name,
            Field::Email => &self.email,
            Field::Department => &self.department,
            Field::Position => &self.position,
            Field::HireDate => &self.hire_date,
            Field::SyncFlag => &self.bookkeeping.flag,
            Field::SyncDate => &self.bookkeeping.date,
            Field::RemoteId => &self.bookkeeping.remote_id,
        }
    }

    pub fn bookkeeping(&self) -> &BookkeepingColumns {
        &self.bookkeeping
    }

    /// Whether the sync flag column was configured, which selects the
    /// flag-based pending predicate over the remote-id fallback.
    pub fn supports_sync_columns(&self) -> bool {
        self.supports_sync_columns
    }

    pub fn entries(&self) -> impl Iterator<Item = (Field, &str)> {
        Field::ALL.into_iter().map(|field| (field, self.column(field)))
    }
}

fn required(key: &str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty {
            key: key.to_string(),
        });
    }
    checked_identifier(key, trimmed)
}

fn checked_identifier(key: &str, value: &str) -> Result<String, ConfigError> {
    if value.contains('\0') {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            detail: "identifier contains a NUL character".to_string(),
        });
    }
    Ok(value.to_string())
}
