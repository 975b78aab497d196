//! Error taxonomy for the reconciliation core.
//!
//! Each failure class has its own type so callers can decide whether it is
//! fatal to a run (only [`ConnectivityError`]), contained at the record
//! boundary ([`DirectoryError`], [`PersistError`]), dropped at row level
//! ([`RowMappingError`]) or merely logged ([`SchemaError`]).

use thiserror::Error;

/// The record store could not be reached before a run started.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("database {location} is unreachable: {source}")]
    Database {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database {location} did not answer a liveness check")]
    Unresponsive { location: String },
}

/// Introspection or additive migration of the bookkeeping columns failed.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to inspect columns of table '{table}': {source}")]
    Introspection {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("table '{table}' does not exist")]
    MissingTable { table: String },

    #[error("failed to add column '{column}' to table '{table}': {source}")]
    Alter {
        table: String,
        column: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

/// A fetched row could not be turned into an [`EmployeeRecord`](crate::store::EmployeeRecord).
#[derive(Debug, Error)]
pub enum RowMappingError {
    #[error("row {row}: column '{column}' is null")]
    NullValue { row: usize, column: String },

    #[error("row {row}: column '{column}' holds {found}, expected {expected}")]
    WrongType {
        row: usize,
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("row {row}: column '{column}' could not be parsed: {detail}")]
    Unparseable {
        row: usize,
        column: String,
        detail: String,
    },

    #[error("row {row}: {source}")]
    Read {
        row: usize,
        #[source]
        source: rusqlite::Error,
    },
}

/// Fetch-level failures of the record store read path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("table '{table}' has no column '{column}' required for field '{field}'")]
    MissingColumn {
        table: String,
        field: &'static str,
        column: String,
    },

    #[error("query on table '{table}' failed: {source}")]
    Query {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("no row with {column} = {id} in table '{table}'")]
    NotFound {
        table: String,
        column: String,
        id: i64,
    },

    #[error(transparent)]
    Row(#[from] RowMappingError),
}

/// The local sync-status update failed after the remote side was resolved.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to open database {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("record {id} has no remote identifier to persist")]
    MissingRemoteId { id: i64 },

    #[error("failed to update sync status of record {id}: {source}")]
    Update {
        id: i64,
        #[source]
        source: rusqlite::Error,
    },
}

/// Failures of the remote identity directory, on lookup or create.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("directory answered {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("malformed directory response: {0}")]
    Malformed(String),

    #[error("invalid directory URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Other(String),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration value '{key}' must not be empty")]
    Empty { key: String },

    #[error("configuration value '{key}' is invalid: {detail}")]
    Invalid { key: String, detail: String },

    #[error("unsupported database driver '{0}' (only 'sqlite' is available)")]
    UnsupportedDriver(String),
}
