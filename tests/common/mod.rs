#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directory_sync::directory::{DirectoryClient, DirectoryEntry, NewDirectoryRecord};
use directory_sync::engine::{ReconciliationEngine, SyncOutcome, SyncSummary};
use directory_sync::error::DirectoryError;
use directory_sync::mapping::{ColumnMapping, MappingConfig};
use directory_sync::store::RecordStore;
use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Employee table without any bookkeeping columns.
pub const BARE_TABLE: &str = "CREATE TABLE employees (
    employee_id INTEGER PRIMARY KEY,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    department TEXT,
    position TEXT,
    hire_date TEXT
)";

/// Employee table that already carries the default bookkeeping columns.
pub const PREPARED_TABLE: &str = "CREATE TABLE employees (
    employee_id INTEGER PRIMARY KEY,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    department TEXT,
    position TEXT,
    hire_date TEXT,
    synced BOOLEAN DEFAULT 0,
    synced_at TIMESTAMP NULL,
    remote_id VARCHAR(100) NULL
)";

/// Scratch directory holding one SQLite database.
pub struct TestDatabase {
    temp_dir: TempDir,
    path: PathBuf,
}

impl TestDatabase {
    /// Creates `hr.db` and runs `ddl` against it.
    pub fn new(ddl: &str) -> Self {
        let temp_dir = tempdir().expect("temp dir");
        let path = temp_dir.path().join("hr.db");
        let conn = Connection::open(&path).expect("create database");
        conn.execute_batch(ddl).expect("create table");
        Self { temp_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.path).expect("open database")
    }

    pub fn insert(&self, id: i64, first: &str, last: &str, email: Option<&str>) {
        self.conn()
            .execute(
                "INSERT INTO employees (employee_id, first_name, last_name, email, department, position)
                 VALUES (?1, ?2, ?3, ?4, 'Engineering', 'Developer')",
                rusqlite::params![id, first, last, email],
            )
            .expect("insert employee");
    }

    pub fn execute(&self, sql: &str) {
        self.conn().execute_batch(sql).expect("execute sql");
    }

    /// Columns of `employees` in declaration order.
    pub fn columns(&self) -> Vec<String> {
        let conn = self.conn();
        let mut stmt = conn.prepare("PRAGMA table_info(employees)").unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// `(flag, date, remote id)` for one row, read with the default names.
    pub fn bookkeeping(&self, id: i64) -> (Option<i64>, Option<String>, Option<String>) {
        self.conn()
            .query_row(
                "SELECT synced, synced_at, remote_id FROM employees WHERE employee_id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("read bookkeeping")
    }

    pub fn store(&self, mapping: ColumnMapping) -> RecordStore {
        RecordStore::new(&self.path, mapping)
    }

    pub fn default_store(&self) -> RecordStore {
        self.store(default_mapping())
    }

    pub fn write_config(&self, extra: &str) -> PathBuf {
        let config = format!(
            "database:\n  url: {}\nsync:\n  pacing_ms: 0\n{extra}",
            self.path.display()
        );
        let path = self.temp_dir.path().join("directory-sync.yaml");
        fs::write(&path, config).expect("write config");
        path
    }
}

pub fn default_mapping() -> ColumnMapping {
    ColumnMapping::resolve(&MappingConfig::builtin()).expect("builtin mapping")
}

/// Mapping with no sync flag column configured.
pub fn remote_id_only_mapping() -> ColumnMapping {
    let mut config = MappingConfig::default();
    config.columns.remote_id = Some("remote_id".to_string());
    ColumnMapping::resolve(&config).expect("fallback mapping")
}

/// In-memory directory that records every call.
///
/// Created entries become visible to later lookups, like the real service.
#[derive(Default)]
pub struct RecordingDirectory {
    entries: RefCell<Vec<(String, String)>>,
    failing_lookups: HashSet<String>,
    failing_creates: HashSet<String>,
    lookups: RefCell<Vec<String>>,
    creates: RefCell<Vec<NewDirectoryRecord>>,
}

impl RecordingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, email: &str, remote_id: &str) -> Self {
        self.entries
            .borrow_mut()
            .push((email.to_string(), remote_id.to_string()));
        self
    }

    pub fn failing_lookup(mut self, email: &str) -> Self {
        self.failing_lookups.insert(email.to_string());
        self
    }

    pub fn failing_create(mut self, email: &str) -> Self {
        self.failing_creates.insert(email.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.borrow().clone()
    }

    pub fn created_emails(&self) -> Vec<String> {
        self.creates.borrow().iter().map(|r| r.email.clone()).collect()
    }

    pub fn creates(&self) -> Vec<NewDirectoryRecord> {
        self.creates.borrow().clone()
    }
}

impl DirectoryClient for RecordingDirectory {
    fn lookup_by_email(&self, email: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.lookups.borrow_mut().push(email.to_string());
        if self.failing_lookups.contains(email) {
            return Err(DirectoryError::Status {
                url: "memory://lookup".to_string(),
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(self
            .entries
            .borrow()
            .iter()
            .filter(|(known, _)| known == email)
            .map(|(known, remote_id)| DirectoryEntry {
                remote_id: remote_id.clone(),
                email: Some(known.clone()),
                user_name: Some(known.clone()),
            })
            .collect())
    }

    fn create_record(&self, record: &NewDirectoryRecord) -> Result<String, DirectoryError> {
        if self.failing_creates.contains(&record.email) {
            return Err(DirectoryError::Status {
                url: "memory://create".to_string(),
                status: 400,
                body: "invalid record".to_string(),
            });
        }
        let mut creates = self.creates.borrow_mut();
        creates.push(record.clone());
        let remote_id = format!("SYS{}", creates.len() + 1);
        self.entries
            .borrow_mut()
            .push((record.email.clone(), remote_id.clone()));
        Ok(remote_id)
    }
}

pub fn engine<'a>(
    db: &TestDatabase,
    directory: &'a RecordingDirectory,
) -> ReconciliationEngine<&'a RecordingDirectory> {
    ReconciliationEngine::new(db.default_store(), directory, Duration::ZERO)
}

/// Ids of the pending rows, sorted; fetch order is unspecified.
pub fn pending_ids(store: &RecordStore) -> Vec<i64> {
    let mut ids: Vec<i64> = store
        .fetch_pending()
        .expect("fetch pending")
        .records
        .iter()
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    ids
}

pub fn outcome_for(summary: &SyncSummary, record_id: i64) -> &SyncOutcome {
    summary
        .outcomes
        .iter()
        .find(|o| o.record_id == record_id)
        .unwrap_or_else(|| panic!("no outcome for record {record_id}"))
}
