//! Reconciliation engine.
//!
//! Drives the decide/act/persist loop over pending records: look the email
//! up in the directory, reuse a match or create a new entry, then record the
//! remote identifier locally. Records are processed strictly one at a time
//! and every per-record failure is contained in that record's
//! [`SyncOutcome`]. Only an unreachable database at the start of a run aborts
//! it.
//!
//! Re-running is safe without any distributed transaction: a record whose
//! remote entry was created but whose local update was lost is still pending
//! on the next run, and the lookup-before-create step then finds and reuses
//! the existing entry.

use std::{fmt, thread, time::Duration};

use log::{error, info, warn};
use serde::Serialize;

use crate::{
    directory::{DirectoryClient, NewDirectoryRecord},
    error::{ConnectivityError, DirectoryError, StoreError},
    store::{EmployeeRecord, RecordStore, UpdateOutcome},
};

/// How the remote identifier of a record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Reused,
    Created,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Reused => f.write_str("reused"),
            SyncAction::Created => f.write_str("created"),
        }
    }
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub record_id: i64,
    pub email: String,
    #[serde(flatten)]
    pub result: OutcomeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeKind {
    Succeeded {
        remote_id: String,
        action: SyncAction,
        /// The local update matched no row; the remote side is still done.
        row_missing: bool,
    },
    Failed {
        error: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, OutcomeKind::Succeeded { .. })
    }

    pub fn remote_id(&self) -> Option<&str> {
        match &self.result {
            OutcomeKind::Succeeded { remote_id, .. } => Some(remote_id),
            OutcomeKind::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            OutcomeKind::Failed { error } => Some(error),
            OutcomeKind::Succeeded { .. } => None,
        }
    }
}

/// Aggregate of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub outcomes: Vec<SyncOutcome>,
    /// Rows the fetch could not map.
    pub skipped_rows: usize,
    /// Set when the pending rows could not be read at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

impl SyncSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Read-only answer to "is this email in the directory?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Found { remote_id: String },
    NotFound,
    LookupError(String),
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Found { remote_id } => write!(f, "found (remote id {remote_id})"),
            StatusReport::NotFound => f.write_str("not found"),
            StatusReport::LookupError(detail) => write!(f, "lookup error: {detail}"),
        }
    }
}

/// Address looked up in the directory when testing connectivity.
pub const CHECK_EMAIL: &str = "connectivity-check@example.invalid";

pub struct ReconciliationEngine<D> {
    store: RecordStore,
    directory: D,
    pacing: Duration,
}

impl<D: DirectoryClient> ReconciliationEngine<D> {
    pub fn new(store: RecordStore, directory: D, pacing: Duration) -> Self {
        Self {
            store,
            directory,
            pacing,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn test_connectivity(&self) -> bool {
        match self.store.test_connectivity() {
            Ok(()) => true,
            Err(err) => {
                error!("{err}");
                false
            }
        }
    }

    /// Issue a throwaway lookup to prove the directory answers.
    pub fn test_directory(&self) -> Result<(), DirectoryError> {
        self.directory.lookup_by_email(CHECK_EMAIL).map(|_| ())
    }

    /// Reconcile every pending record.
    pub fn run(&self) -> Result<SyncSummary, ConnectivityError> {
        self.store.test_connectivity()?;

        let fetched = match self.store.fetch_pending() {
            Ok(fetched) => fetched,
            Err(err) => {
                error!("Could not read pending records: {err}");
                return Ok(SyncSummary {
                    fetch_error: Some(err.to_string()),
                    ..SyncSummary::default()
                });
            }
        };
        let mut summary = SyncSummary {
            outcomes: Vec::with_capacity(fetched.records.len()),
            skipped_rows: fetched.skipped.len(),
            fetch_error: None,
        };
        if fetched.records.is_empty() {
            info!("No pending records");
            return Ok(summary);
        }

        info!("Reconciling {} pending record(s)", fetched.records.len());
        for record in fetched.records {
            summary.outcomes.push(self.reconcile(record));
            if !self.pacing.is_zero() {
                thread::sleep(self.pacing);
            }
        }
        info!(
            "Reconciliation finished: {} succeeded, {} failed, {} total",
            summary.succeeded(),
            summary.failed(),
            summary.total()
        );
        Ok(summary)
    }

    /// Reconcile a single record by primary key, whatever its sync state.
    pub fn sync_one(&self, id: i64) -> Result<SyncOutcome, StoreError> {
        let record = self.store.fetch_by_id(id)?;
        Ok(self.reconcile(record))
    }

    /// Directory status for `email`; touches nothing locally.
    pub fn check_status(&self, email: &str) -> StatusReport {
        match self.directory.lookup_by_email(email.trim()) {
            Ok(entries) => match entries.into_iter().next() {
                Some(entry) => StatusReport::Found {
                    remote_id: entry.remote_id,
                },
                None => StatusReport::NotFound,
            },
            Err(err) => StatusReport::LookupError(err.to_string()),
        }
    }

    fn reconcile(&self, mut record: EmployeeRecord) -> SyncOutcome {
        let record_id = record.id;
        let email = record.email.clone();
        info!("Processing {record}");
        let result = match self.resolve_and_persist(&mut record) {
            Ok((remote_id, action, update)) => OutcomeKind::Succeeded {
                remote_id,
                action,
                row_missing: update == UpdateOutcome::NoMatchingRow,
            },
            Err(err) => {
                warn!("Failed to reconcile {email}: {err}");
                OutcomeKind::Failed {
                    error: err.to_string(),
                }
            }
        };
        SyncOutcome {
            record_id,
            email,
            result,
        }
    }

    fn resolve_and_persist(
        &self,
        record: &mut EmployeeRecord,
    ) -> anyhow::Result<(String, SyncAction, UpdateOutcome)> {
        let existing = self.directory.lookup_by_email(&record.email)?;
        let (remote_id, action) = match existing.into_iter().next() {
            Some(entry) => {
                info!("{} already in directory as {}", record.email, entry.remote_id);
                (entry.remote_id, SyncAction::Reused)
            }
            None => {
                let remote_id = self
                    .directory
                    .create_record(&NewDirectoryRecord::from(&*record))?;
                info!("Created directory entry {remote_id} for {}", record.email);
                (remote_id, SyncAction::Created)
            }
        };

        record.remote_id = Some(remote_id.clone());
        record.synced = true;
        let update = self.store.mark_synced(record)?;
        Ok((remote_id, action, update))
    }
}
