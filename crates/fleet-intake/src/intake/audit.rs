//! Append-only audit ledger and the completeness proof computed from it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;

use super::domain::{BatchId, ImportAuditEntry, RowOutcome};

/// Reconciliation of a batch's audit entries against its input row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletenessProof {
    pub batch_id: BatchId,
    pub expected_rows: usize,
    pub imported_rows: usize,
    pub duplicate_rows: usize,
    pub cancelled_rows: usize,
    pub error_rows: usize,
    pub accounted_rows: usize,
    pub missing_rows: Vec<usize>,
    /// Row numbers outside the input range or recorded more than once.
    pub unexpected_rows: Vec<usize>,
    pub is_complete: bool,
}

/// Recompute, from the audit entries alone, that every input row has exactly one
/// terminal outcome. Entries belonging to other batches are ignored.
pub fn audit_completeness(
    batch_id: BatchId,
    total_rows: usize,
    entries: &[ImportAuditEntry],
) -> CompletenessProof {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    let mut unexpected = BTreeSet::new();
    let mut accounted_rows = 0;

    for entry in entries.iter().filter(|entry| entry.batch_id == batch_id) {
        accounted_rows += 1;
        *counts.entry(entry.outcome.label()).or_default() += 1;

        let in_range = (1..=total_rows).contains(&entry.row_number);
        if !in_range || !seen.insert(entry.row_number) {
            unexpected.insert(entry.row_number);
        }
    }

    let missing_rows: Vec<usize> = (1..=total_rows)
        .filter(|row| !seen.contains(row))
        .collect();
    let count = |outcome: RowOutcome| counts.get(outcome.label()).copied().unwrap_or(0);

    CompletenessProof {
        batch_id,
        expected_rows: total_rows,
        imported_rows: count(RowOutcome::Imported),
        duplicate_rows: count(RowOutcome::Duplicate),
        cancelled_rows: count(RowOutcome::Cancelled),
        error_rows: count(RowOutcome::Error),
        accounted_rows,
        is_complete: missing_rows.is_empty() && unexpected.is_empty() && accounted_rows == total_rows,
        missing_rows,
        unexpected_rows: unexpected.into_iter().collect(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("audit ledger io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit entry could not be encoded: {0}")]
    Encode(serde_json::Error),
    #[error("audit ledger line {line} is corrupt: {source}")]
    Decode {
        line: usize,
        source: serde_json::Error,
    },
}

/// Append-only ledger of row outcomes. Entries are never updated or removed.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: ImportAuditEntry) -> Result<(), AuditLogError>;
    fn entries_for(&self, batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<ImportAuditEntry>>,
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, entry: ImportAuditEntry) -> Result<(), AuditLogError> {
        self.entries
            .lock()
            .expect("audit log mutex poisoned")
            .push(entry);
        Ok(())
    }

    fn entries_for(&self, batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError> {
        let guard = self.entries.lock().expect("audit log mutex poisoned");
        Ok(guard
            .iter()
            .filter(|entry| entry.batch_id == *batch_id)
            .cloned()
            .collect())
    }
}

/// JSON-lines ledger on disk, one entry per line, opened in append mode.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditLog for JsonlAuditLog {
    fn append(&self, entry: ImportAuditEntry) -> Result<(), AuditLogError> {
        let mut line = serde_json::to_vec(&entry).map_err(AuditLogError::Encode)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().expect("audit log mutex poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn entries_for(&self, batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError> {
        let _guard = self.write_lock.lock().expect("audit log mutex poisoned");
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ImportAuditEntry =
                serde_json::from_str(&line).map_err(|source| AuditLogError::Decode {
                    line: index + 1,
                    source,
                })?;
            if entry.batch_id == *batch_id {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
