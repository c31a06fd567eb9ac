use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use super::allowlist::ColumnAllowlistPolicy;
use super::audit::{audit_completeness, AuditLog, AuditLogError, CompletenessProof};
use super::classify::{BatchContext, ClassifiedRow, RowClass};
use super::dedup::content_fingerprint;
use super::domain::{
    BatchId, ImportAuditEntry, ImportBatch, ImportedTripRecord, PartitionKey, RawRowRef,
    RowOutcome,
};
use super::formats::{
    detect_format, DetectionError, FormatKind, ParsedFile, StructuralParseError,
};
use super::partition::{resolve_partition, PartitionDirectory, PartitionError};
use super::repository::{IntakeRepository, RepositoryError};
use super::summary::{
    BatchAudit, FormatCatalog, FormatDescriptor, ManifestImportResult, ManifestPreviewResult,
    RowIssue, TripDigest,
};

pub const DEFAULT_SAMPLE_SIZE: usize = 5;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Raw upload plus the caller's partition identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeRequest {
    pub file_name: String,
    pub content: String,
    #[serde(default)]
    pub opco_code: Option<String>,
    #[serde(default)]
    pub broker_account_code: Option<String>,
    /// Commit even when the same file was already imported into the partition.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeSettings {
    pub sample_size: usize,
    pub max_upload_bytes: usize,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Error raised by the intake service.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error(transparent)]
    Detection(#[from] DetectionError),
    #[error(transparent)]
    Structural(#[from] StructuralParseError),
    #[error("file was already imported into this partition")]
    DuplicateFile { batch_id: Option<BatchId> },
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("import batch {0} not found")]
    UnknownBatch(BatchId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditLogError),
}

impl IntakeError {
    pub fn kind(&self) -> &'static str {
        match self {
            IntakeError::Partition(PartitionError::Missing { .. }) => "partition_missing",
            IntakeError::Partition(PartitionError::Invalid { .. }) => "partition_invalid",
            IntakeError::Partition(PartitionError::Directory(_)) => "partition_directory",
            IntakeError::Detection(_) => "unrecognized_format",
            IntakeError::Structural(_) => "structural_parse",
            IntakeError::DuplicateFile { .. } => "duplicate_file",
            IntakeError::PayloadTooLarge { .. } => "payload_too_large",
            IntakeError::UnknownBatch(_) => "unknown_batch",
            IntakeError::Repository(_) => "repository",
            IntakeError::Audit(_) => "audit_log",
        }
    }
}

/// Two-phase ingestion pipeline: `preview` predicts, `commit` persists. Both run
/// the same detection, parsing, filtering, and classification path.
pub struct IntakeService<R, A, D> {
    repository: Arc<R>,
    audit: Arc<A>,
    directory: Arc<D>,
    policy: Arc<ColumnAllowlistPolicy>,
    settings: IntakeSettings,
}

impl<R, A, D> IntakeService<R, A, D>
where
    R: IntakeRepository + 'static,
    A: AuditLog + 'static,
    D: PartitionDirectory + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<A>,
        directory: Arc<D>,
        policy: Arc<ColumnAllowlistPolicy>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            repository,
            audit,
            directory,
            policy,
            settings,
        }
    }

    pub fn policy(&self) -> &ColumnAllowlistPolicy {
        &self.policy
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn settings(&self) -> IntakeSettings {
        self.settings
    }

    /// Partition first, then size. Nothing is parsed for a rejected request.
    fn admit(&self, request: &IntakeRequest) -> Result<PartitionKey, IntakeError> {
        let partition = resolve_partition(
            self.directory.as_ref(),
            request.opco_code.as_deref(),
            request.broker_account_code.as_deref(),
        )?;

        let size = request.content.len();
        if size > self.settings.max_upload_bytes {
            return Err(IntakeError::PayloadTooLarge {
                size,
                limit: self.settings.max_upload_bytes,
            });
        }

        Ok(partition)
    }

    fn parse(&self, request: &IntakeRequest) -> Result<ParsedFile, IntakeError> {
        let format = detect_format(&request.content, &request.file_name)?;
        let parsed = format.adapter().parse(&request.content)?;
        info!(
            format = format.label(),
            rows = parsed.rows.len(),
            unmapped_columns = parsed.unmapped_columns.len(),
            "export detected"
        );
        Ok(parsed)
    }

    /// Parse and classify without persisting anything.
    pub fn preview(&self, request: &IntakeRequest) -> Result<ManifestPreviewResult, IntakeError> {
        let partition = self.admit(request)?;
        let parsed = self.parse(request)?;
        let fingerprint = content_fingerprint(&request.content);
        let prior = self
            .repository
            .find_completed_batch(&partition, &fingerprint)?;

        let mut ctx = BatchContext::new(&self.policy, &partition, parsed.format);
        let rows = ctx.classify(&parsed);
        log_ignored_columns(&ctx);

        let mut digest = TripDigest::default();
        let mut sample_trips = Vec::new();
        let mut row_errors = Vec::new();
        for row in rows {
            let outcome = match row.class {
                RowClass::Valid(trip) => {
                    digest.record(&trip);
                    if sample_trips.len() < self.settings.sample_size {
                        sample_trips.push(trip);
                    }
                    RowOutcome::Imported
                }
                RowClass::Cancelled(_) => RowOutcome::Cancelled,
                RowClass::Duplicate(_) => RowOutcome::Duplicate,
                RowClass::Invalid(message) => {
                    row_errors.push(RowIssue {
                        row: row.row_number,
                        message,
                    });
                    RowOutcome::Error
                }
            };
            ctx.tally.record(outcome);
        }

        let (_, ignored_columns) = ctx.column_split(&parsed);
        let mut errors = file_warnings(&parsed);
        if let Some(batch) = &prior {
            errors.push(format!(
                "file was already imported into this partition as batch {}",
                batch.id
            ));
        }

        Ok(ManifestPreviewResult {
            format: parsed.format,
            category: parsed.format.category(),
            policy_version: self.policy.version(),
            total_rows: parsed.rows.len(),
            valid_rows: ctx.tally.imported,
            cancelled_rows: ctx.tally.cancelled,
            duplicate_rows: ctx.tally.duplicate,
            error_rows: ctx.tally.error,
            service_date_range: digest.range(),
            los_counts: digest.los_counts(),
            funding_sources: digest.funding_sources(),
            sample_trips,
            allowed_columns: self.policy.allowed_columns(parsed.format),
            ignored_columns,
            is_duplicate: prior.is_some(),
            duplicate_of: prior.map(|batch| batch.id),
            errors,
            row_errors,
        })
    }

    /// Persist surviving rows, write one audit entry per input row, and prove
    /// completeness from the ledger.
    pub fn commit(&self, request: &IntakeRequest) -> Result<ManifestImportResult, IntakeError> {
        let partition = self.admit(request)?;
        let fingerprint = content_fingerprint(&request.content);

        if !request.force {
            if let Some(prior) = self
                .repository
                .find_completed_batch(&partition, &fingerprint)?
            {
                warn!(batch_id = %prior.id, partition = %partition, "duplicate file refused");
                return Err(IntakeError::DuplicateFile {
                    batch_id: Some(prior.id),
                });
            }
        }

        let batch = self
            .repository
            .begin_batch(ImportBatch::pending(
                partition.clone(),
                fingerprint,
                request.file_name.clone(),
                request.force,
            ))
            .map_err(|err| match err {
                RepositoryError::Conflict => IntakeError::DuplicateFile { batch_id: None },
                other => IntakeError::Repository(other),
            })?;

        let parsed = match self.parse(request) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(batch_id = %batch.id, kind = err.kind(), "batch failed before parsing completed");
                self.repository.fail_batch(&batch.id, &err.to_string())?;
                return Err(err);
            }
        };
        self.repository
            .mark_processing(&batch.id, parsed.format, parsed.rows.len())?;

        let mut ctx = BatchContext::new(&self.policy, &partition, parsed.format);
        let rows = ctx.classify(&parsed);
        log_ignored_columns(&ctx);

        let mut digest = TripDigest::default();
        let mut errors = Vec::new();
        for ClassifiedRow {
            row_number,
            raw_ref,
            class,
        } in rows
        {
            let (outcome, reason) = self.persist_row(batch.id, &ctx, class, &mut digest);
            if outcome == RowOutcome::Error {
                errors.push(RowIssue {
                    row: row_number,
                    message: reason.clone().unwrap_or_default(),
                });
            }
            ctx.tally.record(outcome);
            if let Err(err) = self.record(batch.id, row_number, raw_ref, outcome, reason) {
                self.fail_quietly(&batch.id, &format!("audit ledger write failed: {err}"));
                return Err(err.into());
            }
        }

        let entries = self.audit.entries_for(&batch.id)?;
        let proof = audit_completeness(batch.id, parsed.rows.len(), &entries);
        let stored = if proof.is_complete {
            self.repository.complete_batch(&batch.id)?
        } else {
            let reason = incomplete_reason(&proof);
            error!(
                batch_id = %batch.id,
                missing = proof.missing_rows.len(),
                unexpected = proof.unexpected_rows.len(),
                "completeness audit failed"
            );
            self.repository.fail_batch(&batch.id, &reason)?
        };

        info!(
            batch_id = %batch.id,
            partition = %partition,
            format = parsed.format.label(),
            imported = proof.imported_rows,
            duplicate = proof.duplicate_rows,
            cancelled = proof.cancelled_rows,
            error = proof.error_rows,
            status = stored.status.label(),
            "import batch finished"
        );

        let (extracted_columns, ignored_columns) = ctx.column_split(&parsed);
        Ok(ManifestImportResult {
            import_id: batch.id,
            status: stored.status,
            format: parsed.format,
            total_rows: parsed.rows.len(),
            imported_rows: proof.imported_rows,
            duplicate_rows: proof.duplicate_rows,
            cancelled_rows: proof.cancelled_rows,
            error_rows: proof.error_rows,
            los_counts: digest.los_counts(),
            extracted_columns,
            ignored_columns,
            expected_rows: proof.expected_rows,
            accounted_rows: proof.accounted_rows,
            missing_rows: proof.missing_rows,
            is_complete: proof.is_complete,
            errors,
            warnings: file_warnings(&parsed),
        })
    }

    /// Stored batch plus a proof recomputed from the audit ledger.
    pub fn audit_batch(&self, batch_id: &BatchId) -> Result<BatchAudit, IntakeError> {
        let batch = self
            .repository
            .batch(batch_id)?
            .ok_or(IntakeError::UnknownBatch(*batch_id))?;
        let entries = self.audit.entries_for(batch_id)?;
        let trip_count = self.repository.trips_for_batch(batch_id)?.len();
        let proof = audit_completeness(*batch_id, batch.total_rows, &entries);

        Ok(BatchAudit {
            batch,
            trip_count,
            proof,
        })
    }

    pub fn catalog(&self) -> FormatCatalog {
        FormatCatalog {
            policy_version: self.policy.version(),
            formats: FormatKind::ALL
                .into_iter()
                .map(|format| {
                    let adapter = format.adapter();
                    FormatDescriptor {
                        format,
                        vendor_code: format.vendor_code(),
                        category: format.category(),
                        signature: adapter.signature().to_vec(),
                        extensions: format.extensions().to_vec(),
                        known_columns: adapter
                            .known_columns()
                            .iter()
                            .map(|(column, _)| *column)
                            .collect(),
                        allowed_columns: self.policy.allowed_columns(format),
                    }
                })
                .collect(),
        }
    }

    fn persist_row(
        &self,
        batch_id: BatchId,
        ctx: &BatchContext<'_>,
        class: RowClass,
        digest: &mut TripDigest,
    ) -> (RowOutcome, Option<String>) {
        match class {
            RowClass::Valid(trip) => {
                let record = ImportedTripRecord {
                    batch_id,
                    partition: ctx.partition.clone(),
                    format: ctx.format,
                    trip: trip.clone(),
                };
                match self.repository.insert_trip(record) {
                    Ok(()) => {
                        digest.record(&trip);
                        (RowOutcome::Imported, None)
                    }
                    Err(RepositoryError::Conflict) => (
                        RowOutcome::Duplicate,
                        Some(
                            "external trip id already imported for this vendor and partition"
                                .to_string(),
                        ),
                    ),
                    Err(err) => (
                        RowOutcome::Error,
                        Some(format!("row could not be stored: {err}")),
                    ),
                }
            }
            RowClass::Cancelled(reason) => (RowOutcome::Cancelled, Some(reason)),
            RowClass::Duplicate(reason) => (RowOutcome::Duplicate, Some(reason)),
            RowClass::Invalid(message) => (RowOutcome::Error, Some(message)),
        }
    }

    fn record(
        &self,
        batch_id: BatchId,
        row_number: usize,
        raw_ref: RawRowRef,
        outcome: RowOutcome,
        reason: Option<String>,
    ) -> Result<(), AuditLogError> {
        self.audit.append(ImportAuditEntry {
            batch_id,
            row_number,
            outcome,
            reason,
            raw_ref,
            recorded_at: Utc::now(),
        })
    }

    fn fail_quietly(&self, batch_id: &BatchId, reason: &str) {
        if let Err(err) = self.repository.fail_batch(batch_id, reason) {
            error!(batch_id = %batch_id, error = %err, "could not mark batch failed");
        }
    }
}

fn file_warnings(parsed: &ParsedFile) -> Vec<String> {
    let mut warnings: Vec<String> = parsed
        .unmapped_columns
        .iter()
        .map(|column| format!("column '{column}' is not recognized for {} and was ignored", parsed.format))
        .collect();

    let defective = parsed.rows.iter().filter(|row| !row.defects.is_empty()).count();
    if defective > 0 {
        warnings.push(format!("{defective} row(s) could not be tokenized cleanly"));
    }
    warnings
}

fn incomplete_reason(proof: &CompletenessProof) -> String {
    format!(
        "completeness audit failed: {} of {} rows accounted, {} missing, {} unexpected",
        proof.accounted_rows,
        proof.expected_rows,
        proof.missing_rows.len(),
        proof.unexpected_rows.len()
    )
}

fn log_ignored_columns(ctx: &BatchContext<'_>) {
    if ctx.ignored_counts.is_empty() {
        return;
    }
    let ignored_columns = ctx
        .ignored_counts
        .iter()
        .map(|(column, count)| format!("{column}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        format = ctx.format.label(),
        partition = %ctx.partition,
        %ignored_columns,
        "columns withheld by allowlist"
    );
}
