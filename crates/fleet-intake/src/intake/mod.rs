//! Broker manifest and actual-trip ingestion.
//!
//! Raw vendor exports move through one pipeline: partition resolution, structural
//! format detection, adapter parsing, allowlist filtering, normalization, duplicate
//! suppression, and (on commit) persistence with a per-row audit trail whose
//! completeness is re-proven from the ledger after every batch.

pub mod allowlist;
pub mod audit;
mod classify;
pub mod dedup;
pub mod domain;
pub mod formats;
mod normalizer;
pub mod partition;
pub mod repository;
pub mod router;
pub mod service;
pub mod summary;

#[cfg(test)]
mod tests;

pub use allowlist::{
    filter_row, AllowlistError, CanonicalField, ColumnAllowlistPolicy, ColumnDisposition,
    FilteredRow, SafeRow,
};
pub use audit::{
    audit_completeness, AuditLog, AuditLogError, CompletenessProof, InMemoryAuditLog,
    JsonlAuditLog,
};
pub use dedup::content_fingerprint;
pub use domain::{
    BatchId, BatchStatus, GeoPoint, ImportAuditEntry, ImportBatch, ImportedTripRecord,
    LevelOfService, NormalizedTrip, PartitionKey, RawRowRef, RowOutcome, TripKey,
};
pub use formats::{
    detect_format, DetectionError, FormatAdapter, FormatCategory, FormatKind, ParsedFile,
    RawRow, StructuralFault, StructuralParseError,
};
pub use partition::{
    resolve_partition, Broker, BrokerAccount, InMemoryPartitionDirectory, OperatingCompany,
    PartitionDirectory, PartitionError, PartitionReferenceData,
};
pub use repository::{InMemoryIntakeStore, IntakeRepository, RepositoryError};
pub use router::{intake_router, intake_status};
pub use service::{
    IntakeError, IntakeRequest, IntakeService, IntakeSettings, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_SAMPLE_SIZE,
};
pub use summary::{
    BatchAudit, FormatCatalog, FormatDescriptor, ManifestImportResult, ManifestPreviewResult,
    RowIssue, ServiceDateRange,
};
