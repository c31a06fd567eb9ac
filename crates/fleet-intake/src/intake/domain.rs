use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::formats::{FormatCategory, FormatKind};

/// Identifier wrapper for committed import batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenancy triple every batch and trip record is tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub opco_code: String,
    pub broker_code: String,
    pub broker_account_code: String,
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.opco_code, self.broker_code, self.broker_account_code
        )
    }
}

/// Lifecycle of an import batch. Completed batches are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub const fn label(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Compliance record for one committed ingestion run. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: BatchId,
    pub format: Option<FormatKind>,
    pub partition: PartitionKey,
    pub fingerprint: String,
    pub file_name: String,
    pub total_rows: usize,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub forced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn pending(
        partition: PartitionKey,
        fingerprint: String,
        file_name: impl Into<String>,
        forced: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: BatchId::generate(),
            format: None,
            partition,
            fingerprint,
            file_name: file_name.into(),
            total_rows: 0,
            status: BatchStatus::Pending,
            failure_reason: None,
            forced,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) fn transition(&mut self, status: BatchStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if status == BatchStatus::Completed {
            self.completed_at = Some(now);
        }
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.transition(BatchStatus::Failed);
    }
}

/// Mobility classification of a trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LevelOfService {
    Ambulatory,
    Wheelchair,
    Stretcher,
    Other(String),
}

impl LevelOfService {
    pub fn from_code(raw: &str) -> Self {
        let code = raw.trim().to_ascii_uppercase();
        match code.as_str() {
            "A" | "AMB" | "AMBULATORY" | "AMBULATORY SEDAN" => LevelOfService::Ambulatory,
            "W" | "WC" | "WCH" | "WHEELCHAIR" | "WHEEL CHAIR" => LevelOfService::Wheelchair,
            "S" | "STR" | "STRETCHER" | "GURNEY" => LevelOfService::Stretcher,
            _ => LevelOfService::Other(code),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            LevelOfService::Ambulatory => "AMB",
            LevelOfService::Wheelchair => "WC",
            LevelOfService::Stretcher => "STR",
            LevelOfService::Other(code) => code,
        }
    }
}

impl From<LevelOfService> for String {
    fn from(value: LevelOfService) -> Self {
        value.code().to_string()
    }
}

impl From<String> for LevelOfService {
    fn from(value: String) -> Self {
        LevelOfService::from_code(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Normalized trip shape. Every field here is on the column allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrip {
    pub external_trip_id: String,
    pub service_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_of_service: Option<LevelOfService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropoff_location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_miles: Option<f64>,
    pub cancelled: bool,
}

/// Persisted trip, bound to its batch and partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTripRecord {
    pub batch_id: BatchId,
    pub partition: PartitionKey,
    pub format: FormatKind,
    #[serde(flatten)]
    pub trip: NormalizedTrip,
}

impl ImportedTripRecord {
    /// Uniqueness key enforced by the repository. Manifests carry none.
    pub fn unique_key(&self) -> Option<TripKey> {
        match self.format.category() {
            FormatCategory::ActualTrip => Some(TripKey {
                partition: self.partition.clone(),
                vendor: self.format.vendor_code(),
                external_trip_id: self.trip.external_trip_id.clone(),
            }),
            FormatCategory::Manifest => None,
        }
    }
}

/// (partition, vendor, external transaction id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TripKey {
    pub partition: PartitionKey,
    pub vendor: &'static str,
    pub external_trip_id: String,
}

/// Terminal classification of one input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    Imported,
    Duplicate,
    Cancelled,
    Error,
}

impl RowOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            RowOutcome::Imported => "imported",
            RowOutcome::Duplicate => "duplicate",
            RowOutcome::Cancelled => "cancelled",
            RowOutcome::Error => "error",
        }
    }
}

/// Pointer back to the source row. Raw content is never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRowRef {
    pub source_line: usize,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportAuditEntry {
    pub batch_id: BatchId,
    pub row_number: usize,
    pub outcome: RowOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub raw_ref: RawRowRef,
    pub recorded_at: DateTime<Utc>,
}
