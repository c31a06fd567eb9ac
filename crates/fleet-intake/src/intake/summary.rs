use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use super::audit::CompletenessProof;
use super::domain::{BatchId, BatchStatus, ImportBatch, NormalizedTrip};
use super::formats::{FormatCategory, FormatKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceDateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Row-level validation failure as reported to callers. Messages never carry
/// cell values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub message: String,
}

/// Side-effect-free projection of what a commit of the same input would do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestPreviewResult {
    pub format: FormatKind,
    pub category: FormatCategory,
    pub policy_version: u32,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub cancelled_rows: usize,
    pub duplicate_rows: usize,
    pub error_rows: usize,
    pub service_date_range: Option<ServiceDateRange>,
    pub los_counts: BTreeMap<String, usize>,
    pub funding_sources: Vec<String>,
    pub sample_trips: Vec<NormalizedTrip>,
    pub allowed_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<BatchId>,
    pub errors: Vec<String>,
    pub row_errors: Vec<RowIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestImportResult {
    pub import_id: BatchId,
    pub status: BatchStatus,
    pub format: FormatKind,
    pub total_rows: usize,
    pub imported_rows: usize,
    pub duplicate_rows: usize,
    pub cancelled_rows: usize,
    pub error_rows: usize,
    pub los_counts: BTreeMap<String, usize>,
    pub extracted_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
    pub expected_rows: usize,
    pub accounted_rows: usize,
    pub missing_rows: Vec<usize>,
    pub is_complete: bool,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<String>,
}

/// A stored batch together with a proof recomputed from the audit ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAudit {
    pub batch: ImportBatch,
    pub trip_count: usize,
    pub proof: CompletenessProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub format: FormatKind,
    pub vendor_code: &'static str,
    pub category: FormatCategory,
    pub signature: Vec<&'static str>,
    pub extensions: Vec<&'static str>,
    pub known_columns: Vec<&'static str>,
    pub allowed_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatCatalog {
    pub policy_version: u32,
    pub formats: Vec<FormatDescriptor>,
}

/// Aggregates over trips that were (or would be) imported.
#[derive(Debug, Default)]
pub(crate) struct TripDigest {
    range: Option<ServiceDateRange>,
    los_counts: BTreeMap<String, usize>,
    funding_sources: BTreeSet<String>,
}

impl TripDigest {
    pub(crate) fn record(&mut self, trip: &NormalizedTrip) {
        let date = trip.service_date;
        self.range = Some(match self.range {
            Some(range) => ServiceDateRange {
                from: range.from.min(date),
                to: range.to.max(date),
            },
            None => ServiceDateRange { from: date, to: date },
        });

        let los = trip
            .level_of_service
            .as_ref()
            .map(|los| los.code().to_string())
            .unwrap_or_else(|| "UNSPECIFIED".to_string());
        *self.los_counts.entry(los).or_default() += 1;

        if let Some(source) = &trip.funding_source {
            self.funding_sources.insert(source.clone());
        }
    }

    pub(crate) fn range(&self) -> Option<ServiceDateRange> {
        self.range
    }

    pub(crate) fn los_counts(&self) -> BTreeMap<String, usize> {
        self.los_counts.clone()
    }

    pub(crate) fn funding_sources(&self) -> Vec<String> {
        self.funding_sources.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::domain::LevelOfService;

    fn trip(day: u32, los: Option<LevelOfService>, funding: Option<&str>) -> NormalizedTrip {
        NormalizedTrip {
            external_trip_id: format!("T{day}"),
            service_date: NaiveDate::from_ymd_opt(2024, 3, day).expect("valid"),
            appointment_time: None,
            pickup_time: None,
            dropoff_time: None,
            level_of_service: los,
            pickup_city: None,
            dropoff_city: None,
            driver_id: None,
            driver_name: None,
            vehicle_unit: None,
            pickup_location: None,
            dropoff_location: None,
            funding_source: funding.map(str::to_string),
            trip_miles: None,
            cancelled: false,
        }
    }

    #[test]
    fn digest_tracks_range_los_and_funding() {
        let mut digest = TripDigest::default();
        digest.record(&trip(9, Some(LevelOfService::Wheelchair), Some("Medicaid")));
        digest.record(&trip(4, Some(LevelOfService::Wheelchair), None));
        digest.record(&trip(6, None, Some("Medicaid")));
        digest.record(&trip(5, Some(LevelOfService::Ambulatory), Some("Medicare")));

        let range = digest.range().expect("range");
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 3, 4).expect("valid"));
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid"));
        assert_eq!(digest.los_counts().get("WC"), Some(&2));
        assert_eq!(digest.los_counts().get("AMB"), Some(&1));
        assert_eq!(digest.los_counts().get("UNSPECIFIED"), Some(&1));
        assert_eq!(digest.funding_sources(), vec!["Medicaid", "Medicare"]);
    }
}
