//! Column allowlist policy and the privacy filter.
//!
//! The filter is default-deny: a vendor column survives only when its format maps
//! it to a canonical field and the active policy version marks that field `keep`.
//! `SafeRow` can only be built here, so nothing reaches normalization or
//! persistence without passing through `filter_row`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::formats::{FormatKind, RawRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    ExternalTripId,
    ServiceDate,
    AppointmentTime,
    PickupTime,
    DropoffTime,
    LevelOfService,
    PickupCity,
    DropoffCity,
    DriverId,
    DriverName,
    VehicleUnit,
    PickupLatitude,
    PickupLongitude,
    DropoffLatitude,
    DropoffLongitude,
    TripStatus,
    FundingSource,
    TripMiles,
    MemberName,
    MemberId,
    MemberPhone,
    MemberDateOfBirth,
    PickupStreet,
    DropoffStreet,
    DriverPhone,
    DriverSsn,
    Notes,
}

impl CanonicalField {
    pub const fn label(self) -> &'static str {
        match self {
            CanonicalField::ExternalTripId => "external_trip_id",
            CanonicalField::ServiceDate => "service_date",
            CanonicalField::AppointmentTime => "appointment_time",
            CanonicalField::PickupTime => "pickup_time",
            CanonicalField::DropoffTime => "dropoff_time",
            CanonicalField::LevelOfService => "level_of_service",
            CanonicalField::PickupCity => "pickup_city",
            CanonicalField::DropoffCity => "dropoff_city",
            CanonicalField::DriverId => "driver_id",
            CanonicalField::DriverName => "driver_name",
            CanonicalField::VehicleUnit => "vehicle_unit",
            CanonicalField::PickupLatitude => "pickup_latitude",
            CanonicalField::PickupLongitude => "pickup_longitude",
            CanonicalField::DropoffLatitude => "dropoff_latitude",
            CanonicalField::DropoffLongitude => "dropoff_longitude",
            CanonicalField::TripStatus => "trip_status",
            CanonicalField::FundingSource => "funding_source",
            CanonicalField::TripMiles => "trip_miles",
            CanonicalField::MemberName => "member_name",
            CanonicalField::MemberId => "member_id",
            CanonicalField::MemberPhone => "member_phone",
            CanonicalField::MemberDateOfBirth => "member_date_of_birth",
            CanonicalField::PickupStreet => "pickup_street",
            CanonicalField::DropoffStreet => "dropoff_street",
            CanonicalField::DriverPhone => "driver_phone",
            CanonicalField::DriverSsn => "driver_ssn",
            CanonicalField::Notes => "notes",
        }
    }

    /// Patient- or person-identifying content. No policy version may keep these.
    pub const fn is_protected(self) -> bool {
        matches!(
            self,
            CanonicalField::MemberName
                | CanonicalField::MemberId
                | CanonicalField::MemberPhone
                | CanonicalField::MemberDateOfBirth
                | CanonicalField::PickupStreet
                | CanonicalField::DropoffStreet
                | CanonicalField::DriverPhone
                | CanonicalField::DriverSsn
                | CanonicalField::Notes
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDisposition {
    Keep,
    Drop,
}

#[derive(Debug, thiserror::Error)]
pub enum AllowlistError {
    #[error("failed to read allowlist policy: {0}")]
    Io(#[from] std::io::Error),
    #[error("allowlist policy is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("allowlist policy version must be at least 1")]
    InvalidVersion,
    #[error("policy v{version} keeps protected field {field:?} for {format}")]
    ProtectedFieldKept {
        version: u32,
        format: FormatKind,
        field: CanonicalField,
    },
}

/// Versioned, immutable table of permitted output fields per format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAllowlistPolicy {
    version: u32,
    #[serde(rename = "formats")]
    rules: BTreeMap<FormatKind, BTreeMap<CanonicalField, ColumnDisposition>>,
}

const KEPT_V1: &[CanonicalField] = &[
    CanonicalField::ExternalTripId,
    CanonicalField::ServiceDate,
    CanonicalField::AppointmentTime,
    CanonicalField::PickupTime,
    CanonicalField::DropoffTime,
    CanonicalField::LevelOfService,
    CanonicalField::PickupCity,
    CanonicalField::DropoffCity,
    CanonicalField::DriverId,
    CanonicalField::DriverName,
    CanonicalField::VehicleUnit,
    CanonicalField::PickupLatitude,
    CanonicalField::PickupLongitude,
    CanonicalField::DropoffLatitude,
    CanonicalField::DropoffLongitude,
    CanonicalField::TripStatus,
    CanonicalField::FundingSource,
    CanonicalField::TripMiles,
];

impl ColumnAllowlistPolicy {
    /// Built-in policy version 1: every non-protected field each format maps is kept,
    /// every protected field is explicitly dropped.
    pub fn builtin() -> Self {
        let mut rules = BTreeMap::new();
        for format in FormatKind::ALL {
            let mut fields = BTreeMap::new();
            for (_, field) in format.adapter().known_columns() {
                let disposition = if KEPT_V1.contains(field) {
                    ColumnDisposition::Keep
                } else {
                    ColumnDisposition::Drop
                };
                fields.insert(*field, disposition);
            }
            rules.insert(format, fields);
        }

        Self { version: 1, rules }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AllowlistError> {
        let policy: Self = serde_json::from_reader(reader)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, AllowlistError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    fn validate(&self) -> Result<(), AllowlistError> {
        if self.version == 0 {
            return Err(AllowlistError::InvalidVersion);
        }

        for (format, fields) in &self.rules {
            if let Some((field, _)) = fields.iter().find(|(field, disposition)| {
                field.is_protected() && **disposition == ColumnDisposition::Keep
            }) {
                return Err(AllowlistError::ProtectedFieldKept {
                    version: self.version,
                    format: *format,
                    field: *field,
                });
            }
        }

        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn disposition(&self, format: FormatKind, field: CanonicalField) -> ColumnDisposition {
        self.rules
            .get(&format)
            .and_then(|fields| fields.get(&field))
            .copied()
            .unwrap_or(ColumnDisposition::Drop)
    }

    pub fn keeps(&self, format: FormatKind, field: CanonicalField) -> bool {
        self.disposition(format, field) == ColumnDisposition::Keep
    }

    /// Vendor columns this policy lets through for `format`.
    pub fn allowed_columns(&self, format: FormatKind) -> Vec<String> {
        format
            .adapter()
            .known_columns()
            .iter()
            .filter(|(_, field)| self.keeps(format, *field))
            .map(|(column, _)| (*column).to_string())
            .collect()
    }

    pub fn allowed_fields(&self, format: FormatKind) -> BTreeSet<CanonicalField> {
        self.rules
            .get(&format)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, disposition)| **disposition == ColumnDisposition::Keep)
                    .map(|(field, _)| *field)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Row content restricted to allowlisted canonical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeRow {
    row_number: usize,
    fields: BTreeMap<CanonicalField, String>,
}

impl SafeRow {
    pub fn row_number(&self) -> usize {
        self.row_number
    }

    pub fn get(&self, field: CanonicalField) -> Option<&str> {
        self.fields
            .get(&field)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn fields(&self) -> impl Iterator<Item = (CanonicalField, &str)> {
        self.fields.iter().map(|(field, value)| (*field, value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredRow {
    pub safe: SafeRow,
    /// Vendor columns present on the row that the policy did not let through.
    pub ignored_columns: Vec<String>,
}

pub fn filter_row(policy: &ColumnAllowlistPolicy, format: FormatKind, row: &RawRow) -> FilteredRow {
    let adapter = format.adapter();
    let mut fields = BTreeMap::new();
    let mut ignored_columns = Vec::new();

    for (column, value) in &row.cells {
        match adapter.canonical_field(column) {
            Some(field) if policy.keeps(format, field) => {
                let slot = fields.entry(field).or_insert_with(String::new);
                if slot.trim().is_empty() {
                    *slot = value.trim().to_string();
                }
            }
            _ => ignored_columns.push(column.clone()),
        }
    }

    FilteredRow {
        safe: SafeRow {
            row_number: row.row_number,
            fields,
        },
        ignored_columns,
    }
}
