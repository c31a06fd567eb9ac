use std::sync::OnceLock;

use super::delimited::DelimitedLayout;
use super::{ColumnVocabulary, FormatAdapter, FormatKind, ParsedFile, StructuralParseError};
use crate::intake::allowlist::CanonicalField;

/// Dispatch-system export of completed rides, tab or pipe delimited.
pub(crate) struct DispatchExportTsv;

const LAYOUT: DelimitedLayout = DelimitedLayout {
    kind: FormatKind::DispatchExportTsv,
    delimiters: &[b'\t', b'|'],
    required: &["Ride Number", "Driver Number", "Service Day"],
};

const COLUMNS: &[(&str, CanonicalField)] = &[
    ("Ride Number", CanonicalField::ExternalTripId),
    ("Service Day", CanonicalField::ServiceDate),
    ("Appt", CanonicalField::AppointmentTime),
    ("PU Time", CanonicalField::PickupTime),
    ("DO Time", CanonicalField::DropoffTime),
    ("Mobility", CanonicalField::LevelOfService),
    ("Driver Number", CanonicalField::DriverId),
    ("Driver Name", CanonicalField::DriverName),
    ("Unit", CanonicalField::VehicleUnit),
    ("Rider", CanonicalField::MemberName),
    ("Rider DOB", CanonicalField::MemberDateOfBirth),
    ("Rider Phone", CanonicalField::MemberPhone),
    ("PU Street", CanonicalField::PickupStreet),
    ("PU City", CanonicalField::PickupCity),
    ("PU Latitude", CanonicalField::PickupLatitude),
    ("PU Longitude", CanonicalField::PickupLongitude),
    ("DO Street", CanonicalField::DropoffStreet),
    ("DO City", CanonicalField::DropoffCity),
    ("DO Latitude", CanonicalField::DropoffLatitude),
    ("DO Longitude", CanonicalField::DropoffLongitude),
    ("Ride Status", CanonicalField::TripStatus),
    ("Payer", CanonicalField::FundingSource),
    ("Loaded Miles", CanonicalField::TripMiles),
    ("Dispatcher Notes", CanonicalField::Notes),
];

fn vocabulary() -> &'static ColumnVocabulary {
    static VOCABULARY: OnceLock<ColumnVocabulary> = OnceLock::new();
    VOCABULARY.get_or_init(|| ColumnVocabulary::build(COLUMNS))
}

impl FormatAdapter for DispatchExportTsv {
    fn kind(&self) -> FormatKind {
        FormatKind::DispatchExportTsv
    }

    fn signature(&self) -> &'static [&'static str] {
        LAYOUT.required
    }

    fn matches(&self, content: &str) -> bool {
        LAYOUT.sniff_delimiter(content).is_some()
    }

    fn parse(&self, content: &str) -> Result<ParsedFile, StructuralParseError> {
        LAYOUT.parse(content)
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        vocabulary().lookup(column)
    }

    fn known_columns(&self) -> &'static [(&'static str, CanonicalField)] {
        COLUMNS
    }
}
