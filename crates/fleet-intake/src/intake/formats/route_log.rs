use std::sync::OnceLock;

use super::delimited::DelimitedLayout;
use super::{ColumnVocabulary, FormatAdapter, FormatKind, ParsedFile, StructuralParseError};
use crate::intake::allowlist::CanonicalField;

/// Completed-trip log exported by the routing vendor as CSV.
pub(crate) struct RouteLogCsv;

const LAYOUT: DelimitedLayout = DelimitedLayout {
    kind: FormatKind::RouteLogCsv,
    delimiters: &[b','],
    required: &["Transaction ID", "Driver ID", "Trip Date"],
};

const COLUMNS: &[(&str, CanonicalField)] = &[
    ("Transaction ID", CanonicalField::ExternalTripId),
    ("Trip Date", CanonicalField::ServiceDate),
    ("Appointment", CanonicalField::AppointmentTime),
    ("Pickup Arrive", CanonicalField::PickupTime),
    ("Dropoff Arrive", CanonicalField::DropoffTime),
    ("Space Type", CanonicalField::LevelOfService),
    ("Driver ID", CanonicalField::DriverId),
    ("Driver", CanonicalField::DriverName),
    ("Driver Phone", CanonicalField::DriverPhone),
    ("Driver SSN", CanonicalField::DriverSsn),
    ("Vehicle", CanonicalField::VehicleUnit),
    ("Passenger", CanonicalField::MemberName),
    ("Passenger Phone", CanonicalField::MemberPhone),
    ("Pickup Address", CanonicalField::PickupStreet),
    ("Pickup City", CanonicalField::PickupCity),
    ("Pickup Lat", CanonicalField::PickupLatitude),
    ("Pickup Lon", CanonicalField::PickupLongitude),
    ("Dropoff Address", CanonicalField::DropoffStreet),
    ("Dropoff City", CanonicalField::DropoffCity),
    ("Dropoff Lat", CanonicalField::DropoffLatitude),
    ("Dropoff Lon", CanonicalField::DropoffLongitude),
    ("Status", CanonicalField::TripStatus),
    ("Funding Source", CanonicalField::FundingSource),
    ("Miles", CanonicalField::TripMiles),
];

fn vocabulary() -> &'static ColumnVocabulary {
    static VOCABULARY: OnceLock<ColumnVocabulary> = OnceLock::new();
    VOCABULARY.get_or_init(|| ColumnVocabulary::build(COLUMNS))
}

impl FormatAdapter for RouteLogCsv {
    fn kind(&self) -> FormatKind {
        FormatKind::RouteLogCsv
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::formats::StructuralFault;

    #[test]
    fn missing_driver_column_is_structural() {
        let err = RouteLogCsv
            .parse("Transaction ID,Trip Date\nX1,2024-05-01\n")
            .expect_err("driver id column required");
        assert_eq!(err.kind, StructuralFault::MissingColumn("Driver ID"));
    }

    #[test]
    fn maps_gps_columns() {
        assert_eq!(
            RouteLogCsv.canonical_field("pickup lat"),
            Some(CanonicalField::PickupLatitude)
        );
        assert_eq!(RouteLogCsv.canonical_field("Tip"), None);
    }
}
