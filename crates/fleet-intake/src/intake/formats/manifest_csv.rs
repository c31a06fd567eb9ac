use std::sync::OnceLock;

use super::delimited::DelimitedLayout;
use super::{ColumnVocabulary, FormatAdapter, FormatKind, ParsedFile, StructuralParseError};
use crate::intake::allowlist::CanonicalField;

/// Comma-delimited broker manifest (pre-dispatch schedule).
pub(crate) struct BrokerManifestCsv;

const LAYOUT: DelimitedLayout = DelimitedLayout {
    kind: FormatKind::BrokerManifestCsv,
    delimiters: &[b','],
    required: &["Trip ID", "Date of Service", "Level of Service"],
};

const COLUMNS: &[(&str, CanonicalField)] = &[
    ("Trip ID", CanonicalField::ExternalTripId),
    ("Date of Service", CanonicalField::ServiceDate),
    ("Appointment Time", CanonicalField::AppointmentTime),
    ("Pickup Time", CanonicalField::PickupTime),
    ("Level of Service", CanonicalField::LevelOfService),
    ("Member Name", CanonicalField::MemberName),
    ("Member ID", CanonicalField::MemberId),
    ("Medicaid ID", CanonicalField::MemberId),
    ("Member Phone", CanonicalField::MemberPhone),
    ("Phone", CanonicalField::MemberPhone),
    ("DOB", CanonicalField::MemberDateOfBirth),
    ("Date of Birth", CanonicalField::MemberDateOfBirth),
    ("Pickup Address", CanonicalField::PickupStreet),
    ("Pickup City", CanonicalField::PickupCity),
    ("Dropoff Address", CanonicalField::DropoffStreet),
    ("Dropoff City", CanonicalField::DropoffCity),
    ("Funding Source", CanonicalField::FundingSource),
    ("Trip Status", CanonicalField::TripStatus),
    ("Status", CanonicalField::TripStatus),
    ("Miles", CanonicalField::TripMiles),
    ("Special Instructions", CanonicalField::Notes),
    ("Comments", CanonicalField::Notes),
];

fn vocabulary() -> &'static ColumnVocabulary {
    static VOCABULARY: OnceLock<ColumnVocabulary> = OnceLock::new();
    VOCABULARY.get_or_init(|| ColumnVocabulary::build(COLUMNS))
}

impl FormatAdapter for BrokerManifestCsv {
    fn kind(&self) -> FormatKind {
        FormatKind::BrokerManifestCsv
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
