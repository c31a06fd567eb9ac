use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{
    strip_bom, ColumnVocabulary, FormatAdapter, FormatKind, ParsedFile, RawRow, StructuralFault,
    StructuralParseError,
};
use crate::intake::allowlist::CanonicalField;
use crate::intake::normalizer::normalize_header;

/// Broker manifest as text extracted from a scanned or structured document.
///
/// The extraction yields a `TRIP MANIFEST` banner, page furniture, and one block
/// per trip. A block opens with `Trip #: <id>` and continues with `Label: value`
/// lines until the next block.
pub(crate) struct BrokerManifestText;

const BANNER: &str = "TRIP MANIFEST";
const TRIP_LABEL: &str = "Trip #";
const SIGNATURE: &[&str] = &[BANNER, "Trip #:"];
/// Stands in for labels outside the vocabulary. Their text is never kept.
pub(crate) const UNRECOGNIZED_LABEL: &str = "unrecognized label";

const COLUMNS: &[(&str, CanonicalField)] = &[
    ("Trip #", CanonicalField::ExternalTripId),
    ("Service Date", CanonicalField::ServiceDate),
    ("Appt Time", CanonicalField::AppointmentTime),
    ("Pickup Time", CanonicalField::PickupTime),
    ("LOS", CanonicalField::LevelOfService),
    ("Mobility", CanonicalField::LevelOfService),
    ("Member", CanonicalField::MemberName),
    ("Member ID", CanonicalField::MemberId),
    ("Phone", CanonicalField::MemberPhone),
    ("DOB", CanonicalField::MemberDateOfBirth),
    ("Pickup", CanonicalField::PickupStreet),
    ("Pickup City", CanonicalField::PickupCity),
    ("Dropoff", CanonicalField::DropoffStreet),
    ("Dropoff City", CanonicalField::DropoffCity),
    ("Funding Source", CanonicalField::FundingSource),
    ("Plan", CanonicalField::FundingSource),
    ("Status", CanonicalField::TripStatus),
    ("Notes", CanonicalField::Notes),
];

fn vocabulary() -> &'static ColumnVocabulary {
    static VOCABULARY: OnceLock<ColumnVocabulary> = OnceLock::new();
    VOCABULARY.get_or_init(|| ColumnVocabulary::build(COLUMNS))
}

impl FormatAdapter for BrokerManifestText {
    fn kind(&self) -> FormatKind {
        FormatKind::BrokerManifestText
    }

    fn signature(&self) -> &'static [&'static str] {
        SIGNATURE
    }

    fn matches(&self, content: &str) -> bool {
        let body = strip_bom(content);
        has_banner(body) && body.lines().any(|line| trip_opening(line).is_some())
    }

    fn parse(&self, content: &str) -> Result<ParsedFile, StructuralParseError> {
        let body = strip_bom(content);
        if body.trim().is_empty() {
            return Err(fault(StructuralFault::Empty));
        }
        if !has_banner(body) {
            return Err(fault(StructuralFault::MissingMarker(BANNER)));
        }

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        let mut current: Option<TripBlock> = None;

        for (index, line) in body.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim_matches(|c: char| c.is_whitespace() || c == '\u{c}');

            if let Some(trip_id) = trip_opening(trimmed) {
                if let Some(block) = current.take() {
                    rows.push(block.finish());
                }
                let mut block = TripBlock::open(rows.len() + 1, line_number);
                block.push_line(trimmed);
                block.insert(TRIP_LABEL, trip_id, line_number);
                note_column(&mut columns, TRIP_LABEL);
                current = Some(block);
                continue;
            }

            let Some(block) = current.as_mut() else {
                continue;
            };

            if trimmed.is_empty() || is_page_furniture(trimmed) {
                continue;
            }

            block.push_line(trimmed);
            match trimmed.split_once(':') {
                Some((label, value)) if !label.trim().is_empty() => {
                    let label = label.trim();
                    if vocabulary().lookup(label).is_some() {
                        note_column(&mut columns, label);
                        block.insert(label, value.trim(), line_number);
                    } else {
                        note_column(&mut columns, UNRECOGNIZED_LABEL);
                        block.note_unrecognized();
                    }
                }
                _ => block
                    .defects
                    .push(format!("line {line_number} is not a 'Label: value' pair")),
            }
        }

        if let Some(block) = current.take() {
            rows.push(block.finish());
        }

        if rows.is_empty() {
            return Err(fault(StructuralFault::NoTripBlocks));
        }

        Ok(ParsedFile::new(FormatKind::BrokerManifestText, rows, columns))
    }

    fn canonical_field(&self, column: &str) -> Option<CanonicalField> {
        vocabulary().lookup(column)
    }

    fn known_columns(&self) -> &'static [(&'static str, CanonicalField)] {
        COLUMNS
    }
}

struct TripBlock {
    row_number: usize,
    source_line: usize,
    lines: Vec<String>,
    cells: BTreeMap<String, String>,
    defects: Vec<String>,
}

impl TripBlock {
    fn open(row_number: usize, source_line: usize) -> Self {
        Self {
            row_number,
            source_line,
            lines: Vec::new(),
            cells: BTreeMap::new(),
            defects: Vec::new(),
        }
    }

    fn push_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn insert(&mut self, label: &str, value: &str, line_number: usize) {
        let normalized = normalize_header(label);
        if self
            .cells
            .keys()
            .any(|existing| normalize_header(existing) == normalized)
        {
            self.defects
                .push(format!("line {line_number} repeats label '{label}'"));
            return;
        }
        self.cells.insert(label.to_string(), value.to_string());
    }

    fn note_unrecognized(&mut self) {
        self.cells.entry(UNRECOGNIZED_LABEL.to_string()).or_default();
    }

    fn finish(self) -> RawRow {
        let mut row = RawRow::new(self.row_number, self.source_line, &self.lines.join("\n"));
        row.cells = self.cells;
        row.defects = self.defects;
        row
    }
}

fn fault(kind: StructuralFault) -> StructuralParseError {
    StructuralParseError {
        format: FormatKind::BrokerManifestText,
        kind,
    }
}

fn has_banner(body: &str) -> bool {
    body.lines()
        .any(|line| line.to_ascii_uppercase().contains(BANNER))
}

/// Returns the trip id when the line opens a trip block.
fn trip_opening(line: &str) -> Option<&str> {
    let (label, value) = line.trim().split_once(':')?;
    (normalize_header(label) == "trip #").then(|| value.trim())
}

fn is_page_furniture(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    (upper.starts_with("PAGE ") && upper.contains(" OF "))
        || upper.contains(BANNER)
        || upper.starts_with("***")
        || upper.starts_with("END OF ")
        || upper.starts_with("TOTAL")
        || line.chars().all(|c| c == '-' || c == '=' || c == '_')
}

fn note_column(columns: &mut Vec<String>, label: &str) {
    let normalized = normalize_header(label);
    if !columns
        .iter()
        .any(|existing| normalize_header(existing) == normalized)
    {
        columns.push(label.to_string());
    }
}
