//! Vendor export adapters.
//!
//! Every supported export is a `FormatKind` variant with exactly one adapter. The
//! detector picks the variant once from the file structure; nothing downstream
//! branches on the vendor again.

mod delimited;
mod detect;
mod dispatch_export;
mod manifest_csv;
mod manifest_text;
mod route_log;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::allowlist::CanonicalField;
use super::domain::RawRowRef;
use super::normalizer::normalize_header;

pub use detect::{detect_format, DetectionError};

/// Whether an export is a pre-dispatch schedule or a record of completed trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatCategory {
    Manifest,
    ActualTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    BrokerManifestCsv,
    BrokerManifestText,
    RouteLogCsv,
    DispatchExportTsv,
}

impl FormatKind {
    pub const ALL: [FormatKind; 4] = [
        FormatKind::BrokerManifestCsv,
        FormatKind::BrokerManifestText,
        FormatKind::RouteLogCsv,
        FormatKind::DispatchExportTsv,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            FormatKind::BrokerManifestCsv => "broker_manifest_csv",
            FormatKind::BrokerManifestText => "broker_manifest_text",
            FormatKind::RouteLogCsv => "route_log_csv",
            FormatKind::DispatchExportTsv => "dispatch_export_tsv",
        }
    }

    /// Vendor identity used by the row-level duplicate key.
    pub const fn vendor_code(self) -> &'static str {
        match self {
            FormatKind::BrokerManifestCsv => "broker-manifest",
            FormatKind::BrokerManifestText => "broker-manifest-text",
            FormatKind::RouteLogCsv => "routelog",
            FormatKind::DispatchExportTsv => "dispatch-export",
        }
    }

    pub const fn category(self) -> FormatCategory {
        match self {
            FormatKind::BrokerManifestCsv | FormatKind::BrokerManifestText => {
                FormatCategory::Manifest
            }
            FormatKind::RouteLogCsv | FormatKind::DispatchExportTsv => FormatCategory::ActualTrip,
        }
    }

    /// Extensions vendors commonly ship this export with. Only used to break ties.
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            FormatKind::BrokerManifestCsv | FormatKind::RouteLogCsv => &["csv"],
            FormatKind::BrokerManifestText => &["txt", "pdf"],
            FormatKind::DispatchExportTsv => &["tsv", "txt", "psv"],
        }
    }

    pub fn adapter(self) -> &'static dyn FormatAdapter {
        match self {
            FormatKind::BrokerManifestCsv => &manifest_csv::BrokerManifestCsv,
            FormatKind::BrokerManifestText => &manifest_text::BrokerManifestText,
            FormatKind::RouteLogCsv => &route_log::RouteLogCsv,
            FormatKind::DispatchExportTsv => &dispatch_export::DispatchExportTsv,
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One input row tokenized into vendor-native column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub row_number: usize,
    pub cells: BTreeMap<String, String>,
    /// Tokenization problems local to this row.
    pub defects: Vec<String>,
    pub raw_ref: RawRowRef,
}

impl RawRow {
    pub(crate) fn new(row_number: usize, source_line: usize, raw_text: &str) -> Self {
        Self {
            row_number,
            cells: BTreeMap::new(),
            defects: Vec::new(),
            raw_ref: RawRowRef {
                source_line,
                digest: row_digest(raw_text),
            },
        }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.values().all(|value| value.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub format: FormatKind,
    pub rows: Vec<RawRow>,
    /// Vendor columns in the order they were first observed.
    pub columns: Vec<String>,
    /// Observed columns that have no canonical mapping for this format.
    pub unmapped_columns: Vec<String>,
}

impl ParsedFile {
    pub(crate) fn new(format: FormatKind, rows: Vec<RawRow>, columns: Vec<String>) -> Self {
        let adapter = format.adapter();
        let unmapped_columns = columns
            .iter()
            .filter(|column| adapter.canonical_field(column).is_none())
            .cloned()
            .collect();

        Self {
            format,
            rows,
            columns,
            unmapped_columns,
        }
    }
}

/// Fatal, batch-level parse failure. Raised before any row is produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{format} export is structurally invalid: {kind}")]
pub struct StructuralParseError {
    pub format: FormatKind,
    pub kind: StructuralFault,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralFault {
    #[error("file is empty")]
    Empty,
    #[error("no data rows after the header")]
    NoRows,
    #[error("header could not be decoded: {0}")]
    UndecodableHeader(String),
    #[error("required column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),
    #[error("marker '{0}' not found")]
    MissingMarker(&'static str),
    #[error("no trip blocks found")]
    NoTripBlocks,
}

/// Vendor column vocabulary for one format.
pub(crate) struct ColumnVocabulary {
    by_normalized: HashMap<String, CanonicalField>,
}

impl ColumnVocabulary {
    pub(crate) fn build(entries: &[(&str, CanonicalField)]) -> Self {
        let mut by_normalized = HashMap::with_capacity(entries.len());
        for (column, field) in entries {
            by_normalized.insert(normalize_header(column), *field);
        }
        Self { by_normalized }
    }

    pub(crate) fn lookup(&self, column: &str) -> Option<CanonicalField> {
        self.by_normalized.get(&normalize_header(column)).copied()
    }
}

/// Capability shared by every vendor adapter. Adapters tokenize only; privacy
/// and tenancy decisions happen downstream.
pub trait FormatAdapter: Send + Sync {
    fn kind(&self) -> FormatKind;

    /// Column names or marker tokens whose presence identifies the export.
    fn signature(&self) -> &'static [&'static str];

    fn matches(&self, content: &str) -> bool;

    fn parse(&self, content: &str) -> Result<ParsedFile, StructuralParseError>;

    fn canonical_field(&self, column: &str) -> Option<CanonicalField>;

    /// Vendor column names this adapter maps, in declaration order.
    fn known_columns(&self) -> &'static [(&'static str, CanonicalField)];
}

pub(crate) fn row_digest(raw_text: &str) -> String {
    let hash = Sha256::digest(raw_text.as_bytes());
    format!("{hash:x}")
}

pub(crate) fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_resolves_to_its_own_adapter() {
        for kind in FormatKind::ALL {
            assert_eq!(kind.adapter().kind(), kind);
            assert!(!kind.adapter().signature().is_empty());
        }
    }

    #[test]
    fn vendor_codes_are_distinct() {
        let mut codes: Vec<_> = FormatKind::ALL.iter().map(|k| k.vendor_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), FormatKind::ALL.len());
    }

    #[test]
    fn vocabulary_lookup_ignores_case_and_spacing() {
        let vocabulary = ColumnVocabulary::build(&[("Trip ID", CanonicalField::ExternalTripId)]);
        assert_eq!(
            vocabulary.lookup("\u{feff}  trip   id "),
            Some(CanonicalField::ExternalTripId)
        );
        assert_eq!(vocabulary.lookup("Trip"), None);
    }
}
