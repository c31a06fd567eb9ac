//! File-level fingerprints and in-file row de-duplication.
//!
//! Cross-batch row uniqueness is enforced by the repository at insert time
//! (see `IntakeRepository::insert_trip`); this module only covers what can be
//! decided from the file alone.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use super::formats::{FormatCategory, FormatKind};

/// SHA-256 over the file after BOM removal, line-ending normalization, and
/// trailing-whitespace trimming, so re-saved copies of one export collide.
pub fn content_fingerprint(content: &str) -> String {
    let body = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut hasher = Sha256::new();
    let mut lines = body
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', ' ', '\t']))
        .collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}

/// Tracks external ids already seen in the current file for actual-trip exports.
#[derive(Debug, Default)]
pub(crate) struct InFileDeduper {
    seen: HashSet<String>,
}

impl InFileDeduper {
    /// Returns `true` when this id was already seen earlier in the file.
    pub(crate) fn is_repeat(&mut self, format: FormatKind, external_trip_id: &str) -> bool {
        if format.category() != FormatCategory::ActualTrip {
            return false;
        }
        !self.seen.insert(external_trip_id.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_line_endings_bom_and_trailing_blank_lines() {
        let unix = "Trip ID,Date\nT1,2024-01-01\n";
        let windows = "\u{feff}Trip ID,Date\r\nT1,2024-01-01  \r\n\r\n";
        assert_eq!(content_fingerprint(unix), content_fingerprint(windows));
        assert_eq!(content_fingerprint(unix).len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        assert_ne!(
            content_fingerprint("Trip ID\nT1\n"),
            content_fingerprint("Trip ID\nT2\n")
        );
    }

    #[test]
    fn manifests_are_never_deduplicated_in_file() {
        let mut deduper = InFileDeduper::default();
        assert!(!deduper.is_repeat(FormatKind::BrokerManifestCsv, "T1"));
        assert!(!deduper.is_repeat(FormatKind::BrokerManifestCsv, "T1"));

        assert!(!deduper.is_repeat(FormatKind::RouteLogCsv, "X1"));
        assert!(deduper.is_repeat(FormatKind::RouteLogCsv, " X1 "));
    }
}
