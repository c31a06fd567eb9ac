use std::collections::BTreeMap;

use super::allowlist::{filter_row, ColumnAllowlistPolicy};
use super::dedup::InFileDeduper;
use super::domain::{NormalizedTrip, PartitionKey, RawRowRef, RowOutcome};
use super::formats::{FormatCategory, FormatKind, ParsedFile};
use super::normalizer::normalize_trip;

/// Classification of one row before persistence.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RowClass {
    Valid(NormalizedTrip),
    Cancelled(String),
    Duplicate(String),
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClassifiedRow {
    pub(crate) row_number: usize,
    pub(crate) raw_ref: RawRowRef,
    pub(crate) class: RowClass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OutcomeTally {
    pub(crate) imported: usize,
    pub(crate) duplicate: usize,
    pub(crate) cancelled: usize,
    pub(crate) error: usize,
}

impl OutcomeTally {
    pub(crate) fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Imported => self.imported += 1,
            RowOutcome::Duplicate => self.duplicate += 1,
            RowOutcome::Cancelled => self.cancelled += 1,
            RowOutcome::Error => self.error += 1,
        }
    }
}

/// State for one pipeline run. Preview and commit both build one of these and
/// run the same `classify` over it; nothing about a run lives outside it.
pub(crate) struct BatchContext<'a> {
    pub(crate) policy: &'a ColumnAllowlistPolicy,
    pub(crate) partition: &'a PartitionKey,
    pub(crate) format: FormatKind,
    pub(crate) ignored_counts: BTreeMap<String, usize>,
    pub(crate) tally: OutcomeTally,
    deduper: InFileDeduper,
}

impl<'a> BatchContext<'a> {
    pub(crate) fn new(
        policy: &'a ColumnAllowlistPolicy,
        partition: &'a PartitionKey,
        format: FormatKind,
    ) -> Self {
        Self {
            policy,
            partition,
            format,
            ignored_counts: BTreeMap::new(),
            tally: OutcomeTally::default(),
            deduper: InFileDeduper::default(),
        }
    }

    /// Filter, normalize, and classify every parsed row, in input order.
    pub(crate) fn classify(&mut self, parsed: &ParsedFile) -> Vec<ClassifiedRow> {
        let mut rows = Vec::with_capacity(parsed.rows.len());

        for row in &parsed.rows {
            let filtered = filter_row(self.policy, self.format, row);
            for column in &filtered.ignored_columns {
                *self.ignored_counts.entry(column.clone()).or_default() += 1;
            }

            let class = if row.is_blank() {
                RowClass::Cancelled("blank row".to_string())
            } else if !row.defects.is_empty() {
                RowClass::Invalid(row.defects.join("; "))
            } else {
                match normalize_trip(self.format, &filtered.safe) {
                    Err(message) => RowClass::Invalid(message),
                    Ok(trip)
                        if trip.cancelled
                            && self.format.category() == FormatCategory::Manifest =>
                    {
                        RowClass::Cancelled("trip cancelled on manifest".to_string())
                    }
                    Ok(trip) => {
                        if self.deduper.is_repeat(self.format, &trip.external_trip_id) {
                            RowClass::Duplicate(
                                "external trip id repeats an earlier row in this file"
                                    .to_string(),
                            )
                        } else {
                            RowClass::Valid(trip)
                        }
                    }
                }
            };

            rows.push(ClassifiedRow {
                row_number: row.row_number,
                raw_ref: row.raw_ref.clone(),
                class,
            });
        }

        rows
    }

    /// Observed vendor columns split into (kept, ignored), in observation order.
    pub(crate) fn column_split(&self, parsed: &ParsedFile) -> (Vec<String>, Vec<String>) {
        let adapter = self.format.adapter();
        parsed.columns.iter().cloned().partition(|column| {
            adapter
                .canonical_field(column)
                .is_some_and(|field| self.policy.keeps(self.format, field))
        })
    }
}
