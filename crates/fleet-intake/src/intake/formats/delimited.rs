use std::collections::HashSet;

use csv::{ReaderBuilder, StringRecord, Trim};

use super::{
    strip_bom, FormatKind, ParsedFile, RawRow, StructuralFault, StructuralParseError,
};
use crate::intake::normalizer::normalize_header;

/// Header-row export shape shared by the tabular adapters.
pub(crate) struct DelimitedLayout {
    pub(crate) kind: FormatKind,
    pub(crate) delimiters: &'static [u8],
    pub(crate) required: &'static [&'static str],
}

impl DelimitedLayout {
    /// Delimiter whose header row carries every required column.
    pub(crate) fn sniff_delimiter(&self, content: &str) -> Option<u8> {
        let line = first_line(content)?;
        self.delimiters.iter().copied().find(|delimiter| {
            read_header(line, *delimiter)
                .map(|header| missing_required(&header, self.required).is_none())
                .unwrap_or(false)
        })
    }

    pub(crate) fn parse(&self, content: &str) -> Result<ParsedFile, StructuralParseError> {
        let body = strip_bom(content);
        if body.trim().is_empty() {
            return Err(self.fault(StructuralFault::Empty));
        }

        let delimiter = self
            .sniff_delimiter(body)
            .unwrap_or_else(|| self.delimiters[0]);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(body.as_bytes());

        let header = reader
            .headers()
            .map_err(|err| self.fault(StructuralFault::UndecodableHeader(err.to_string())))?
            .clone();
        let columns = header_columns(&header);

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(normalize_header(column)) {
                return Err(self.fault(StructuralFault::DuplicateColumn(column.clone())));
            }
        }

        if let Some(missing) = missing_required(&columns, self.required) {
            return Err(self.fault(StructuralFault::MissingColumn(missing)));
        }

        let separator = (delimiter as char).to_string();
        let mut rows = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let row_number = index + 1;
            match result {
                Ok(record) => {
                    let source_line = record
                        .position()
                        .map(|position| position.line() as usize)
                        .unwrap_or(row_number + 1);
                    let raw_text = record.iter().collect::<Vec<_>>().join(&separator);
                    let mut row = RawRow::new(row_number, source_line, &raw_text);

                    for (column, value) in columns.iter().zip(record.iter()) {
                        row.cells.insert(column.clone(), value.to_string());
                    }
                    if record.len() != columns.len() {
                        row.defects.push(format!(
                            "expected {} fields, found {}",
                            columns.len(),
                            record.len()
                        ));
                    }
                    rows.push(row);
                }
                Err(err) => {
                    let source_line = err
                        .position()
                        .map(|position| position.line() as usize)
                        .unwrap_or(row_number + 1);
                    let mut row = RawRow::new(row_number, source_line, "");
                    row.defects.push(format!("row could not be decoded: {err}"));
                    rows.push(row);
                }
            }
        }

        if rows.is_empty() {
            return Err(self.fault(StructuralFault::NoRows));
        }

        Ok(ParsedFile::new(self.kind, rows, columns))
    }

    fn fault(&self, kind: StructuralFault) -> StructuralParseError {
        StructuralParseError {
            format: self.kind,
            kind,
        }
    }
}

fn first_line(content: &str) -> Option<&str> {
    strip_bom(content)
        .lines()
        .find(|line| !line.trim().is_empty())
}

fn read_header(line: &str, delimiter: u8) -> Option<Vec<String>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(line.as_bytes());
    let record = reader.records().next()?.ok()?;
    Some(header_columns(&record))
}

fn header_columns(record: &StringRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let name = name.trim_start_matches('\u{feff}').trim();
            if name.is_empty() {
                format!("(blank column {})", index + 1)
            } else {
                name.to_string()
            }
        })
        .collect()
}

fn missing_required(columns: &[String], required: &'static [&'static str]) -> Option<&'static str> {
    let present: HashSet<String> = columns.iter().map(|c| normalize_header(c)).collect();
    required
        .iter()
        .copied()
        .find(|column| !present.contains(&normalize_header(column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: DelimitedLayout = DelimitedLayout {
        kind: FormatKind::DispatchExportTsv,
        delimiters: &[b'\t', b'|'],
        required: &["Ride Number", "Service Day"],
    };

    #[test]
    fn sniffs_the_delimiter_that_exposes_required_columns() {
        assert_eq!(
            LAYOUT.sniff_delimiter("Ride Number|Service Day\n1|2024-01-02\n"),
            Some(b'|')
        );
        assert_eq!(
            LAYOUT.sniff_delimiter("\n\nRide Number\tService Day\n"),
            Some(b'\t')
        );
        assert_eq!(LAYOUT.sniff_delimiter("Ride Number,Service Day\n"), None);
    }

    #[test]
    fn short_rows_are_kept_with_a_defect() {
        let parsed = LAYOUT
            .parse("Ride Number\tService Day\tUnit\nR1\t2024-01-02\t7\nR2\t2024-01-02\n")
            .expect("parses");
        assert_eq!(parsed.rows.len(), 2);
        assert!(parsed.rows[0].defects.is_empty());
        assert_eq!(parsed.rows[1].row_number, 2);
        assert_eq!(parsed.rows[1].raw_ref.source_line, 3);
        assert_eq!(parsed.rows[1].defects, vec!["expected 3 fields, found 2"]);
    }

    #[test]
    fn duplicate_header_is_structural() {
        let err = LAYOUT
            .parse("Ride Number\tService Day\tservice day\nR1\t2024-01-02\t\n")
            .expect_err("duplicate header");
        assert_eq!(
            err.kind,
            StructuralFault::DuplicateColumn("service day".to_string())
        );
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let err = LAYOUT
            .parse("Ride Number\tService Day\n")
            .expect_err("no rows");
        assert_eq!(err.kind, StructuralFault::NoRows);
    }
}
