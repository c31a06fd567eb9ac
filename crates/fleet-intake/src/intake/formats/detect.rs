use std::path::Path;

use super::FormatKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    #[error("'{file_name}' does not match any known export format: {detail}")]
    Unrecognized { file_name: String, detail: String },
}

/// Select the single export format whose structural signature matches `content`.
///
/// The file extension never selects a format on its own; it only breaks a tie
/// between several structural matches.
pub fn detect_format(content: &str, file_name: &str) -> Result<FormatKind, DetectionError> {
    if content.trim_start_matches('\u{feff}').trim().is_empty() {
        return Err(unrecognized(file_name, "file is empty"));
    }

    let candidates: Vec<FormatKind> = FormatKind::ALL
        .into_iter()
        .filter(|kind| kind.adapter().matches(content))
        .collect();

    match candidates.as_slice() {
        [] => Err(unrecognized(
            file_name,
            "no header signature or marker tokens matched",
        )),
        [single] => Ok(*single),
        several => {
            let extension = Path::new(file_name)
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.to_ascii_lowercase());

            let by_extension: Vec<FormatKind> = several
                .iter()
                .copied()
                .filter(|kind| {
                    extension
                        .as_deref()
                        .is_some_and(|ext| kind.extensions().contains(&ext))
                })
                .collect();

            match by_extension.as_slice() {
                [single] => Ok(*single),
                _ => {
                    let labels = several
                        .iter()
                        .map(|kind| kind.label())
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(unrecognized(
                        file_name,
                        &format!("structure is ambiguous between {labels}"),
                    ))
                }
            }
        }
    }
}

fn unrecognized(file_name: &str, detail: &str) -> DetectionError {
    DetectionError::Unrecognized {
        file_name: file_name.to_string(),
        detail: detail.to_string(),
    }
}
