//! Read targets from a CSV file.
//!
//! Columns are located by header name, case-insensitively: the code column is
//! `code` or `id`, the URL column `url`, `lien`, or `link`. Rows missing
//! either field are skipped. Repeated codes keep their first occurrence.

use crate::error::InputError;
use crate::models::Target;
use itertools::Itertools;
use std::path::Path;
use tracing::{info, instrument, warn};

const CODE_COLUMNS: &[&str] = &["code", "id"];
const URL_COLUMNS: &[&str] = &["url", "lien", "link"];

#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn read_targets(path: &Path, delimiter: u8) -> Result<Vec<Target>, InputError> {
    let csv_err = |source| InputError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();
    let find = |names: &[&str], column: &'static str| {
        headers
            .iter()
            .position(|h| names.contains(&h.as_str()))
            .ok_or_else(|| InputError::MissingColumn {
                path: path.to_path_buf(),
                column,
                found: headers.join(", "),
            })
    };
    let code_idx = find(CODE_COLUMNS, "code")?;
    let url_idx = find(URL_COLUMNS, "url")?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let code = record.get(code_idx).unwrap_or_default();
        let url = record.get(url_idx).unwrap_or_default();
        match Target::new(code, url) {
            Some(target) => rows.push(target),
            None => warn!(row = line + 2, %code, "Skipping row with empty code or URL"),
        }
    }

    let total = rows.len();
    let targets: Vec<Target> = rows
        .into_iter()
        .unique_by(|t| t.code().to_string())
        .collect();
    if targets.len() < total {
        warn!(dropped = total - targets.len(), "Dropped rows with duplicate codes");
    }
    info!(count = targets.len(), "Loaded targets");
    Ok(targets)
}
