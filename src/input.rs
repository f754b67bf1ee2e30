use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::TrendsError;

pub const TEMPLATE_CSV: &str = "server_name\nbioRxiv\nmedRxiv\narXiv\n";

/// Collapses internal whitespace and trims.
pub fn normalize_name(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the first column of a CSV whose first row is a header.
pub fn names_from_csv(content: &str) -> Result<Vec<String>, TrendsError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());
    let mut names = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| TrendsError::Csv(err.to_string()))?;
        if let Some(first) = record.get(0) {
            let name = normalize_name(first);
            if !name.is_empty() {
                names.push(name);
            }
        }
    }
    Ok(names)
}

pub fn names_from_csv_file(path: &Path) -> Result<Vec<String>, TrendsError> {
    let content = fs::read_to_string(path)
        .map_err(|err| TrendsError::Filesystem(format!("read {}: {err}", path.display())))?;
    names_from_csv(&content)
}

pub fn names_from_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(normalize_name)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Drops blanks and repeats, keeping first-seen order.
pub fn dedupe_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| normalize_name(&name))
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}
