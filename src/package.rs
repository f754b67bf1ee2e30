use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::aggregate::TrendTable;
use crate::app::{RunResult, SourceFailure};
use crate::domain::{DateRange, FilterMode};
use crate::error::TrendsError;
use crate::flatten::{FlatRow, column_order};

pub const SERVERS_CSV: &str = "servers.csv";
pub const YEARLY_CSV: &str = "server_yearly_trends.csv";
pub const MONTHLY_CSV: &str = "server_monthly_trends.csv";
pub const JSON_DIR: &str = "json";
pub const SELECTION_SUMMARY: &str = "json/selection_summary.json";

const TREND_KEY_COLUMNS: [&str; 3] = ["source_id", "display_name", "metric"];
const MONTHLY_DISABLED_NOTE: &str = "Monthly aggregation disabled.";

#[derive(Debug, Clone, Serialize)]
pub struct SelectionSummary<'a> {
    pub selected_source_ids: Vec<&'a str>,
    pub packaged_source_ids: Vec<&'a str>,
    pub date_range: &'a DateRange,
    pub filter: FilterMode,
    pub monthly: bool,
    pub failures: &'a [SourceFailure],
    pub generated_at: String,
}

impl<'a> SelectionSummary<'a> {
    pub fn new(result: &'a RunResult, generated_at: DateTime<Utc>) -> Self {
        Self {
            selected_source_ids: result.selected.iter().map(|id| id.as_str()).collect(),
            packaged_source_ids: result
                .records
                .iter()
                .map(|record| record.source_id.as_str())
                .collect(),
            date_range: &result.range,
            filter: result.filter,
            monthly: result.monthly.is_some(),
            failures: &result.failures,
            generated_at: generated_at.to_rfc3339(),
        }
    }
}

/// Default archive name, stamped to the minute in local time.
pub fn archive_file_name(now: DateTime<Local>) -> String {
    format!(
        "openalex_preprint_servers_results_{}.zip",
        now.format("%Y-%m-%d_%H-%M")
    )
}

/// Builds the whole bundle in memory. Fails when no source made it through
/// fetching, since every file would be empty.
pub fn build_archive(result: &RunResult, generated_at: DateTime<Utc>) -> Result<Vec<u8>, TrendsError> {
    if result.records.is_empty() {
        return Err(TrendsError::Packaging(
            "no source was fetched successfully".to_string(),
        ));
    }
    let mut ids = HashSet::new();
    if let Some(record) = result.records.iter().find(|record| !ids.insert(&record.source_id)) {
        return Err(TrendsError::Packaging(format!(
            "source {} appears more than once",
            record.source_id
        )));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_entry(&mut writer, SERVERS_CSV, options, &servers_csv(&result.rows)?)?;
    add_entry(&mut writer, YEARLY_CSV, options, &trends_csv(&result.yearly)?)?;
    let monthly = match &result.monthly {
        Some(table) => trends_csv(table)?,
        None => monthly_placeholder_csv()?,
    };
    add_entry(&mut writer, MONTHLY_CSV, options, &monthly)?;

    for record in &result.records {
        let content = serde_json::to_vec_pretty(&record.payload)
            .map_err(|err| TrendsError::Packaging(err.to_string()))?;
        let name = format!("{JSON_DIR}/{}.json", record.source_id);
        add_entry(&mut writer, &name, options, &content)?;
    }

    let summary = SelectionSummary::new(result, generated_at);
    let content =
        serde_json::to_vec_pretty(&summary).map_err(|err| TrendsError::Packaging(err.to_string()))?;
    add_entry(&mut writer, SELECTION_SUMMARY, options, &content)?;

    let cursor = writer
        .finish()
        .map_err(|err| TrendsError::Archive(err.to_string()))?;
    Ok(cursor.into_inner())
}

fn add_entry<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    name: &str,
    options: SimpleFileOptions,
    content: &[u8],
) -> Result<(), TrendsError> {
    writer
        .start_file(name, options)
        .map_err(|err| TrendsError::Archive(format!("{name}: {err}")))?;
    writer
        .write_all(content)
        .map_err(|err| TrendsError::Archive(format!("{name}: {err}")))
}

pub fn servers_csv(rows: &[FlatRow]) -> Result<Vec<u8>, TrendsError> {
    let header = column_order(rows);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header).map_err(csv_error)?;
    for row in rows {
        writer
            .write_record(header.iter().map(|column| row.cell(column)))
            .map_err(csv_error)?;
    }
    finish_csv(writer)
}

pub fn trends_csv(table: &TrendTable) -> Result<Vec<u8>, TrendsError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = TREND_KEY_COLUMNS
        .iter()
        .map(|column| column.to_string())
        .chain(table.periods.iter().cloned());
    writer.write_record(header).map_err(csv_error)?;
    for row in &table.rows {
        let mut record = vec![
            row.source_id.clone(),
            row.display_name.clone(),
            row.metric.to_string(),
        ];
        record.extend(table.periods.iter().map(|period| row.value(period).to_string()));
        writer.write_record(&record).map_err(csv_error)?;
    }
    finish_csv(writer)
}

pub fn monthly_placeholder_csv() -> Result<Vec<u8>, TrendsError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["source_id", "display_name", "metric", "note"])
        .map_err(csv_error)?;
    writer
        .write_record(["", "", "info", MONTHLY_DISABLED_NOTE])
        .map_err(csv_error)?;
    finish_csv(writer)
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, TrendsError> {
    writer
        .into_inner()
        .map_err(|err| TrendsError::Csv(err.to_string()))
}

fn csv_error(err: csv::Error) -> TrendsError {
    TrendsError::Csv(err.to_string())
}

/// Reads every entry back and returns the entry names in archive order.
pub fn validate_archive(zip_path: &Path) -> Result<Vec<String>, TrendsError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        TrendsError::Archive(format!("open zip {}: {err}", zip_path.display()))
    })?;
    validate_reader(file)
}

pub fn validate_bytes(archive: &[u8]) -> Result<Vec<String>, TrendsError> {
    validate_reader(Cursor::new(archive))
}

fn validate_reader<R: io::Read + io::Seek>(reader: R) -> Result<Vec<String>, TrendsError> {
    let mut archive =
        ZipArchive::new(reader).map_err(|err| TrendsError::Archive(err.to_string()))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TrendsError::Archive(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(TrendsError::Archive(format!(
                "unsafe entry path: {}",
                entry.name()
            )));
        }
        names.push(entry.name().to_string());
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| TrendsError::Archive(err.to_string()))?;
    }
    Ok(names)
}
