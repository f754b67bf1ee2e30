use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TrendsError {
    #[error("no OpenAlex source matches: {0}")]
    #[diagnostic(help("check the spelling or pass the OpenAlex source id (e.g. S4306402512)"))]
    NotFound(String),

    #[error("fetching source {source_id} failed: {message}")]
    Fetch { source_id: String, message: String },

    #[error("cannot package results: {0}")]
    Packaging(String),

    #[error("OpenAlex request failed: {0}")]
    OpenAlexHttp(String),

    #[error("OpenAlex returned status {status}: {message}")]
    OpenAlexStatus { status: u16, message: String },

    #[error("invalid OpenAlex source id: {0}")]
    InvalidSourceId(String),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("invalid date range: {from} is after {to}")]
    InvalidDateRange { from: String, to: String },

    #[error("no sources selected")]
    #[diagnostic(help("run `preprint-trends resolve <NAME>...` first or pass --pick"))]
    NoSelection,

    #[error("missing config file at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("csv error: {0}")]
    Csv(String),
}

impl TrendsError {
    /// Whether the failure belongs to a single input or source and should
    /// not abort the rest of the batch.
    pub fn is_per_source(&self) -> bool {
        matches!(
            self,
            TrendsError::NotFound(_)
                | TrendsError::Fetch { .. }
                | TrendsError::OpenAlexHttp(_)
                | TrendsError::OpenAlexStatus { .. }
        )
    }
}
