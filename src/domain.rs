use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TrendsError;

pub const OPENALEX_ID_PREFIX: &str = "https://openalex.org/";

static PUBLICATION_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})(?:-(\d{1,2}))?(?:-(\d{1,2}))?").unwrap());

/// Canonical OpenAlex source identifier, always `S` followed by digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> String {
        format!("{OPENALEX_ID_PREFIX}{}", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceId {
    type Err = TrendsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let short = trimmed
            .strip_prefix(OPENALEX_ID_PREFIX)
            .or_else(|| trimmed.strip_prefix("openalex.org/"))
            .unwrap_or(trimmed);
        let normalized = short.to_uppercase();
        let digits = normalized.strip_prefix('S').unwrap_or("");
        let is_valid = !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(TrendsError::InvalidSourceId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for SourceId {
    type Error = TrendsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

/// Which works-to-source relation is used when scanning works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    #[default]
    PrimaryLocation,
    HostVenue,
    Both,
}

impl FilterMode {
    pub fn filters(self, id: &SourceId) -> Vec<String> {
        let mut filters = Vec::new();
        if matches!(self, FilterMode::PrimaryLocation | FilterMode::Both) {
            filters.push(format!("primary_location.source.id:{id}"));
        }
        if matches!(self, FilterMode::HostVenue | FilterMode::Both) {
            filters.push(format!("host_venue.id:{id}"));
        }
        filters
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::PrimaryLocation => write!(f, "primary-location"),
            FilterMode::HostVenue => write!(f, "host-venue"),
            FilterMode::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Bins a work's `publication_date`. Accepts `YYYY-MM-DD`, `YYYY-MM` and
    /// a bare `YYYY` (binned to January).
    pub fn from_publication_date(value: &str) -> Option<Self> {
        let caps = PUBLICATION_DATE.captures(value.trim())?;
        let year = caps.get(1)?.as_str().parse().ok()?;
        let month = match caps.get(2) {
            Some(month) => month.as_str().parse().ok()?,
            None => 1,
        };
        Self::new(year, month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Inclusive publication-date window; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self, TrendsError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(TrendsError::InvalidDateRange {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        Ok(Self { from, to })
    }

    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, TrendsError> {
        Self::new(parse_date(from)?, parse_date(to)?)
    }

    pub fn years(from: i32, to: i32) -> Result<Self, TrendsError> {
        let start = NaiveDate::from_ymd_opt(from, 1, 1)
            .ok_or_else(|| TrendsError::InvalidDate(from.to_string()))?;
        let end = NaiveDate::from_ymd_opt(to, 12, 31)
            .ok_or_else(|| TrendsError::InvalidDate(to.to_string()))?;
        Self::new(Some(start), Some(end))
    }

    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn year_bounds(&self) -> (Option<i32>, Option<i32>) {
        (
            self.from.map(|date| date.year()),
            self.to.map(|date| date.year()),
        )
    }

    pub fn month_bounds(&self) -> (Option<YearMonth>, Option<YearMonth>) {
        (
            self.from.map(YearMonth::from_date),
            self.to.map(YearMonth::from_date),
        )
    }

    pub fn filters(&self) -> Vec<String> {
        let mut filters = Vec::new();
        if let Some(from) = self.from {
            filters.push(format!("from_publication_date:{}", from.format("%Y-%m-%d")));
        }
        if let Some(to) = self.to {
            filters.push(format!("to_publication_date:{}", to.format("%Y-%m-%d")));
        }
        filters
    }
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>, TrendsError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| TrendsError::InvalidDate(value.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    WorksCount,
    CitedByCount,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::WorksCount, Metric::CitedByCount];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::WorksCount => "works_count",
            Metric::CitedByCount => "cited_by_count",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_source_id_forms() {
        let short: SourceId = "S4306402512".parse().unwrap();
        let url: SourceId = "https://openalex.org/S4306402512".parse().unwrap();
        let lower: SourceId = " s4306402512 ".parse().unwrap();
        assert_eq!(short, url);
        assert_eq!(short, lower);
        assert_eq!(short.url(), "https://openalex.org/S4306402512");
    }

    #[test]
    fn parse_source_id_invalid() {
        assert_matches!(
            "bioRxiv".parse::<SourceId>(),
            Err(TrendsError::InvalidSourceId(_))
        );
        assert_matches!("S".parse::<SourceId>(), Err(TrendsError::InvalidSourceId(_)));
        assert_matches!(
            "W123".parse::<SourceId>(),
            Err(TrendsError::InvalidSourceId(_))
        );
    }

    #[test]
    fn year_month_bins() {
        assert_eq!(
            YearMonth::from_publication_date("2021-03-15"),
            YearMonth::new(2021, 3)
        );
        assert_eq!(
            YearMonth::from_publication_date("2021-7"),
            YearMonth::new(2021, 7)
        );
        assert_eq!(
            YearMonth::from_publication_date("2019"),
            YearMonth::new(2019, 1)
        );
        assert_eq!(YearMonth::from_publication_date("2019-13-01"), None);
        assert_eq!(YearMonth::from_publication_date("n/a"), None);
        assert_eq!(
            YearMonth::new(2020, 12).unwrap().succ(),
            YearMonth::new(2021, 1).unwrap()
        );
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let err = DateRange::parse(Some("2022-01-01"), Some("2021-01-01")).unwrap_err();
        assert_matches!(err, TrendsError::InvalidDateRange { .. });
        assert_matches!(
            DateRange::parse(Some("2022/01/01"), None),
            Err(TrendsError::InvalidDate(_))
        );
    }

    #[test]
    fn filter_strings() {
        let id: SourceId = "S1".parse().unwrap();
        assert_eq!(
            FilterMode::Both.filters(&id),
            vec!["primary_location.source.id:S1", "host_venue.id:S1"]
        );
        let range = DateRange::parse(Some("2015-01-01"), Some("")).unwrap();
        assert_eq!(range.filters(), vec!["from_publication_date:2015-01-01"]);
    }
}
