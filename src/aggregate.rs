//! Wide-format trend tables: one row per (source, metric), one column per
//! period. The period axis is always contiguous and missing periods are 0.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

use crate::domain::{Metric, YearMonth};
use crate::fetcher::RawMetadataRecord;
use crate::openalex::WorkRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub works_count: u64,
    pub cited_by_count: u64,
}

impl Counts {
    pub fn get(&self, metric: Metric) -> u64 {
        match metric {
            Metric::WorksCount => self.works_count,
            Metric::CitedByCount => self.cited_by_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendRow {
    pub source_id: String,
    pub display_name: String,
    pub metric: Metric,
    pub values: BTreeMap<String, u64>,
}

impl TrendRow {
    pub fn value(&self, period: &str) -> u64 {
        self.values.get(period).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrendTable {
    pub periods: Vec<String>,
    pub rows: Vec<TrendRow>,
}

/// A calendar bucket with a successor, so gaps can be filled.
pub trait Period: Ord + Copy + Display {
    fn succ(self) -> Self;
}

impl Period for i32 {
    fn succ(self) -> Self {
        self + 1
    }
}

impl Period for YearMonth {
    fn succ(self) -> Self {
        YearMonth::succ(self)
    }
}

#[derive(Debug)]
pub struct TrendAccumulator<P: Period> {
    sources: Vec<(String, String)>,
    data: HashMap<String, BTreeMap<P, Counts>>,
}

pub type YearlyTrends = TrendAccumulator<i32>;
pub type MonthlyTrends = TrendAccumulator<YearMonth>;

impl<P: Period> Default for TrendAccumulator<P> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            data: HashMap::new(),
        }
    }
}

impl<P: Period> TrendAccumulator<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source so it gets rows even when it has no counts.
    pub fn add_source(&mut self, source_id: &str, display_name: &str) {
        if !self.data.contains_key(source_id) {
            self.sources
                .push((source_id.to_string(), display_name.to_string()));
            self.data.insert(source_id.to_string(), BTreeMap::new());
        }
    }

    pub fn set(&mut self, source_id: &str, period: P, counts: Counts) {
        if let Some(periods) = self.data.get_mut(source_id) {
            periods.insert(period, counts);
        }
    }

    pub fn add(&mut self, source_id: &str, period: P, counts: Counts) {
        if let Some(periods) = self.data.get_mut(source_id) {
            let entry = periods.entry(period).or_default();
            entry.works_count += counts.works_count;
            entry.cited_by_count += counts.cited_by_count;
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Builds the table. Open bounds fall back to the smallest/largest period
    /// observed across all sources; data outside the bounds is dropped.
    pub fn finish(self, bounds: (Option<P>, Option<P>)) -> TrendTable {
        let observed = self.data.values().flat_map(|periods| periods.keys().copied());
        let (min_seen, max_seen) = observed.fold((None, None), |(lo, hi), period: P| {
            (
                Some(lo.map_or(period, |lo: P| lo.min(period))),
                Some(hi.map_or(period, |hi: P| hi.max(period))),
            )
        });
        let axis = match (bounds.0.or(min_seen), bounds.1.or(max_seen)) {
            (Some(start), Some(end)) => contiguous(start, end),
            _ => Vec::new(),
        };
        let periods = axis.iter().map(ToString::to_string).collect::<Vec<_>>();

        let mut rows = Vec::with_capacity(self.sources.len() * Metric::ALL.len());
        for (source_id, display_name) in &self.sources {
            let counts = self.data.get(source_id);
            for metric in Metric::ALL {
                let values = axis
                    .iter()
                    .zip(&periods)
                    .map(|(period, label)| {
                        let value = counts
                            .and_then(|counts| counts.get(period))
                            .map(|counts| counts.get(metric))
                            .unwrap_or(0);
                        (label.clone(), value)
                    })
                    .collect();
                rows.push(TrendRow {
                    source_id: source_id.clone(),
                    display_name: display_name.clone(),
                    metric,
                    values,
                });
            }
        }
        TrendTable { periods, rows }
    }
}

impl YearlyTrends {
    pub fn add_record(&mut self, record: &RawMetadataRecord) {
        let source_id = record.source_id.to_string();
        self.add_source(&source_id, record.display_name());
        for (year, counts) in counts_by_year(&record.payload) {
            self.set(&source_id, year, counts);
        }
    }
}

impl MonthlyTrends {
    /// Bins one work. Returns false when its date cannot be binned.
    pub fn add_work(&mut self, source_id: &str, work: &WorkRecord) -> bool {
        let Some(month) = work
            .publication_date
            .as_deref()
            .and_then(YearMonth::from_publication_date)
        else {
            return false;
        };
        self.add(
            source_id,
            month,
            Counts {
                works_count: 1,
                cited_by_count: work.cited_by_count.unwrap_or(0),
            },
        );
        true
    }
}

/// Reads the `counts_by_year` array of a source record. Entries without a
/// numeric year are ignored.
pub fn counts_by_year(payload: &Value) -> BTreeMap<i32, Counts> {
    let mut out = BTreeMap::new();
    let Some(entries) = payload.get("counts_by_year").and_then(Value::as_array) else {
        return out;
    };
    for entry in entries {
        let year = match entry.get("year") {
            Some(Value::Number(number)) => number.as_i64().and_then(|y| i32::try_from(y).ok()),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        };
        let Some(year) = year else {
            continue;
        };
        out.insert(
            year,
            Counts {
                works_count: count_field(entry, "works_count"),
                cited_by_count: count_field(entry, "cited_by_count"),
            },
        );
    }
    out
}

fn count_field(entry: &Value, key: &str) -> u64 {
    entry.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn contiguous<P: Period>(start: P, end: P) -> Vec<P> {
    let mut axis = Vec::new();
    let mut current = start;
    while current <= end {
        axis.push(current);
        current = current.succ();
    }
    axis
}
