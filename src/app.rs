use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{MonthlyTrends, TrendTable, YearlyTrends};
use crate::config::ServerRequest;
use crate::domain::{DateRange, FilterMode, SourceId};
use crate::error::TrendsError;
use crate::fetcher::{Fetcher, RawMetadataRecord};
use crate::flatten::{FlatRow, flatten_record};
use crate::input::normalize_name;
use crate::openalex::{OpenAlexClient, WorkRecord};
use crate::package::build_archive;
use crate::resolver::{DEFAULT_PER_PAGE, Pick, ResolvedSource, Resolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Resolving,
    Fetching,
    Aggregating,
    Packaging,
    Done,
    /// One source failed; the run carries on with the rest.
    Failed(String),
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::Resolving => write!(f, "Resolving"),
            RunPhase::Fetching => write!(f, "Fetching"),
            RunPhase::Aggregating => write!(f, "Aggregating"),
            RunPhase::Packaging => write!(f, "Packaging"),
            RunPhase::Done => write!(f, "Done"),
            RunPhase::Failed(source) => write!(f, "Failed({source})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: RunPhase,
    pub source: Option<String>,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Cooperative cancellation, checked between sources.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub input: String,
    pub source_id: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionEntry {
    pub name: String,
    #[serde(default)]
    pub candidates: Vec<ResolvedSource>,
    #[serde(default)]
    pub selected: Vec<SourceId>,
    #[serde(default)]
    pub failure: Option<SourceFailure>,
}

/// Names, their candidates and what was picked for each. Persisted between
/// `resolve`, `select` and `build`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub entries: Vec<SessionEntry>,
}

impl Session {
    pub fn entry(&self, name: &str) -> Option<&SessionEntry> {
        let name = normalize_name(name);
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn apply_pick(&mut self, pick: Pick) {
        for entry in &mut self.entries {
            entry.selected = pick.apply(&entry.candidates);
        }
    }

    /// Replaces the selection for `name`. Unknown names get a new entry, so
    /// known ids can be used without resolving anything. A non-empty
    /// selection clears any resolution failure recorded for the name.
    pub fn select(&mut self, name: &str, ids: Vec<SourceId>) {
        let name = normalize_name(name);
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                if !ids.is_empty() {
                    entry.failure = None;
                }
                entry.selected = ids;
            }
            None => self.entries.push(SessionEntry {
                name,
                selected: ids,
                ..SessionEntry::default()
            }),
        }
    }

    pub fn select_all(&mut self, name: &str) -> Result<(), TrendsError> {
        let normalized = normalize_name(name);
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.name == normalized)
            .ok_or_else(|| TrendsError::NotFound(normalized.clone()))?;
        entry.selected = Pick::All.apply(&entry.candidates);
        Ok(())
    }

    /// Chosen ids across all names, first occurrence wins.
    pub fn selected_ids(&self) -> Vec<SourceId> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .flat_map(|entry| entry.selected.iter())
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> Vec<SourceFailure> {
        self.entries
            .iter()
            .filter_map(|entry| entry.failure.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub range: DateRange,
    pub filter: FilterMode,
    pub monthly: bool,
}

/// Everything gathered for one build. Only sources that fetched cleanly
/// contribute records, rows and trend data.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub selected: Vec<SourceId>,
    pub records: Vec<RawMetadataRecord>,
    pub rows: Vec<FlatRow>,
    pub yearly: TrendTable,
    pub monthly: Option<TrendTable>,
    pub failures: Vec<SourceFailure>,
    pub range: DateRange,
    pub filter: FilterMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSource {
    pub source_id: String,
    pub display_name: String,
    pub elapsed_ms: u128,
    pub works_scanned: Option<u64>,
    pub works_expected: Option<u64>,
}

/// A selected id whose record turned out to be a source already packaged in
/// this run, usually because OpenAlex merged the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSource {
    pub selected: String,
    pub source_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub processed: Vec<ProcessedSource>,
    pub failures: Vec<SourceFailure>,
    pub merged: Vec<MergedSource>,
    pub skipped: Vec<String>,
    pub stopped: bool,
    pub yearly_periods: usize,
    pub monthly_periods: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub archive: Vec<u8>,
    pub summary: BuildSummary,
}

struct FetchedSource {
    record: RawMetadataRecord,
    works: Option<Vec<WorkRecord>>,
    expected: Option<u64>,
}

enum Fetched {
    Source(FetchedSource),
    AlreadyPackaged(SourceId),
}

#[derive(Clone)]
pub struct App<C: OpenAlexClient> {
    client: C,
    per_page: u32,
}

impl<C: OpenAlexClient> App<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolve_names(
        &self,
        names: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<Session, TrendsError> {
        emit(sink, RunPhase::Resolving, None, format!("{} name(s)", names.len()), None);
        let resolver = Resolver::new(&self.client, self.per_page);
        let mut session = Session {
            created_at: Utc::now().to_rfc3339(),
            entries: Vec::with_capacity(names.len()),
        };

        for name in names {
            let started = Instant::now();
            let name = normalize_name(name);
            match resolver.resolve(&name) {
                Ok(candidates) => {
                    info!(name = %name, candidates = candidates.len(), "resolved");
                    emit(
                        sink,
                        RunPhase::Resolving,
                        Some(name.clone()),
                        format!("{} candidate(s)", candidates.len()),
                        Some(started.elapsed()),
                    );
                    session.entries.push(SessionEntry {
                        name,
                        candidates,
                        ..SessionEntry::default()
                    });
                }
                Err(err) if err.is_per_source() => {
                    warn!(name = %name, error = %err, "resolution failed");
                    let kind = match err {
                        TrendsError::NotFound(_) => FailureKind::NotFound,
                        _ => FailureKind::Fetch,
                    };
                    emit(
                        sink,
                        RunPhase::Failed(name.clone()),
                        Some(name.clone()),
                        err.to_string(),
                        Some(started.elapsed()),
                    );
                    session.entries.push(SessionEntry {
                        failure: Some(SourceFailure {
                            input: name.clone(),
                            source_id: None,
                            kind,
                            message: err.to_string(),
                        }),
                        name,
                        ..SessionEntry::default()
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(session)
    }

    /// Configured servers: entries with ids are selected as-is, the rest are
    /// resolved and picked with their own policy or `default_pick`.
    pub fn resolve_requests(
        &self,
        requests: &[ServerRequest],
        default_pick: Pick,
        sink: &dyn ProgressSink,
    ) -> Result<Session, TrendsError> {
        let names = requests
            .iter()
            .filter(|request| request.ids.is_empty())
            .map(|request| request.name.clone())
            .collect::<Vec<_>>();
        let mut session = self.resolve_names(&names, sink)?;
        for request in requests {
            if request.ids.is_empty() {
                let pick = request.pick.unwrap_or(default_pick);
                if let Some(entry) = session
                    .entries
                    .iter_mut()
                    .find(|entry| entry.name == request.name)
                {
                    entry.selected = pick.apply(&entry.candidates);
                }
            } else {
                session.select(&request.name, request.ids.clone());
            }
        }
        Ok(session)
    }

    pub fn build(
        &self,
        session: &Session,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
        stop: &StopFlag,
    ) -> Result<BuildOutcome, TrendsError> {
        let selected = session.selected_ids();
        if selected.is_empty() {
            return Err(TrendsError::NoSelection);
        }

        let fetcher = Fetcher::new(&self.client);
        let mut yearly = YearlyTrends::new();
        let mut monthly = options.monthly.then(MonthlyTrends::new);
        let mut result = RunResult {
            selected: selected.clone(),
            failures: session.failures(),
            range: options.range,
            filter: options.filter,
            ..RunResult::default()
        };
        let mut processed = Vec::new();
        let mut skipped = Vec::new();
        let mut merged = Vec::new();
        let mut packaged = HashSet::new();

        emit(
            sink,
            RunPhase::Fetching,
            None,
            format!("{} source(s)", selected.len()),
            None,
        );
        for (index, id) in selected.iter().enumerate() {
            if stop.is_stopped() {
                skipped.extend(selected[index..].iter().map(ToString::to_string));
                info!(remaining = selected.len() - index, "stop requested, skipping remaining sources");
                break;
            }
            let started = Instant::now();
            let source = id.to_string();
            emit(sink, RunPhase::Fetching, Some(source.clone()), "fetching record".to_string(), None);

            let fetched = match self.fetch_one(&fetcher, id, &packaged, options, sink) {
                Ok(Fetched::Source(fetched)) => fetched,
                Ok(Fetched::AlreadyPackaged(canonical)) => {
                    info!(selected = %id, source = %canonical, "source already packaged, skipping");
                    emit(
                        sink,
                        RunPhase::Fetching,
                        Some(source.clone()),
                        format!("same source as {canonical}, skipped"),
                        Some(started.elapsed()),
                    );
                    merged.push(MergedSource {
                        selected: source,
                        source_id: canonical.to_string(),
                    });
                    continue;
                }
                Err(err) => {
                    warn!(source = %id, error = %err, "source failed");
                    emit(
                        sink,
                        RunPhase::Failed(source.clone()),
                        Some(source.clone()),
                        err.to_string(),
                        Some(started.elapsed()),
                    );
                    result.failures.push(SourceFailure {
                        input: input_for(session, id),
                        source_id: Some(source),
                        kind: FailureKind::Fetch,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let record = fetched.record;
            packaged.insert(record.source_id.clone());
            let canonical = record.source_id.to_string();
            yearly.add_record(&record);
            let mut works_scanned = None;
            if let (Some(monthly), Some(works)) = (monthly.as_mut(), fetched.works.as_ref()) {
                monthly.add_source(&canonical, record.display_name());
                let binned = works
                    .iter()
                    .filter(|work| monthly.add_work(&canonical, work))
                    .count();
                if binned < works.len() {
                    debug!(source = %canonical, skipped = works.len() - binned, "works without a usable publication_date");
                }
                works_scanned = Some(works.len() as u64);
            }
            result.rows.push(flatten_record(&record));

            let elapsed = started.elapsed();
            info!(source = %canonical, elapsed_ms = elapsed.as_millis() as u64, "source done");
            emit(sink, RunPhase::Fetching, Some(canonical.clone()), "done".to_string(), Some(elapsed));
            processed.push(ProcessedSource {
                source_id: canonical,
                display_name: record.display_name().to_string(),
                elapsed_ms: elapsed.as_millis(),
                works_scanned,
                works_expected: fetched.expected,
            });
            result.records.push(record);
        }

        emit(sink, RunPhase::Aggregating, None, format!("{} source(s)", result.records.len()), None);
        result.yearly = yearly.finish(options.range.year_bounds());
        result.monthly = monthly.map(|monthly| monthly.finish(options.range.month_bounds()));

        emit(sink, RunPhase::Packaging, None, "writing archive".to_string(), None);
        let archive = build_archive(&result, Utc::now())?;

        let summary = BuildSummary {
            processed,
            failures: result.failures.clone(),
            merged,
            stopped: !skipped.is_empty(),
            skipped,
            yearly_periods: result.yearly.periods.len(),
            monthly_periods: result.monthly.as_ref().map(|table| table.periods.len()),
        };
        emit(
            sink,
            RunPhase::Done,
            None,
            format!(
                "{} packaged, {} failed",
                summary.processed.len(),
                summary.failures.len()
            ),
            None,
        );
        Ok(BuildOutcome { archive, summary })
    }

    /// Resolve, pick and build in one go. The session is returned alongside
    /// the outcome so callers can persist it.
    pub fn run(
        &self,
        names: &[String],
        pick: Pick,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
        stop: &StopFlag,
    ) -> Result<(Session, BuildOutcome), TrendsError> {
        let mut session = self.resolve_names(names, sink)?;
        session.apply_pick(pick);
        let outcome = self.build(&session, options, sink, stop)?;
        Ok((session, outcome))
    }

    fn fetch_one(
        &self,
        fetcher: &Fetcher<'_, C>,
        id: &SourceId,
        packaged: &HashSet<SourceId>,
        options: &BuildOptions,
        sink: &dyn ProgressSink,
    ) -> Result<Fetched, TrendsError> {
        let record = fetcher.fetch_source(id)?;
        if packaged.contains(&record.source_id) {
            return Ok(Fetched::AlreadyPackaged(record.source_id));
        }
        if !options.monthly {
            return Ok(Fetched::Source(FetchedSource {
                record,
                works: None,
                expected: None,
            }));
        }

        let canonical = record.source_id.clone();
        let expected = fetcher.count_works(&canonical, options.filter, &options.range)?;
        let mut seen = HashSet::new();
        let mut works = Vec::new();
        for page in fetcher.works(&canonical, options.filter, &options.range) {
            let page = page?;
            for work in page.results {
                let fresh = match work.id.as_deref() {
                    Some(work_id) => seen.insert(work_id.to_string()),
                    None => true,
                };
                if fresh {
                    works.push(work);
                }
            }
            emit(
                sink,
                RunPhase::Fetching,
                Some(canonical.to_string()),
                format!("{} works scanned", works.len()),
                None,
            );
        }

        if let Some(expected) = expected {
            if expected != works.len() as u64 {
                info!(source = %canonical, scanned = works.len(), expected, "works scan coverage differs from count");
            }
        }
        Ok(Fetched::Source(FetchedSource {
            record,
            works: Some(works),
            expected,
        }))
    }
}

fn input_for(session: &Session, id: &SourceId) -> String {
    session
        .entries
        .iter()
        .find(|entry| entry.selected.contains(id))
        .map(|entry| entry.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn emit(
    sink: &dyn ProgressSink,
    phase: RunPhase,
    source: Option<String>,
    message: String,
    elapsed: Option<Duration>,
) {
    debug!(phase = %phase, source = source.as_deref().unwrap_or(""), "{message}");
    sink.event(ProgressEvent {
        phase,
        source,
        message,
        elapsed,
    });
}
