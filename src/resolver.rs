//! Name → OpenAlex source resolution.
//!
//! A query that already looks like a source id is fetched directly. Anything
//! else goes through `/sources` with a `display_name.search` filter, falling
//! back to full-text `search` when the filter finds nothing. Exact name
//! matches are moved to the front; every other candidate keeps the order
//! OpenAlex returned it in.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::SourceId;
use crate::error::TrendsError;
use crate::input::normalize_name;
use crate::openalex::{OpenAlexClient, SearchMode, short_id};

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSource {
    pub source_id: SourceId,
    pub display_name: String,
    pub candidate_score: f64,
    pub exact_match: bool,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub works_count: u64,
    #[serde(default)]
    pub homepage_url: Option<String>,
}

impl ResolvedSource {
    pub fn from_value(query: &str, value: &Value) -> Option<Self> {
        let source_id = value
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| short_id(id).parse::<SourceId>().ok())?;
        let display_name = value
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let exact_match = is_exact_match(query, value);
        let candidate_score = if exact_match {
            1.0
        } else {
            strsim::normalized_levenshtein(&fold(query), &fold(&display_name))
        };
        Some(Self {
            source_id,
            display_name,
            candidate_score,
            exact_match,
            source_type: value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string),
            works_count: value
                .get("works_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            homepage_url: value
                .get("homepage_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// One-line description used when presenting candidates for selection.
    pub fn label(&self) -> String {
        let name = if self.display_name.is_empty() {
            "(no name)"
        } else {
            self.display_name.as_str()
        };
        format!(
            "{} ({}) | {} | works:{} | {}",
            name,
            self.source_type.as_deref().unwrap_or("?"),
            self.source_id,
            self.works_count,
            self.homepage_url.as_deref().unwrap_or("")
        )
    }
}

/// How candidates for one input name turn into selected source ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Pick {
    /// Best-ranked candidate only.
    Top,
    /// Every exact name match, or the top candidate when none matches exactly.
    #[default]
    Exact,
    /// Every candidate.
    All,
}

impl Pick {
    pub fn apply(self, candidates: &[ResolvedSource]) -> Vec<SourceId> {
        match self {
            Pick::Top => candidates
                .first()
                .map(|candidate| vec![candidate.source_id.clone()])
                .unwrap_or_default(),
            Pick::Exact => {
                let exact = candidates
                    .iter()
                    .filter(|candidate| candidate.exact_match)
                    .map(|candidate| candidate.source_id.clone())
                    .collect::<Vec<_>>();
                if exact.is_empty() {
                    Pick::Top.apply(candidates)
                } else {
                    exact
                }
            }
            Pick::All => candidates
                .iter()
                .map(|candidate| candidate.source_id.clone())
                .collect(),
        }
    }
}

pub struct Resolver<'a, C: OpenAlexClient> {
    client: &'a C,
    per_page: u32,
}

impl<'a, C: OpenAlexClient> Resolver<'a, C> {
    pub fn new(client: &'a C, per_page: u32) -> Self {
        Self {
            client,
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn resolve(&self, query: &str) -> Result<Vec<ResolvedSource>, TrendsError> {
        let query = normalize_name(query);
        if query.is_empty() {
            return Err(TrendsError::NotFound(query));
        }

        if let Ok(id) = query.parse::<SourceId>() {
            let record = self.client.get_source(&id).map_err(|err| match err {
                TrendsError::OpenAlexStatus { status: 404, .. } => {
                    TrendsError::NotFound(query.clone())
                }
                other => other,
            })?;
            let mut candidate = ResolvedSource::from_value(&query, &record)
                .ok_or_else(|| TrendsError::NotFound(query.clone()))?;
            candidate.exact_match = true;
            candidate.candidate_score = 1.0;
            return Ok(vec![candidate]);
        }

        let mut results = self
            .client
            .search_sources(&query, SearchMode::DisplayName, self.per_page)?;
        if results.is_empty() {
            debug!(query, "display_name filter empty, falling back to full-text search");
            results = self
                .client
                .search_sources(&query, SearchMode::FullText, self.per_page)?;
        }

        let candidates = rank_candidates(&query, &results);
        if candidates.is_empty() {
            return Err(TrendsError::NotFound(query));
        }
        Ok(candidates)
    }
}

/// Exact matches first, upstream order otherwise. The sort is stable so ties
/// keep the API's relevance ranking.
pub fn rank_candidates(query: &str, results: &[Value]) -> Vec<ResolvedSource> {
    let mut seen = std::collections::HashSet::new();
    let mut candidates = results
        .iter()
        .filter_map(|value| ResolvedSource::from_value(query, value))
        .filter(|candidate| seen.insert(candidate.source_id.clone()))
        .collect::<Vec<_>>();
    candidates.sort_by_key(|candidate| !candidate.exact_match);
    candidates
}

fn is_exact_match(query: &str, value: &Value) -> bool {
    let needle = fold(query);
    let mut names = Vec::new();
    for key in ["display_name", "abbreviated_title"] {
        if let Some(name) = value.get(key).and_then(Value::as_str) {
            names.push(name);
        }
    }
    if let Some(alternates) = value.get("alternate_titles").and_then(Value::as_array) {
        names.extend(alternates.iter().filter_map(Value::as_str));
    }
    names.into_iter().any(|name| fold(name) == needle)
}

fn fold(value: &str) -> String {
    normalize_name(value).to_lowercase()
}
