#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::{Value, json};

use preprint_trends::app::{ProgressEvent, ProgressSink};
use preprint_trends::domain::SourceId;
use preprint_trends::error::TrendsError;
use preprint_trends::openalex::{OpenAlexClient, SearchMode, WorkRecord, WorksPage, WorksRequest};

#[derive(Default)]
pub struct MockOpenAlex {
    pub sources: HashMap<String, Value>,
    pub display_search: HashMap<String, Vec<Value>>,
    pub full_text_search: HashMap<String, Vec<Value>>,
    pub works: HashMap<String, Vec<Vec<WorkRecord>>>,
    pub failing_works: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl MockOpenAlex {
    pub fn with_source(mut self, id: &str, name: &str, counts_by_year: Value) -> Self {
        self.sources.insert(id.to_string(), source_payload(id, name, counts_by_year));
        self
    }

    /// Serves `target`'s record under `alias` too, as OpenAlex does for
    /// merged sources.
    pub fn with_alias(mut self, alias: &str, target: &str) -> Self {
        if let Some(payload) = self.sources.get(target).cloned() {
            self.sources.insert(alias.to_string(), payload);
        }
        self
    }

    pub fn with_search(mut self, query: &str, results: Vec<Value>) -> Self {
        self.display_search.insert(query.to_string(), results);
        self
    }

    pub fn with_full_text(mut self, query: &str, results: Vec<Value>) -> Self {
        self.full_text_search.insert(query.to_string(), results);
        self
    }

    pub fn with_works(mut self, id: &str, pages: Vec<Vec<WorkRecord>>) -> Self {
        self.works.insert(id.to_string(), pages);
        self
    }

    pub fn with_failing_works(mut self, id: &str) -> Self {
        self.failing_works.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl OpenAlexClient for MockOpenAlex {
    fn search_sources(
        &self,
        query: &str,
        mode: SearchMode,
        _per_page: u32,
    ) -> Result<Vec<Value>, TrendsError> {
        self.record(format!("search:{mode:?}:{query}"));
        let table = match mode {
            SearchMode::DisplayName => &self.display_search,
            SearchMode::FullText => &self.full_text_search,
        };
        Ok(table.get(query).cloned().unwrap_or_default())
    }

    fn get_source(&self, id: &SourceId) -> Result<Value, TrendsError> {
        self.record(format!("source:{id}"));
        self.sources
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| TrendsError::OpenAlexStatus {
                status: 404,
                message: "not found".to_string(),
            })
    }

    fn works_page(&self, request: &WorksRequest, cursor: &str) -> Result<WorksPage, TrendsError> {
        self.record(format!("works:{}:{cursor}", request.filter));
        let id = source_in_filter(&request.filter);
        if self.failing_works.contains(&id) {
            return Err(TrendsError::OpenAlexStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let pages = self.works.get(&id).cloned().unwrap_or_default();
        let unique = pages
            .iter()
            .flatten()
            .filter_map(|work| work.id.clone())
            .collect::<HashSet<_>>()
            .len() as u64;

        let index = match cursor {
            "*" => 0,
            other => other.trim_start_matches('c').parse::<usize>().unwrap(),
        };
        let results = pages.get(index).cloned().unwrap_or_default();
        let results = if request.per_page == 1 {
            results.into_iter().take(1).collect()
        } else {
            results
        };
        let next_cursor = (index + 1 < pages.len()).then(|| format!("c{}", index + 1));
        Ok(WorksPage {
            results,
            next_cursor,
            total_count: Some(unique),
        })
    }
}

fn source_in_filter(filter: &str) -> String {
    filter
        .split(',')
        .find_map(|part| {
            part.strip_prefix("primary_location.source.id:")
                .or_else(|| part.strip_prefix("host_venue.id:"))
        })
        .unwrap_or_default()
        .to_string()
}

pub fn source_payload(id: &str, name: &str, counts_by_year: Value) -> Value {
    json!({
        "id": format!("https://openalex.org/{id}"),
        "display_name": name,
        "type": "repository",
        "homepage_url": format!("https://{}.example.org", name.to_lowercase()),
        "works_count": 1000,
        "cited_by_count": 5000,
        "summary_stats": {"h_index": 42, "i10_index": 100, "2yr_mean_citedness": 1.25},
        "ids": {"openalex": format!("https://openalex.org/{id}")},
        "topics": [
            {"display_name": "Genomics", "count": 10,
             "subfield": {"display_name": "Genetics"},
             "domain": {"display_name": "Life Sciences"}}
        ],
        "counts_by_year": counts_by_year
    })
}

pub fn search_hit(id: &str, name: &str) -> Value {
    json!({
        "id": format!("https://openalex.org/{id}"),
        "display_name": name,
        "type": "repository",
        "works_count": 10
    })
}

pub fn work(id: &str, date: &str, cited: u64) -> WorkRecord {
    WorkRecord {
        id: Some(format!("https://openalex.org/{id}")),
        publication_date: Some(date.to_string()),
        cited_by_count: Some(cited),
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn phases(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.phase.to_string())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
