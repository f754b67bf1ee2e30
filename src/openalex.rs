use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::SourceId;
use crate::error::TrendsError;

pub const OPENALEX_BASE: &str = "https://api.openalex.org";
pub const WORKS_PAGE_SIZE: u32 = 200;
pub const WORKS_SELECT: &str = "id,publication_date,cited_by_count";

const MIN_BACKOFF_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 1.6;

/// How a source search is phrased against `/sources`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// `filter=display_name.search:"<q>"`
    DisplayName,
    /// `search=<q>` over all indexed text.
    FullText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksRequest {
    pub filter: String,
    pub per_page: u32,
    pub select: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub cited_by_count: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorksPage {
    pub results: Vec<WorkRecord>,
    pub next_cursor: Option<String>,
    pub total_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    meta: WorksMeta,
    #[serde(default)]
    results: Vec<WorkRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct WorksMeta {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl From<WorksResponse> for WorksPage {
    fn from(value: WorksResponse) -> Self {
        Self {
            results: value.results,
            next_cursor: value.meta.next_cursor.filter(|cursor| !cursor.is_empty()),
            total_count: value.meta.count,
        }
    }
}

pub trait OpenAlexClient: Send + Sync {
    fn search_sources(
        &self,
        query: &str,
        mode: SearchMode,
        per_page: u32,
    ) -> Result<Vec<Value>, TrendsError>;
    fn get_source(&self, id: &SourceId) -> Result<Value, TrendsError>;
    fn works_page(&self, request: &WorksRequest, cursor: &str) -> Result<WorksPage, TrendsError>;
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub mailto: Option<String>,
    pub polite_delay: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: OPENALEX_BASE.to_string(),
            mailto: None,
            polite_delay: Duration::from_millis(600),
            max_retries: 4,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct OpenAlexHttpClient {
    client: Client,
    settings: HttpSettings,
}

impl OpenAlexHttpClient {
    pub fn new(settings: HttpSettings) -> Result<Self, TrendsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("preprint-trends/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TrendsError::OpenAlexHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| TrendsError::OpenAlexHttp(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, TrendsError> {
        let response = self.send_with_retries(|| {
            let mut request = self.client.get(url).query(params);
            if let Some(mailto) = self.settings.mailto.as_deref() {
                request = request.query(&[("mailto", mailto)]);
            }
            request
        })?;
        let response = Self::handle_status(response)?;
        let value = response
            .json::<Value>()
            .map_err(|err| TrendsError::OpenAlexHttp(err.to_string()))?;
        if !self.settings.polite_delay.is_zero() {
            thread::sleep(self.settings.polite_delay);
        }
        Ok(value)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, TrendsError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "OpenAlex request failed".to_string());
        Err(TrendsError::OpenAlexStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, TrendsError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let base = self
            .settings
            .polite_delay
            .max(Duration::from_millis(MIN_BACKOFF_MS));
        let mut attempt = 0u32;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.settings.max_retries && is_retryable_status(status) {
                        let delay = backoff_delay(base, attempt);
                        debug!(status, attempt, ?delay, "retrying OpenAlex request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.settings.max_retries && is_retryable_error(&err) {
                        let delay = backoff_delay(base, attempt);
                        debug!(error = %err, attempt, ?delay, "retrying OpenAlex request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(TrendsError::OpenAlexHttp(err.to_string()));
                }
            }
        }
    }
}

impl OpenAlexClient for OpenAlexHttpClient {
    fn search_sources(
        &self,
        query: &str,
        mode: SearchMode,
        per_page: u32,
    ) -> Result<Vec<Value>, TrendsError> {
        let url = self.url("sources");
        let mut params = vec![("per-page", per_page.to_string())];
        match mode {
            SearchMode::DisplayName => {
                params.push(("filter", format!("display_name.search:\"{query}\"")))
            }
            SearchMode::FullText => params.push(("search", query.to_string())),
        }
        debug!(query, ?mode, "searching sources");
        let body = self.get_json(&url, &params)?;
        Ok(body
            .get("results")
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default())
    }

    fn get_source(&self, id: &SourceId) -> Result<Value, TrendsError> {
        let url = self.url(&format!("sources/{}", id.as_str()));
        debug!(source = %id, "fetching source record");
        self.get_json(&url, &[])
    }

    fn works_page(&self, request: &WorksRequest, cursor: &str) -> Result<WorksPage, TrendsError> {
        let url = self.url("works");
        let mut params = vec![
            ("per-page", request.per_page.to_string()),
            ("cursor", cursor.to_string()),
        ];
        if !request.filter.is_empty() {
            params.push(("filter", request.filter.clone()));
        }
        if !request.select.is_empty() {
            params.push(("select", request.select.clone()));
        }
        debug!(filter = %request.filter, cursor, "fetching works page");
        let body = self.get_json(&url, &params)?;
        let response: WorksResponse = serde_json::from_value(body)
            .map_err(|err| TrendsError::OpenAlexHttp(err.to_string()))?;
        Ok(response.into())
    }
}

pub fn short_id(raw_id: &str) -> &str {
    raw_id
        .strip_prefix(crate::domain::OPENALEX_ID_PREFIX)
        .unwrap_or(raw_id)
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.mul_f64(BACKOFF_FACTOR.powi(attempt as i32))
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
