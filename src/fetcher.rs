use std::iter::FusedIterator;

use serde::Serialize;
use serde_json::Value;

use crate::domain::{DateRange, FilterMode, SourceId};
use crate::error::TrendsError;
use crate::openalex::{
    OpenAlexClient, WORKS_PAGE_SIZE, WORKS_SELECT, WorksPage, WorksRequest, short_id,
};

pub const FIRST_CURSOR: &str = "*";

/// The unmodified `/sources/{id}` payload for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMetadataRecord {
    pub source_id: SourceId,
    pub payload: Value,
}

impl RawMetadataRecord {
    pub fn display_name(&self) -> &str {
        self.payload
            .get("display_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

pub struct Fetcher<'a, C: OpenAlexClient> {
    client: &'a C,
}

impl<'a, C: OpenAlexClient> Fetcher<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub fn fetch_source(&self, id: &SourceId) -> Result<RawMetadataRecord, TrendsError> {
        let payload = self
            .client
            .get_source(id)
            .map_err(|err| fetch_error(id, err))?;
        let source_id = payload
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| short_id(raw).parse::<SourceId>().ok())
            .unwrap_or_else(|| id.clone());
        Ok(RawMetadataRecord { source_id, payload })
    }

    /// Starts a fresh cursor scan over the source's works.
    pub fn works(&self, id: &SourceId, filter: FilterMode, range: &DateRange) -> WorksPages<'a, C> {
        WorksPages {
            client: self.client,
            source_id: id.clone(),
            request: works_request(id, filter, range, WORKS_PAGE_SIZE),
            cursor: Some(FIRST_CURSOR.to_string()),
        }
    }

    /// `meta.count` for the same filter the scan uses.
    pub fn count_works(
        &self,
        id: &SourceId,
        filter: FilterMode,
        range: &DateRange,
    ) -> Result<Option<u64>, TrendsError> {
        let request = works_request(id, filter, range, 1);
        self.client
            .works_page(&request, FIRST_CURSOR)
            .map(|page| page.total_count)
            .map_err(|err| fetch_error(id, err))
    }
}

pub fn works_request(
    id: &SourceId,
    filter: FilterMode,
    range: &DateRange,
    per_page: u32,
) -> WorksRequest {
    let mut filters = filter.filters(id);
    filters.extend(range.filters());
    WorksRequest {
        filter: filters.join(","),
        per_page,
        select: WORKS_SELECT.to_string(),
    }
}

/// Lazy sequence of works pages for one source.
///
/// Ends after a page without `next_cursor` (or without results) and after
/// the first error. It is not restartable.
pub struct WorksPages<'a, C: OpenAlexClient> {
    client: &'a C,
    source_id: SourceId,
    request: WorksRequest,
    cursor: Option<String>,
}

impl<C: OpenAlexClient> WorksPages<'_, C> {
    pub fn request(&self) -> &WorksRequest {
        &self.request
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor.is_none()
    }
}

impl<C: OpenAlexClient> Iterator for WorksPages<'_, C> {
    type Item = Result<WorksPage, TrendsError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.take()?;
        match self.client.works_page(&self.request, &cursor) {
            Ok(page) => {
                if !page.results.is_empty() {
                    self.cursor = page.next_cursor.clone();
                }
                Some(Ok(page))
            }
            Err(err) => Some(Err(fetch_error(&self.source_id, err))),
        }
    }
}

impl<C: OpenAlexClient> FusedIterator for WorksPages<'_, C> {}

fn fetch_error(id: &SourceId, err: TrendsError) -> TrendsError {
    match err {
        TrendsError::Fetch { .. } => err,
        other => TrendsError::Fetch {
            source_id: id.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_request_joins_filters() {
        let id: SourceId = "S42".parse().unwrap();
        let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
        let request = works_request(&id, FilterMode::PrimaryLocation, &range, 200);
        assert_eq!(
            request.filter,
            "primary_location.source.id:S42,from_publication_date:2020-01-01,to_publication_date:2020-12-31"
        );
        assert_eq!(request.select, WORKS_SELECT);
    }
}
