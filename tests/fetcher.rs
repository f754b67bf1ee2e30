mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;
use serde_json::json;

use common::{MockOpenAlex, work};
use preprint_trends::domain::{DateRange, FilterMode, SourceId};
use preprint_trends::error::TrendsError;
use preprint_trends::fetcher::Fetcher;

fn id(raw: &str) -> SourceId {
    raw.parse().unwrap()
}

fn paged_client() -> MockOpenAlex {
    MockOpenAlex::default()
        .with_source("S1", "medRxiv", json!([]))
        .with_works(
            "S1",
            vec![
                vec![work("W1", "2020-01-02", 1), work("W2", "2020-02-03", 0)],
                vec![work("W3", "2020-03-04", 5)],
                vec![work("W4", "2021-01-01", 2)],
            ],
        )
}

#[test]
fn pages_cover_count_without_duplicates() {
    let client = paged_client();
    let fetcher = Fetcher::new(&client);
    let range = DateRange::default();

    let expected = fetcher
        .count_works(&id("S1"), FilterMode::PrimaryLocation, &range)
        .unwrap();
    let ids = fetcher
        .works(&id("S1"), FilterMode::PrimaryLocation, &range)
        .map(|page| page.unwrap())
        .flat_map(|page| page.results)
        .filter_map(|work| work.id)
        .collect::<Vec<_>>();

    let unique = ids.iter().collect::<HashSet<_>>();
    assert_eq!(unique.len(), ids.len());
    assert_eq!(Some(ids.len() as u64), expected);
}

#[test]
fn scan_stops_at_last_cursor() {
    let client = paged_client();
    let fetcher = Fetcher::new(&client);
    let mut pages = fetcher.works(&id("S1"), FilterMode::PrimaryLocation, &DateRange::default());
    assert_eq!(pages.by_ref().count(), 3);
    assert!(pages.is_exhausted());
    assert!(pages.next().is_none());

    let cursors = client
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("works:"))
        .map(|call| call.rsplit(':').next().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(cursors, vec!["*", "c1", "c2"]);
}

#[test]
fn empty_page_ends_scan() {
    let client = MockOpenAlex::default().with_works("S2", vec![vec![], vec![work("W9", "2020", 0)]]);
    let fetcher = Fetcher::new(&client);
    let pages = fetcher
        .works(&id("S2"), FilterMode::PrimaryLocation, &DateRange::default())
        .collect::<Vec<_>>();
    assert_eq!(pages.len(), 1);
}

#[test]
fn errors_fuse_the_iterator() {
    let client = MockOpenAlex::default().with_failing_works("S3");
    let fetcher = Fetcher::new(&client);
    let mut pages = fetcher.works(&id("S3"), FilterMode::HostVenue, &DateRange::default());
    assert_matches!(pages.next(), Some(Err(TrendsError::Fetch { source_id, .. })) if source_id == "S3");
    assert!(pages.next().is_none());
}

#[test]
fn missing_source_is_fetch_error() {
    let client = MockOpenAlex::default();
    let err = Fetcher::new(&client).fetch_source(&id("S404")).unwrap_err();
    assert_matches!(err, TrendsError::Fetch { .. });
}

#[test]
fn canonical_id_comes_from_payload() {
    let mut client = MockOpenAlex::default();
    client.sources.insert(
        "S5".to_string(),
        json!({"id": "https://openalex.org/S50", "display_name": "Moved"}),
    );
    let record = Fetcher::new(&client).fetch_source(&id("S5")).unwrap();
    assert_eq!(record.source_id.as_str(), "S50");
    assert_eq!(record.display_name(), "Moved");
}

#[test]
fn date_range_reaches_the_works_filter() {
    let client = paged_client();
    let range = DateRange::parse(Some("2020-01-01"), Some("2020-12-31")).unwrap();
    let pages = Fetcher::new(&client).works(&id("S1"), FilterMode::Both, &range);
    assert_eq!(
        pages.request().filter,
        "primary_location.source.id:S1,host_venue.id:S1,from_publication_date:2020-01-01,to_publication_date:2020-12-31"
    );
}
