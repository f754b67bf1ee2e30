mod common;

use assert_matches::assert_matches;
use serde_json::json;

use common::{MockOpenAlex, search_hit};
use preprint_trends::error::TrendsError;
use preprint_trends::openalex::{HttpSettings, OpenAlexHttpClient};
use preprint_trends::resolver::{Pick, Resolver};

#[test]
fn exact_name_ranks_first() {
    let client = MockOpenAlex::default().with_search(
        "bioRxiv",
        vec![
            search_hit("S100", "bioRxiv Neuroscience"),
            search_hit("S4306402512", "bioRxiv"),
        ],
    );
    let candidates = Resolver::new(&client, 25).resolve("bioRxiv").unwrap();
    assert_eq!(candidates[0].source_id.as_str(), "S4306402512");
    assert!(candidates[0].exact_match);
    assert_eq!(candidates[1].source_id.as_str(), "S100");
    assert_eq!(client.calls(), vec!["search:DisplayName:bioRxiv"]);
}

#[test]
fn falls_back_to_full_text_search() {
    let client = MockOpenAlex::default()
        .with_full_text("Research Square", vec![search_hit("S7", "Research Square")]);
    let candidates = Resolver::new(&client, 25).resolve("Research  Square").unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(
        client.calls(),
        vec![
            "search:DisplayName:Research Square",
            "search:FullText:Research Square"
        ]
    );
}

#[test]
fn id_input_skips_search() {
    let client = MockOpenAlex::default().with_source("S42", "SSRN", json!([]));
    let candidates = Resolver::new(&client, 25)
        .resolve("https://openalex.org/S42")
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].candidate_score, 1.0);
    assert!(candidates[0].exact_match);
    assert_eq!(client.calls(), vec!["source:S42"]);
}

#[test]
fn unknown_id_is_not_found() {
    let client = MockOpenAlex::default();
    let err = Resolver::new(&client, 25).resolve("S999").unwrap_err();
    assert_matches!(err, TrendsError::NotFound(_));
}

#[test]
fn no_candidates_is_not_found() {
    let client = MockOpenAlex::default();
    let err = Resolver::new(&client, 25).resolve("NoSuchServerXYZ").unwrap_err();
    assert_matches!(err, TrendsError::NotFound(name) if name == "NoSuchServerXYZ");
}

#[test]
fn exact_pick_keeps_every_exact_match() {
    let client = MockOpenAlex::default().with_search(
        "arXiv",
        vec![
            search_hit("S1", "arXiv (Cornell University)"),
            search_hit("S2", "arXiv"),
            search_hit("S3", "ARXIV"),
        ],
    );
    let candidates = Resolver::new(&client, 25).resolve("arXiv").unwrap();
    let picked = Pick::Exact.apply(&candidates);
    assert_eq!(
        picked.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
        vec!["S2", "S3"]
    );
}

#[test]
#[ignore = "requires network access to api.openalex.org"]
fn resolves_biorxiv_against_live_api() {
    let client = OpenAlexHttpClient::new(HttpSettings::default()).unwrap();
    let candidates = Resolver::new(&client, 25).resolve("bioRxiv").unwrap();
    assert_eq!(candidates[0].source_id.as_str(), "S4306402512");
}
