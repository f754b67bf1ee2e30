use assert_matches::assert_matches;

use preprint_trends::domain::{DateRange, FilterMode, Metric, SourceId, YearMonth};
use preprint_trends::error::TrendsError;

#[test]
fn parse_source_id_valid() {
    let id: SourceId = "https://openalex.org/s4306402512".parse().unwrap();
    assert_eq!(id.as_str(), "S4306402512");
}

#[test]
fn parse_source_id_invalid() {
    let err = "4306402512".parse::<SourceId>().unwrap_err();
    assert_matches!(err, TrendsError::InvalidSourceId(_));
}

#[test]
fn source_id_serde_uses_plain_string() {
    let id: SourceId = "S1".parse().unwrap();
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"S1\"");
    let back: SourceId = serde_json::from_str("\"https://openalex.org/S1\"").unwrap();
    assert_eq!(back, id);
    assert!(serde_json::from_str::<SourceId>("\"W1\"").is_err());
}

#[test]
fn year_range_bounds() {
    let range = DateRange::years(2020, 2022).unwrap();
    assert_eq!(range.year_bounds(), (Some(2020), Some(2022)));
    assert_eq!(
        range.month_bounds(),
        (YearMonth::new(2020, 1), YearMonth::new(2022, 12))
    );
    assert!(DateRange::default().is_open());
}

#[test]
fn filter_mode_parses_from_config_strings() {
    let mode: FilterMode = serde_json::from_str("\"host-venue\"").unwrap();
    assert_eq!(mode, FilterMode::HostVenue);
    assert_eq!(FilterMode::default(), FilterMode::PrimaryLocation);
}

#[test]
fn metric_order_is_works_then_citations() {
    assert_eq!(
        Metric::ALL.map(Metric::as_str),
        ["works_count", "cited_by_count"]
    );
}
