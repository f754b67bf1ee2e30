use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use preprint_trends::config::{
    Config, ConfigLoader, ConfigOverrides, ServerEntry, ServerEntryObject,
};
use preprint_trends::domain::FilterMode;
use preprint_trends::error::TrendsError;
use preprint_trends::resolver::Pick;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("preprint-trends.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "mailto": "me@example.org",
            "polite_delay_ms": 100,
            "max_retries": 2,
            "filter": "both",
            "monthly": true,
            "date_from": "2020-01-01",
            "servers": [
                "bioRxiv",
                {"name": "medRxiv", "ids": ["https://openalex.org/S2"]},
                {"name": "arXiv", "pick": "all"}
            ]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.path.as_deref(), Some(path.as_path()));
    assert_eq!(resolved.http.mailto.as_deref(), Some("me@example.org"));
    assert_eq!(resolved.http.polite_delay, Duration::from_millis(100));
    assert_eq!(resolved.http.max_retries, 2);
    assert_eq!(resolved.build.filter, FilterMode::Both);
    assert!(resolved.build.monthly);
    assert_eq!(resolved.build.range.year_bounds(), (Some(2020), None));
    assert_eq!(resolved.servers.len(), 3);
    assert_eq!(resolved.servers[1].ids[0].as_str(), "S2");
    assert_eq!(resolved.servers[2].pick, Some(Pick::All));
}

#[test]
fn cli_overrides_win() {
    let config = Config {
        per_page: Some(10),
        date_from: Some("2019-01-01".to_string()),
        date_to: Some("2021-12-31".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config)
        .unwrap()
        .apply(ConfigOverrides {
            per_page: Some(50),
            filter: Some(FilterMode::HostVenue),
            monthly: Some(true),
            date_from: Some("2020-06-01".to_string()),
            ..ConfigOverrides::default()
        })
        .unwrap();
    assert_eq!(resolved.per_page, 50);
    assert_eq!(resolved.build.filter, FilterMode::HostVenue);
    assert!(resolved.build.monthly);
    assert_eq!(resolved.build.range.year_bounds(), (Some(2020), Some(2021)));
}

#[test]
fn override_cannot_invert_range() {
    let config = Config {
        date_to: Some("2019-12-31".to_string()),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config)
        .unwrap()
        .apply(ConfigOverrides {
            date_from: Some("2020-01-01".to_string()),
            ..ConfigOverrides::default()
        })
        .unwrap_err();
    assert_matches!(err, TrendsError::InvalidDateRange { .. });
}

#[test]
fn explicit_missing_path_is_error() {
    let err = ConfigLoader::resolve(Some("/definitely/not/here.json")).unwrap_err();
    assert_matches!(err, TrendsError::MissingConfig(_));
}

#[test]
fn malformed_json_is_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.json");
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(TrendsError::ConfigParse(_))
    );
}

#[test]
fn invalid_server_id_is_rejected() {
    let config = Config {
        servers: vec![ServerEntry::Detailed(ServerEntryObject {
            name: "bad".to_string(),
            ids: Some(vec!["W123".to_string()]),
            pick: None,
        })],
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(TrendsError::InvalidSourceId(_))
    );
}
