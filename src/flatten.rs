//! Turns a raw source record into one row of `servers.csv`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::fetcher::RawMetadataRecord;

/// Topics beyond this many (in ranked order) are dropped.
pub const TOPIC_CAP: usize = 25;
pub const TOPIC_DELIMITER: &str = "; ";
const LIST_DELIMITER: &str = "|";
const KEY_SEPARATOR: &str = "__";

pub const RAW_JSON_COLUMN: &str = "raw_json";

/// Bulky fields that are either aggregated elsewhere or replaced by the
/// topic columns.
pub const DROPPED_KEYS: [&str; 4] = ["counts_by_year", "topic_share", "x_concepts", "topics"];

pub const PREFERRED_COLUMNS: &[&str] = &[
    "source_id",
    "display_name",
    "type",
    "homepage_url",
    "issn_l",
    "issn",
    "country_code",
    "host_organization_name",
    "host_organization",
    "host_organization_lineage",
    "is_oa",
    "is_in_doaj",
    "is_indexed_in_scopus",
    "is_core",
    "works_count",
    "cited_by_count",
    "summary_stats__2yr_mean_citedness",
    "summary_stats__h_index",
    "summary_stats__i10_index",
    "ids__openalex",
    "ids__wikidata",
    "topics_display",
    "topics_subfields",
    "topics_domains",
    "works_api_url",
    "updated_date",
    "created_date",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatRow {
    columns: BTreeMap<String, String>,
}

impl FlatRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).map(String::as_str)
    }

    pub fn cell(&self, column: &str) -> &str {
        self.get(column).unwrap_or_default()
    }

    pub fn source_id(&self) -> &str {
        self.cell("source_id")
    }

    pub fn display_name(&self) -> &str {
        self.cell("display_name")
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicColumns {
    pub display: String,
    pub subfields: String,
    pub domains: String,
}

pub fn flatten_record(record: &RawMetadataRecord) -> FlatRow {
    let mut cleaned = record.payload.clone();
    if let Some(object) = cleaned.as_object_mut() {
        for key in DROPPED_KEYS {
            object.remove(key);
        }
    }

    let mut columns = BTreeMap::new();
    flatten_value(&cleaned, "", &mut columns);

    let topics = topic_columns(record.payload.get("topics").unwrap_or(&Value::Null));
    columns.insert("source_id".to_string(), record.source_id.to_string());
    columns.insert(
        "display_name".to_string(),
        record.display_name().to_string(),
    );
    columns.entry("type".to_string()).or_default();
    columns.entry("homepage_url".to_string()).or_default();
    columns.insert("topics_display".to_string(), topics.display);
    columns.insert("topics_subfields".to_string(), topics.subfields);
    columns.insert("topics_domains".to_string(), topics.domains);
    columns.insert(
        RAW_JSON_COLUMN.to_string(),
        serde_json::to_string(&record.payload).unwrap_or_default(),
    );

    FlatRow { columns }
}

/// Splits a ranked topic list into three aligned display columns.
pub fn topic_columns(topics: &Value) -> TopicColumns {
    let Some(topics) = topics.as_array() else {
        return TopicColumns::default();
    };

    let mut display = Vec::new();
    let mut subfields = Vec::new();
    let mut domains = Vec::new();
    for topic in topics.iter().filter(|topic| topic.is_object()).take(TOPIC_CAP) {
        let name = nested_name(topic, None);
        if !name.is_empty() {
            match topic.get("count").map(scalar_text).filter(|c| !c.is_empty()) {
                Some(count) => display.push(format!("{name} ({count})")),
                None => display.push(name.to_string()),
            }
        }
        let subfield = nested_name(topic, Some("subfield"));
        if !subfield.is_empty() {
            subfields.push(subfield.to_string());
        }
        let domain = nested_name(topic, Some("domain"));
        if !domain.is_empty() {
            domains.push(domain.to_string());
        }
    }

    TopicColumns {
        display: display.join(TOPIC_DELIMITER),
        subfields: subfields.join(TOPIC_DELIMITER),
        domains: domains.join(TOPIC_DELIMITER),
    }
}

fn nested_name<'v>(topic: &'v Value, level: Option<&str>) -> &'v str {
    let node = match level {
        Some(level) => topic.get(level),
        None => Some(topic),
    };
    node.and_then(|node| node.get("display_name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// `servers.csv` header: preferred columns that occur, then the rest sorted,
/// then `raw_json`.
pub fn column_order(rows: &[FlatRow]) -> Vec<String> {
    let present = rows
        .iter()
        .flat_map(|row| row.columns())
        .collect::<BTreeSet<_>>();
    let mut header = PREFERRED_COLUMNS
        .iter()
        .filter(|column| present.contains(**column))
        .map(|column| column.to_string())
        .collect::<Vec<_>>();
    header.extend(
        present
            .iter()
            .filter(|column| !PREFERRED_COLUMNS.contains(*column) && **column != RAW_JSON_COLUMN)
            .map(|column| column.to_string()),
    );
    if present.contains(RAW_JSON_COLUMN) {
        header.push(RAW_JSON_COLUMN.to_string());
    }
    header
}

fn flatten_value(value: &Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(object) => flatten_object(object, prefix, out),
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            for (index, item) in items.iter().enumerate() {
                let key = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{prefix}_{index}")
                };
                flatten_value(item, &key, out);
            }
        }
        Value::Array(items) => {
            out.insert(leaf_key(prefix), join_list(items));
        }
        scalar => {
            out.insert(leaf_key(prefix), scalar_text(scalar));
        }
    }
}

fn flatten_object(object: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (key, value) in object {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{KEY_SEPARATOR}{key}")
        };
        flatten_value(value, &key, out);
    }
}

fn leaf_key(prefix: &str) -> String {
    if prefix.is_empty() {
        "value".to_string()
    } else {
        prefix.to_string()
    }
}

fn join_list(items: &[Value]) -> String {
    items
        .iter()
        .map(scalar_text)
        .collect::<Vec<_>>()
        .join(LIST_DELIMITER)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}
