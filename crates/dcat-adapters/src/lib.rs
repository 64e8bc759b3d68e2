//! DCAT-US `data.json` parsing: nested catalog entries in, flat drafts out.

use std::fs;
use std::path::Path;

use anyhow::Context;
use dcat_core::{flatten_list, CatalogError, CatalogHeader, DatasetDraft};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "dcat-adapters";

/// Key holding the entry list in a catalog document.
pub const DATASET_KEY: &str = "dataset";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("catalog root is not a JSON object")]
    RootNotObject,
    #[error("catalog has no `dataset` array")]
    MissingDatasetArray,
    #[error("`dataset` entry {index} is not a JSON object")]
    EntryNotObject { index: usize },
}

impl From<PayloadError> for CatalogError {
    fn from(err: PayloadError) -> Self {
        CatalogError::MalformedPayload(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ParsedCatalog {
    pub header: CatalogHeader,
    pub drafts: Vec<DatasetDraft>,
    /// Entries stored with an empty `identifier`.
    pub unidentified: usize,
}

/// Decodes a catalog payload.
///
/// Only the top-level shape can fail the batch. Inside an entry, absent or
/// oddly typed optional fields become empty strings. Every entry yields one
/// draft, including entries without an identifier.
pub fn parse_catalog(bytes: &[u8]) -> Result<ParsedCatalog, PayloadError> {
    let root: JsonValue = serde_json::from_slice(bytes)?;
    let root = root.as_object().ok_or(PayloadError::RootNotObject)?;
    let entries = root
        .get(DATASET_KEY)
        .and_then(JsonValue::as_array)
        .ok_or(PayloadError::MissingDatasetArray)?;

    let header = CatalogHeader {
        conforms_to: root_text(root, "conformsTo"),
        described_by: root_text(root, "describedBy"),
        context: root_text(root, "@context"),
        catalog_type: root_text(root, "@type"),
    };

    let mut drafts = Vec::with_capacity(entries.len());
    let mut unidentified = 0usize;
    for (index, entry) in entries.iter().enumerate() {
        if !entry.is_object() {
            return Err(PayloadError::EntryNotObject { index });
        }
        let draft = flatten_entry(entry);
        if draft.identifier.trim().is_empty() {
            warn!(
                index,
                title = %draft.title,
                "catalog entry has no identifier"
            );
            unidentified += 1;
        }
        drafts.push(draft);
    }

    Ok(ParsedCatalog {
        header,
        drafts,
        unidentified,
    })
}

/// Reads and parses a catalog document from disk.
pub fn load_catalog_file(path: impl AsRef<Path>) -> anyhow::Result<ParsedCatalog> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    parse_catalog(&bytes).with_context(|| format!("parsing {}", path.display()))
}

/// Flattens one entry. Scalars are copied as published.
///
/// Of the `distribution` list only the first element is kept.
pub fn flatten_entry(entry: &JsonValue) -> DatasetDraft {
    let first_dist = entry
        .get("distribution")
        .and_then(JsonValue::as_array)
        .and_then(|dists| dists.first())
        .unwrap_or(&JsonValue::Null);

    DatasetDraft {
        dataset_type: json_text(entry, &["@type"]),
        title: json_text(entry, &["title"]),
        description: json_text(entry, &["description"]),
        modified: json_text(entry, &["modified"]),
        access_level: json_text(entry, &["accessLevel"]),
        identifier: json_text(entry, &["identifier"]),
        landing_page: json_text(entry, &["landingPage"]),
        license: json_text(entry, &["license"]),
        publisher_name: json_text(entry, &["publisher", "name"]),
        publisher_type: json_text(entry, &["publisher", "@type"]),
        contact_type: json_text(entry, &["contactPoint", "@type"]),
        contact_name: json_text(entry, &["contactPoint", "fn"]),
        contact_email: json_text(entry, &["contactPoint", "hasEmail"]),
        dist_type: json_text(first_dist, &["@type"]),
        dist_access_url: json_text(first_dist, &["accessURL"]),
        dist_title: json_text(first_dist, &["title"]),
        dist_media_type: json_text(first_dist, &["mediaType"]),
        dist_download_url: json_text(first_dist, &["downloadURL"]),
        keyword: json_joined(entry, &["keyword"]),
        bureau_code: json_joined(entry, &["bureauCode"]),
        program_code: json_joined(entry, &["programCode"]),
    }
}

fn root_text(root: &serde_json::Map<String, JsonValue>, key: &str) -> String {
    root.get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

fn json_text(value: &JsonValue, path: &[&str]) -> String {
    json_str(value, path).unwrap_or_default().to_string()
}

fn json_joined(value: &JsonValue, path: &[&str]) -> String {
    match json_at(value, path) {
        Some(JsonValue::Array(items)) => {
            let parts = items.iter().filter_map(JsonValue::as_str).collect::<Vec<_>>();
            flatten_list(&parts)
        }
        Some(JsonValue::String(single)) => single.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_value(value: JsonValue) -> Result<ParsedCatalog, PayloadError> {
        parse_catalog(&serde_json::to_vec(&value).expect("serialize"))
    }

    #[test]
    fn list_fields_are_comma_joined() {
        let parsed = parse_value(json!({
            "dataset": [{
                "identifier": "SBA-1",
                "keyword": ["a", "b", "c"],
                "bureauCode": ["028:00"],
                "programCode": ["028:002", "028:010"]
            }]
        }))
        .expect("parse");
        let draft = &parsed.drafts[0];
        assert_eq!(draft.keyword, "a, b, c");
        assert_eq!(draft.bureau_code, "028:00");
        assert_eq!(draft.program_code, "028:002, 028:010");
    }

    #[test]
    fn empty_distribution_leaves_all_distribution_fields_empty() {
        let parsed = parse_value(json!({
            "dataset": [
                { "identifier": "no-dist", "distribution": [] },
                { "identifier": "absent-dist" }
            ]
        }))
        .expect("parse");
        for draft in &parsed.drafts {
            assert!(draft.dist_type.is_empty());
            assert!(draft.dist_access_url.is_empty());
            assert!(draft.dist_title.is_empty());
            assert!(draft.dist_media_type.is_empty());
            assert!(draft.dist_download_url.is_empty());
            assert!(!draft.has_distribution());
        }
    }

    #[test]
    fn only_first_distribution_is_kept() {
        let parsed = parse_value(json!({
            "dataset": [{
                "identifier": "multi",
                "distribution": [
                    {
                        "@type": "dcat:Distribution",
                        "downloadURL": "https://data.sba.gov/first.csv",
                        "mediaType": "text/csv",
                        "title": "First"
                    },
                    {
                        "@type": "dcat:Distribution",
                        "downloadURL": "https://data.sba.gov/second.xlsx",
                        "title": "Second"
                    }
                ]
            }]
        }))
        .expect("parse");
        let draft = &parsed.drafts[0];
        assert_eq!(draft.dist_title, "First");
        assert_eq!(draft.dist_download_url, "https://data.sba.gov/first.csv");
        assert_eq!(draft.dist_media_type, "text/csv");
        assert_eq!(draft.dist_access_url, "");
    }

    #[test]
    fn nested_publisher_and_contact_are_flattened() {
        let parsed = parse_value(json!({
            "conformsTo": "https://project-open-data.cio.gov/v1.1/schema",
            "@type": "dcat:Catalog",
            "dataset": [{
                "@type": "dcat:Dataset",
                "identifier": "SBA-7a",
                "title": "7(a) Loans",
                "accessLevel": "public",
                "publisher": { "@type": "org:Organization", "name": "Small Business Administration" },
                "contactPoint": { "@type": "vcard:Contact", "fn": "Data Team", "hasEmail": "mailto:data@sba.gov" }
            }]
        }))
        .expect("parse");
        assert_eq!(parsed.header.conforms_to, "https://project-open-data.cio.gov/v1.1/schema");
        assert_eq!(parsed.header.catalog_type, "dcat:Catalog");
        let draft = &parsed.drafts[0];
        assert_eq!(draft.dataset_type, "dcat:Dataset");
        assert_eq!(draft.publisher_name, "Small Business Administration");
        assert_eq!(draft.publisher_type, "org:Organization");
        assert_eq!(draft.contact_name, "Data Team");
        assert_eq!(draft.contact_email, "mailto:data@sba.gov");
        assert_eq!(draft.contact_type, "vcard:Contact");
    }

    #[test]
    fn missing_or_mistyped_optional_fields_default_to_empty() {
        let parsed = parse_value(json!({
            "dataset": [{
                "identifier": "sparse",
                "title": 42,
                "publisher": "not an object",
                "keyword": "single keyword",
                "bureauCode": null
            }]
        }))
        .expect("parse");
        let draft = &parsed.drafts[0];
        assert_eq!(draft.title, "");
        assert_eq!(draft.publisher_name, "");
        assert_eq!(draft.keyword, "single keyword");
        assert_eq!(draft.bureau_code, "");
        assert_eq!(draft.license, "");
    }

    #[test]
    fn entries_without_identifier_are_kept_in_order() {
        let parsed = parse_value(json!({
            "dataset": [
                { "identifier": "keep-me" },
                { "title": "orphan" },
                { "identifier": "   " }
            ]
        }))
        .expect("parse");
        assert_eq!(parsed.drafts.len(), 3);
        assert_eq!(parsed.unidentified, 2);
        let ids = parsed.drafts.iter().map(|d| d.identifier.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["keep-me", "", "   "]);
        assert_eq!(parsed.drafts[1].title, "orphan");
    }

    #[test]
    fn identifier_is_stored_exactly_as_published() {
        let parsed = parse_value(json!({
            "dataset": [{ "identifier": " SBA-1 " }]
        }))
        .expect("parse");
        assert_eq!(parsed.drafts[0].identifier, " SBA-1 ");
        assert_eq!(parsed.unidentified, 0);
    }

    #[test]
    fn one_draft_per_entry() {
        let entries = (0..7)
            .map(|i| {
                if i % 3 == 0 {
                    json!({ "title": i })
                } else {
                    json!({ "identifier": format!("id-{i}") })
                }
            })
            .collect::<Vec<_>>();
        let parsed = parse_value(json!({ "dataset": entries })).expect("parse");
        assert_eq!(parsed.drafts.len(), 7);
        assert_eq!(parsed.unidentified, 3);
    }

    #[test]
    fn malformed_top_level_shapes_are_rejected() {
        assert!(matches!(parse_catalog(b"not json"), Err(PayloadError::InvalidJson(_))));
        assert!(matches!(parse_value(json!([1, 2])), Err(PayloadError::RootNotObject)));
        assert!(matches!(parse_value(json!({"datasets": []})), Err(PayloadError::MissingDatasetArray)));
        assert!(matches!(parse_value(json!({"dataset": {}})), Err(PayloadError::MissingDatasetArray)));
        assert!(matches!(
            parse_value(json!({"dataset": [{"identifier": "ok"}, "nope"]})),
            Err(PayloadError::EntryNotObject { index: 1 })
        ));

        let err: CatalogError = PayloadError::RootNotObject.into();
        assert_eq!(err.kind(), "malformed_payload");
    }

    #[test]
    fn empty_dataset_array_is_valid() {
        let parsed = parse_value(json!({ "dataset": [] })).expect("parse");
        assert!(parsed.drafts.is_empty());
        assert_eq!(parsed.unidentified, 0);
    }
}
