//! Core domain model and error taxonomy for the DCAT catalog mirror.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "dcat-core";

/// Separator used when flattening list-valued catalog fields into one column.
pub const LIST_SEPARATOR: &str = ", ";

/// One catalog entry flattened into scalar string columns.
///
/// Only the first `distribution` of the source entry survives; the remaining
/// distributions are dropped during parsing. Absent optional values are
/// empty strings, never null.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetDraft {
    #[serde(rename = "@type")]
    pub dataset_type: String,
    pub title: String,
    pub description: String,
    pub modified: String,
    #[serde(rename = "accessLevel")]
    pub access_level: String,
    pub identifier: String,
    #[serde(rename = "landingPage")]
    pub landing_page: String,
    pub license: String,
    #[serde(rename = "publisher.name")]
    pub publisher_name: String,
    #[serde(rename = "publisher.type")]
    pub publisher_type: String,
    #[serde(rename = "contactPoint.type")]
    pub contact_type: String,
    #[serde(rename = "contactPoint.fn")]
    pub contact_name: String,
    #[serde(rename = "hasEmail")]
    pub contact_email: String,
    #[serde(rename = "distribution.@type")]
    pub dist_type: String,
    #[serde(rename = "distribution.accessURL")]
    pub dist_access_url: String,
    #[serde(rename = "distribution.title")]
    pub dist_title: String,
    #[serde(rename = "distribution.mediaType")]
    pub dist_media_type: String,
    #[serde(rename = "distribution.downloadURL")]
    pub dist_download_url: String,
    pub keyword: String,
    #[serde(rename = "bureauCode")]
    pub bureau_code: String,
    #[serde(rename = "programCode")]
    pub program_code: String,
}

impl DatasetDraft {
    pub fn has_distribution(&self) -> bool {
        !(self.dist_type.is_empty()
            && self.dist_access_url.is_empty()
            && self.dist_title.is_empty()
            && self.dist_media_type.is_empty()
            && self.dist_download_url.is_empty())
    }
}

/// Persisted dataset row: a draft plus the columns assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "importBatch")]
    pub import_batch: Uuid,
    #[serde(flatten)]
    pub dataset: DatasetDraft,
}

/// Top-level metadata of a DCAT-US `data.json` document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogHeader {
    #[serde(rename = "conformsTo")]
    pub conforms_to: String,
    #[serde(rename = "describedBy")]
    pub described_by: String,
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@type")]
    pub catalog_type: String,
}

/// Bookkeeping row written once per import batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRun {
    pub batch_id: Uuid,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub record_count: u64,
    pub unidentified_count: u64,
    pub conforms_to: String,
    pub policy: ImportPolicy,
}

/// What happens to existing rows when a new batch is imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPolicy {
    #[default]
    DropAndRecreate,
    Append,
}

impl ImportPolicy {
    pub fn from_drop_flag(drop_before_import: bool) -> Self {
        if drop_before_import {
            Self::DropAndRecreate
        } else {
            Self::Append
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropAndRecreate => "drop_and_recreate",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for ImportPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportPolicy {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_and_recreate" => Ok(Self::DropAndRecreate),
            "append" => Ok(Self::Append),
            other => Err(CatalogError::Storage(format!("unknown import policy {other:?}"))),
        }
    }
}

/// 1-based page request. `page == 0 && limit == 0` means "everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const ALL: PageRequest = PageRequest { page: 0, limit: 0 };

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn is_unpaginated(&self) -> bool {
        self.page == 0 && self.limit == 0
    }

    /// `(offset, limit)` for the query, `None` when the whole table is wanted.
    ///
    /// Page 0 with a non-zero limit is read as page 1. A zero limit on a
    /// non-zero page has no upper bound.
    pub fn window(&self) -> Option<(u64, Option<u64>)> {
        if self.is_unpaginated() {
            return None;
        }
        let page = u64::from(self.page.max(1));
        let limit = u64::from(self.limit);
        let offset = (page - 1) * limit;
        let limit = (limit > 0).then_some(limit);
        Some((offset, limit))
    }
}

/// Error taxonomy shared by every crate in the workspace.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("dataset {0:?} not found")]
    NotFound(String),
}

impl CatalogError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkFailure(_) => "network_failure",
            Self::MalformedPayload(_) => "malformed_payload",
            Self::Storage(_) => "storage_error",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Joins list elements the way catalog list fields are flattened.
pub fn flatten_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}
