//! Import pipeline: fetch the catalog, parse it, and replace the stored batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dcat_adapters::parse_catalog;
use dcat_core::{CatalogError, ImportPolicy};
use dcat_storage::{HttpClientConfig, HttpFetcher, ImportBatch, PayloadArchive, RecordStore};
use serde::Serialize;
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dcat-sync";

pub const DEFAULT_CATALOG_URL: &str = "https://www.sba.gov/data.json";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://sba.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub database_url: String,
    pub catalog_url: String,
    pub policy: ImportPolicy,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub archive_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub import_cron: String,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            catalog_url: lookup("DCAT_CATALOG_URL").unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            policy: ImportPolicy::from_drop_flag(
                lookup("DCAT_DROP_BEFORE_IMPORT")
                    .map(|v| flag_enabled(&v))
                    .unwrap_or(true),
            ),
            http_timeout_secs: lookup("DCAT_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            user_agent: lookup("DCAT_USER_AGENT").unwrap_or_else(|| "dcat-mirror/0.1".to_string()),
            archive_dir: lookup("DCAT_ARCHIVE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            scheduler_enabled: lookup("DCAT_SCHEDULER_ENABLED")
                .map(|v| flag_enabled(&v))
                .unwrap_or(false),
            import_cron: lookup("DCAT_IMPORT_CRON").unwrap_or_else(|| "0 0 6 * * *".to_string()),
        }
    }
}

fn flag_enabled(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

/// Where the catalog bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Remote(String),
    File(PathBuf),
}

impl CatalogSource {
    pub fn describe(&self) -> String {
        match self {
            Self::Remote(url) => url.clone(),
            Self::File(path) => format!("file://{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub batch_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_bytes: usize,
    pub parsed_records: usize,
    pub unidentified_entries: usize,
    pub stored_records: u64,
    pub policy: ImportPolicy,
    pub archived_payload: Option<String>,
}

pub struct ImportPipeline {
    config: ImportConfig,
    store: RecordStore,
    http: HttpFetcher,
    archive: Option<PayloadArchive>,
}

impl ImportPipeline {
    pub fn new(config: ImportConfig, store: RecordStore) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let archive = config.archive_dir.clone().map(PayloadArchive::new);
        Ok(Self {
            config,
            store,
            http,
            archive,
        })
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// One import batch from the configured catalog URL.
    pub async fn run_once(&self) -> Result<ImportSummary> {
        let source = CatalogSource::Remote(self.config.catalog_url.clone());
        self.run_from_source(&source).await
    }

    pub async fn run_from_source(&self, source: &CatalogSource) -> Result<ImportSummary> {
        let started_at = Utc::now();
        let batch_id = Uuid::new_v4();
        info!(%batch_id, source = %source.describe(), policy = %self.config.policy, "catalog import started");

        let payload = match source {
            CatalogSource::Remote(url) => {
                self.http
                    .fetch_bytes(batch_id, url)
                    .await
                    .map_err(CatalogError::from)
                    .with_context(|| format!("fetching catalog from {url}"))?
                    .body
            }
            CatalogSource::File(path) => fs::read(path)
                .await
                .with_context(|| format!("reading catalog file {}", path.display()))?,
        };

        let archived_payload = match &self.archive {
            Some(archive) => {
                let archived = archive.store(started_at, &payload).await?;
                Some(archived.absolute_path.display().to_string())
            }
            None => None,
        };

        let parsed = parse_catalog(&payload)
            .map_err(CatalogError::from)
            .context("parsing catalog payload")?;

        let batch = ImportBatch {
            batch_id,
            source_url: source.describe(),
            started_at,
            unidentified_count: parsed.unidentified as u64,
            conforms_to: parsed.header.conforms_to.clone(),
            policy: self.config.policy,
        };
        let run = self
            .store
            .replace_all(&batch, &parsed.drafts)
            .await
            .map_err(CatalogError::from)
            .context("storing import batch")?;

        let summary = ImportSummary {
            batch_id,
            source: run.source_url,
            started_at,
            finished_at: run.finished_at,
            fetched_bytes: payload.len(),
            parsed_records: parsed.drafts.len(),
            unidentified_entries: parsed.unidentified,
            stored_records: run.record_count,
            policy: run.policy,
            archived_payload,
        };
        info!(
            %batch_id,
            bytes = summary.fetched_bytes,
            parsed = summary.parsed_records,
            unidentified = summary.unidentified_entries,
            "catalog import finished"
        );
        Ok(summary)
    }

    /// Cron-driven re-import, only when enabled in config.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.import_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                if let Err(err) = pipeline.run_once().await {
                    error!(error = %format!("{err:#}"), "scheduled catalog import failed");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

/// Finds the taxonomy error at the root of an import failure, if any.
pub fn catalog_error(err: &anyhow::Error) -> Option<&CatalogError> {
    err.chain().find_map(|cause| cause.downcast_ref::<CatalogError>())
}
