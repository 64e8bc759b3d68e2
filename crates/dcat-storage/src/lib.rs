//! Catalog fetch, raw payload archive, and the SQLite record store.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use dcat_core::{CatalogError, DatasetDraft, DatasetRecord, ImportPolicy, ImportRun, PageRequest};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dcat-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty response body from {url}")]
    EmptyBody { url: String },
}

impl From<FetchError> for CatalogError {
    fn from(err: FetchError) -> Self {
        CatalogError::NetworkFailure(err.to_string())
    }
}

/// Single-shot GET client for the catalog document. No retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, batch_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("catalog_fetch", %batch_id, url);
        async move {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url.to_string(),
                    source,
                })?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp
                .bytes()
                .await
                .map_err(|source| FetchError::Request {
                    url: final_url.clone(),
                    source,
                })?
                .to_vec();
            if body.is_empty() {
                return Err(FetchError::EmptyBody { url: final_url });
            }

            debug!(bytes = body.len(), %status, "catalog payload received");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct ArchivedPayload {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub deduplicated: bool,
}

/// Content-addressed archive of raw catalog payloads.
#[derive(Debug, Clone)]
pub struct PayloadArchive {
    root: PathBuf,
}

impl PayloadArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn relative_path_for(fetched_at: DateTime<Utc>, content_hash: &str) -> PathBuf {
        PathBuf::from(fetched_at.format("%Y%m%d_%H%M%S").to_string())
            .join(format!("{content_hash}.json"))
    }

    /// Writes the payload through a temp file and renames it into place.
    pub async fn store(&self, fetched_at: DateTime<Utc>, bytes: &[u8]) -> anyhow::Result<ArchivedPayload> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::relative_path_for(fetched_at, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        let archived = |deduplicated| ArchivedPayload {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            deduplicated,
        };

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp archive file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp archive file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp archive file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                return Ok(archived(true));
            }
            return Err(err).with_context(|| {
                format!(
                    "renaming temp archive {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(archived(false))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row in {table}: {message}")]
    Decode { table: &'static str, message: String },
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        CatalogError::Storage(err.to_string())
    }
}

const CREATE_DATA_SETS: &str = r#"
CREATE TABLE IF NOT EXISTS data_sets (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    import_batch      TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    dataset_type      TEXT NOT NULL DEFAULT '',
    title             TEXT NOT NULL DEFAULT '',
    description       TEXT NOT NULL DEFAULT '',
    last_modified     TEXT NOT NULL DEFAULT '',
    access_level      TEXT NOT NULL DEFAULT '',
    identifier        TEXT NOT NULL,
    landing_page      TEXT NOT NULL DEFAULT '',
    license           TEXT NOT NULL DEFAULT '',
    pub_name          TEXT NOT NULL DEFAULT '',
    pub_type          TEXT NOT NULL DEFAULT '',
    contact_type      TEXT NOT NULL DEFAULT '',
    contact_fn        TEXT NOT NULL DEFAULT '',
    contact_email     TEXT NOT NULL DEFAULT '',
    dist_type         TEXT NOT NULL DEFAULT '',
    dist_access_url   TEXT NOT NULL DEFAULT '',
    dist_title        TEXT NOT NULL DEFAULT '',
    dist_media_type   TEXT NOT NULL DEFAULT '',
    dist_download_url TEXT NOT NULL DEFAULT '',
    keywords          TEXT NOT NULL DEFAULT '',
    bureau_code       TEXT NOT NULL DEFAULT '',
    program_code      TEXT NOT NULL DEFAULT ''
)
"#;

const CREATE_DATA_SETS_IDENTIFIER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_data_sets_identifier ON data_sets (identifier)";

const CREATE_IMPORT_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS import_runs (
    batch_id      TEXT PRIMARY KEY,
    source_url    TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    finished_at   TEXT NOT NULL,
    record_count  INTEGER NOT NULL,
    unidentified_count INTEGER NOT NULL,
    conforms_to   TEXT NOT NULL DEFAULT '',
    policy        TEXT NOT NULL
)
"#;

const SELECT_DATA_SET_COLUMNS: &str = r#"
SELECT id, import_batch, created_at, dataset_type, title, description, last_modified,
       access_level, identifier, landing_page, license, pub_name, pub_type,
       contact_type, contact_fn, contact_email, dist_type, dist_access_url,
       dist_title, dist_media_type, dist_download_url, keywords, bureau_code,
       program_code
  FROM data_sets
"#;

/// Describes the batch being written by [`RecordStore::replace_all`].
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub source_url: String,
    pub started_at: DateTime<Utc>,
    pub unidentified_count: u64,
    pub conforms_to: String,
    pub policy: ImportPolicy,
}

/// SQLite-backed store of flattened dataset rows.
///
/// Every operation checks a connection out of the pool and returns it when
/// the query completes.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = if database_url.contains(":memory:") {
            // each in-memory connection is its own database; pin exactly one
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };
        Ok(Self { pool })
    }

    /// Connects and makes sure both tables exist.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for ddl in [CREATE_DATA_SETS, CREATE_DATA_SETS_IDENTIFIER_INDEX, CREATE_IMPORT_RUNS] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Writes one import batch in a single transaction.
    ///
    /// Under [`ImportPolicy::DropAndRecreate`] the `data_sets` table is dropped
    /// and recreated first; under [`ImportPolicy::Append`] existing rows stay.
    pub async fn replace_all(
        &self,
        batch: &ImportBatch,
        drafts: &[DatasetDraft],
    ) -> Result<ImportRun, StoreError> {
        let mut tx = self.pool.begin().await?;

        if batch.policy == ImportPolicy::DropAndRecreate {
            sqlx::query("DROP TABLE IF EXISTS data_sets")
                .execute(&mut *tx)
                .await?;
        }
        for ddl in [CREATE_DATA_SETS, CREATE_DATA_SETS_IDENTIFIER_INDEX, CREATE_IMPORT_RUNS] {
            sqlx::query(ddl).execute(&mut *tx).await?;
        }

        let batch_text = batch.batch_id.to_string();
        let created_at = Utc::now();
        for draft in drafts {
            sqlx::query(
                r#"
                INSERT INTO data_sets (
                    import_batch, created_at, dataset_type, title, description, last_modified,
                    access_level, identifier, landing_page, license, pub_name, pub_type,
                    contact_type, contact_fn, contact_email, dist_type, dist_access_url,
                    dist_title, dist_media_type, dist_download_url, keywords, bureau_code,
                    program_code
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&batch_text)
            .bind(created_at)
            .bind(&draft.dataset_type)
            .bind(&draft.title)
            .bind(&draft.description)
            .bind(&draft.modified)
            .bind(&draft.access_level)
            .bind(&draft.identifier)
            .bind(&draft.landing_page)
            .bind(&draft.license)
            .bind(&draft.publisher_name)
            .bind(&draft.publisher_type)
            .bind(&draft.contact_type)
            .bind(&draft.contact_name)
            .bind(&draft.contact_email)
            .bind(&draft.dist_type)
            .bind(&draft.dist_access_url)
            .bind(&draft.dist_title)
            .bind(&draft.dist_media_type)
            .bind(&draft.dist_download_url)
            .bind(&draft.keyword)
            .bind(&draft.bureau_code)
            .bind(&draft.program_code)
            .execute(&mut *tx)
            .await?;
        }

        let run = ImportRun {
            batch_id: batch.batch_id,
            source_url: batch.source_url.clone(),
            started_at: batch.started_at,
            finished_at: Utc::now(),
            record_count: drafts.len() as u64,
            unidentified_count: batch.unidentified_count,
            conforms_to: batch.conforms_to.clone(),
            policy: batch.policy,
        };
        sqlx::query(
            r#"
            INSERT INTO import_runs (
                batch_id, source_url, started_at, finished_at,
                record_count, unidentified_count, conforms_to, policy
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch_text)
        .bind(&run.source_url)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.record_count as i64)
        .bind(run.unidentified_count as i64)
        .bind(&run.conforms_to)
        .bind(run.policy.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            batch_id = %run.batch_id,
            records = run.record_count,
            policy = %run.policy,
            "import batch committed"
        );
        Ok(run)
    }

    /// Exact-match lookup; the oldest row wins when identifiers repeat.
    pub async fn get_by_id(&self, identifier: &str) -> Result<Option<DatasetRecord>, StoreError> {
        let sql = format!("{SELECT_DATA_SET_COLUMNS} WHERE identifier = ? ORDER BY id LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Rows in creation order. [`PageRequest::ALL`] returns the whole table.
    pub async fn get_page(&self, request: PageRequest) -> Result<Vec<DatasetRecord>, StoreError> {
        let rows = match request.window() {
            None => {
                let sql = format!("{SELECT_DATA_SET_COLUMNS} ORDER BY id");
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
            Some((offset, limit)) => {
                // sqlite clamps a negative OFFSET to 0; past i64::MAX nothing can match
                let Ok(offset) = i64::try_from(offset) else {
                    return Ok(Vec::new());
                };
                // sqlite reads a negative LIMIT as unbounded
                let limit = limit.and_then(|l| i64::try_from(l).ok()).unwrap_or(-1);
                let sql = format!("{SELECT_DATA_SET_COLUMNS} ORDER BY id LIMIT ? OFFSET ?");
                sqlx::query(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(record_from_row).collect()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_sets")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn latest_import(&self) -> Result<Option<ImportRun>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, source_url, started_at, finished_at,
                   record_count, unidentified_count, conforms_to, policy
              FROM import_runs
             ORDER BY finished_at DESC
             LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(import_run_from_row).transpose()
    }
}

fn parse_batch_id(table: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Decode {
        table,
        message: format!("batch id {raw:?}: {err}"),
    })
}

fn record_from_row(row: &SqliteRow) -> Result<DatasetRecord, StoreError> {
    let batch: String = row.try_get("import_batch")?;
    Ok(DatasetRecord {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        import_batch: parse_batch_id("data_sets", &batch)?,
        dataset: DatasetDraft {
            dataset_type: row.try_get("dataset_type")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            modified: row.try_get("last_modified")?,
            access_level: row.try_get("access_level")?,
            identifier: row.try_get("identifier")?,
            landing_page: row.try_get("landing_page")?,
            license: row.try_get("license")?,
            publisher_name: row.try_get("pub_name")?,
            publisher_type: row.try_get("pub_type")?,
            contact_type: row.try_get("contact_type")?,
            contact_name: row.try_get("contact_fn")?,
            contact_email: row.try_get("contact_email")?,
            dist_type: row.try_get("dist_type")?,
            dist_access_url: row.try_get("dist_access_url")?,
            dist_title: row.try_get("dist_title")?,
            dist_media_type: row.try_get("dist_media_type")?,
            dist_download_url: row.try_get("dist_download_url")?,
            keyword: row.try_get("keywords")?,
            bureau_code: row.try_get("bureau_code")?,
            program_code: row.try_get("program_code")?,
        },
    })
}

fn import_run_from_row(row: &SqliteRow) -> Result<ImportRun, StoreError> {
    let batch: String = row.try_get("batch_id")?;
    let policy: String = row.try_get("policy")?;
    let record_count: i64 = row.try_get("record_count")?;
    let unidentified_count: i64 = row.try_get("unidentified_count")?;
    Ok(ImportRun {
        batch_id: parse_batch_id("import_runs", &batch)?,
        source_url: row.try_get("source_url")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        record_count: record_count.max(0) as u64,
        unidentified_count: unidentified_count.max(0) as u64,
        conforms_to: row.try_get("conforms_to")?,
        policy: policy.parse::<ImportPolicy>().map_err(|err: CatalogError| StoreError::Decode {
            table: "import_runs",
            message: err.to_string(),
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn draft(identifier: &str) -> DatasetDraft {
        DatasetDraft {
            identifier: identifier.to_string(),
            title: format!("Dataset {identifier}"),
            keyword: "loans, lending".to_string(),
            ..Default::default()
        }
    }

    fn batch(policy: ImportPolicy) -> ImportBatch {
        ImportBatch {
            batch_id: Uuid::new_v4(),
            source_url: "https://www.sba.gov/data.json".to_string(),
            started_at: Utc::now(),
            unidentified_count: 0,
            conforms_to: "https://project-open-data.cio.gov/v1.1/schema".to_string(),
            policy,
        }
    }

    async fn temp_store() -> (TempDir, RecordStore) {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("catalog.db").display());
        let store = RecordStore::open(&url).await.expect("open store");
        (dir, store)
    }

    async fn five_record_store() -> (TempDir, RecordStore) {
        let (dir, store) = temp_store().await;
        let drafts = (1..=5).map(|i| draft(&format!("ds-{i}"))).collect::<Vec<_>>();
        store
            .replace_all(&batch(ImportPolicy::DropAndRecreate), &drafts)
            .await
            .expect("import");
        (dir, store)
    }

    fn identifiers(records: &[DatasetRecord]) -> Vec<&str> {
        records.iter().map(|r| r.dataset.identifier.as_str()).collect()
    }

    #[test]
    fn payload_hashing_is_stable() {
        assert_eq!(
            PayloadArchive::sha256_hex(b"{\"dataset\":[]}"),
            PayloadArchive::sha256_hex(b"{\"dataset\":[]}")
        );
        assert_eq!(
            PayloadArchive::sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn archive_deduplicates_identical_payloads() {
        let dir = tempdir().expect("tempdir");
        let archive = PayloadArchive::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-10-19T06:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive.store(fetched_at, b"{\"dataset\":[]}").await.expect("first");
        let second = archive.store(fetched_at, b"{\"dataset\":[]}").await.expect("second");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.starts_with("20261019_060000"));
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn pages_are_one_based_and_zero_zero_returns_everything() {
        let (_dir, store) = five_record_store().await;

        let first = store.get_page(PageRequest::new(1, 2)).await.expect("page 1");
        assert_eq!(identifiers(&first), vec!["ds-1", "ds-2"]);

        let last = store.get_page(PageRequest::new(3, 2)).await.expect("page 3");
        assert_eq!(identifiers(&last), vec!["ds-5"]);

        let beyond = store.get_page(PageRequest::new(4, 2)).await.expect("page 4");
        assert!(beyond.is_empty());

        let all = store.get_page(PageRequest::ALL).await.expect("all");
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn page_past_addressable_offset_is_empty() {
        let (_dir, store) = five_record_store().await;
        let (offset, _) = PageRequest::new(u32::MAX, u32::MAX).window().expect("window");
        assert!(offset > i64::MAX as u64);

        let far = store
            .get_page(PageRequest::new(u32::MAX, u32::MAX))
            .await
            .expect("far page");
        assert!(far.is_empty());

        let wide = store.get_page(PageRequest::new(2, u32::MAX)).await.expect("wide page");
        assert!(wide.is_empty());
    }

    #[tokio::test]
    async fn missing_identifier_is_none_not_error() {
        let (_dir, store) = five_record_store().await;
        let found = store.get_by_id("ds-3").await.expect("lookup");
        assert_eq!(found.map(|r| r.dataset.title), Some("Dataset ds-3".to_string()));
        assert!(store.get_by_id("nope").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn lookup_on_fresh_store_is_none() {
        let (_dir, store) = temp_store().await;
        assert!(store.get_by_id("anything").await.expect("lookup").is_none());
        assert_eq!(store.count().await.expect("count"), 0);
    }

    #[tokio::test]
    async fn drop_and_recreate_keeps_only_latest_batch() {
        let (_dir, store) = five_record_store().await;
        let second = batch(ImportPolicy::DropAndRecreate);
        store
            .replace_all(&second, &[draft("x-1"), draft("x-2")])
            .await
            .expect("second import");

        assert_eq!(store.count().await.expect("count"), 2);
        let all = store.get_page(PageRequest::ALL).await.expect("all");
        assert!(all.iter().all(|r| r.import_batch == second.batch_id));
    }

    #[tokio::test]
    async fn append_policy_keeps_duplicates_and_oldest_wins_lookup() {
        let (_dir, store) = five_record_store().await;
        let appended = batch(ImportPolicy::Append);
        store
            .replace_all(&appended, &[draft("ds-1")])
            .await
            .expect("append");

        assert_eq!(store.count().await.expect("count"), 6);
        let found = store.get_by_id("ds-1").await.expect("lookup").expect("present");
        assert_ne!(found.import_batch, appended.batch_id);
    }

    #[tokio::test]
    async fn latest_import_reports_last_committed_batch() {
        let (_dir, store) = five_record_store().await;
        let mut next = batch(ImportPolicy::Append);
        next.unidentified_count = 2;
        store.replace_all(&next, &[draft("y")]).await.expect("import");

        let run = store.latest_import().await.expect("query").expect("run");
        assert_eq!(run.batch_id, next.batch_id);
        assert_eq!(run.record_count, 1);
        assert_eq!(run.unidentified_count, 2);
        assert_eq!(run.policy, ImportPolicy::Append);
    }

    #[tokio::test]
    async fn in_memory_store_survives_across_operations() {
        let store = RecordStore::open("sqlite::memory:").await.expect("open");
        store
            .replace_all(&batch(ImportPolicy::DropAndRecreate), &[draft("m")])
            .await
            .expect("import");
        assert_eq!(store.count().await.expect("count"), 1);
    }

    async fn spawn_catalog_server(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn fetcher_returns_body_bytes() {
        let base = spawn_catalog_server(
            axum::Router::new().route("/data.json", axum::routing::get(|| async { "{\"dataset\":[]}" })),
        )
        .await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let resp = fetcher
            .fetch_bytes(Uuid::new_v4(), &format!("{base}/data.json"))
            .await
            .expect("fetch");
        assert_eq!(resp.body, b"{\"dataset\":[]}");
        assert!(resp.status.is_success());
    }

    #[tokio::test]
    async fn fetcher_rejects_empty_body_and_error_status() {
        let base = spawn_catalog_server(
            axum::Router::new()
                .route("/empty", axum::routing::get(|| async { "" }))
                .route(
                    "/broken",
                    axum::routing::get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
                ),
        )
        .await;
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("client");

        let empty = fetcher.fetch_bytes(Uuid::new_v4(), &format!("{base}/empty")).await;
        assert!(matches!(empty, Err(FetchError::EmptyBody { .. })));

        let broken = fetcher.fetch_bytes(Uuid::new_v4(), &format!("{base}/broken")).await;
        assert!(matches!(broken, Err(FetchError::HttpStatus { status: 502, .. })));

        let err: CatalogError = broken.unwrap_err().into();
        assert_eq!(err.kind(), "network_failure");
    }
}
