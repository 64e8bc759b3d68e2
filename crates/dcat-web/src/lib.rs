//! Axum + Askama presentation of the stored catalog.

use std::path::PathBuf;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dcat_core::{CatalogError, DatasetRecord, PageRequest};
use dcat_storage::{RecordStore, StoreError};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "dcat-web";

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub default_page_limit: u32,
    pub assets_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            default_page_limit: 10_000,
            assets_dir: PathBuf::from("web/assets"),
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("DCAT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            default_page_limit: std::env::var("DCAT_DEFAULT_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.default_page_limit),
            assets_dir: std::env::var("DCAT_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
        }
    }
}

/// Immutable state shared by every handler; built once before serving.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: RecordStore,
    pub default_page_limit: u32,
    pub assets_dir: PathBuf,
}

impl AppState {
    pub fn new(store: RecordStore, config: &WebConfig) -> Self {
        Self {
            store,
            default_page_limit: config.default_page_limit,
            assets_dir: config.assets_dir.clone(),
        }
    }
}

/// Raw query strings; unparsable or zero values fall back to defaults.
#[derive(Debug, Deserialize, Default)]
struct DatasetsQuery {
    page: Option<String>,
    limit: Option<String>,
}

impl DatasetsQuery {
    fn page_request(&self, default_limit: u32) -> PageRequest {
        let positive = |raw: &Option<String>| {
            raw.as_deref()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
        };
        PageRequest::new(
            positive(&self.page).unwrap_or(1),
            positive(&self.limit).unwrap_or(default_limit),
        )
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    datasets: Vec<DatasetRecord>,
    total: usize,
    has_latest_import: bool,
    latest_batch: String,
    latest_finished: String,
    latest_source: String,
}

#[derive(Template)]
#[template(path = "details.html")]
struct DetailsTemplate {
    record: DatasetRecord,
    import_batch: String,
}

#[derive(Template)]
#[template(path = "not_found.html")]
struct NotFoundTemplate {
    identifier: String,
}

/// JSON error body for the API routes.
struct ApiError(CatalogError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.kind(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

fn status_for(err: &CatalogError) -> StatusCode {
    match err {
        CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
        CatalogError::MalformedPayload(_) | CatalogError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn app(state: AppState) -> Router {
    let assets = ServeDir::new(&state.assets_dir);
    Router::new()
        .route("/", get(index_handler))
        .route("/details/{id}", get(details_handler))
        .route("/datasets", get(datasets_handler))
        .route("/datasets/{id}", get(dataset_json_handler))
        .route("/health", get(health_handler))
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(addr = %listener.local_addr()?, "serving catalog");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let datasets = match state.store.get_page(PageRequest::ALL).await {
        Ok(rows) => rows,
        Err(err) => return server_error(err.into()),
    };
    let latest = match state.store.latest_import().await {
        Ok(run) => run,
        Err(err) => return server_error(err.into()),
    };
    render_html(IndexTemplate {
        total: datasets.len(),
        datasets,
        has_latest_import: latest.is_some(),
        latest_batch: latest.as_ref().map(|r| r.batch_id.to_string()).unwrap_or_default(),
        latest_finished: latest
            .as_ref()
            .map(|r| r.finished_at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default(),
        latest_source: latest.map(|r| r.source_url).unwrap_or_default(),
    })
}

async fn details_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.get_by_id(&id).await {
        Ok(Some(record)) => render_html(DetailsTemplate {
            import_batch: record.import_batch.to_string(),
            record,
        }),
        Ok(None) => match (NotFoundTemplate { identifier: id }).render() {
            Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
            Err(err) => server_error(CatalogError::Storage(err.to_string())),
        },
        Err(err) => server_error(err.into()),
    }
}

async fn datasets_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DatasetsQuery>,
) -> Result<Json<Vec<DatasetRecord>>, ApiError> {
    let request = query.page_request(state.default_page_limit);
    Ok(Json(state.store.get_page(request).await?))
}

async fn dataset_json_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DatasetRecord>, ApiError> {
    match state.store.get_by_id(&id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError(CatalogError::NotFound(id))),
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.store.count().await?;
    Ok(Json(serde_json::json!({ "status": "ok", "records": records })))
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(CatalogError::Storage(format!("template render failed: {err}"))),
    }
}

fn server_error(err: CatalogError) -> Response {
    error!(error = %err, "page render failed");
    (status_for(&err), Html(format!("Server error: {err}"))).into_response()
}
