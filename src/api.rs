//! HTTP surface for the document search service.
//!
//! The router exposes a small set of endpoints:
//!
//! - `GET /` and `GET /health` – static liveness responses.
//! - `POST /upload` – multipart upload (field `file`) that extracts, chunks, embeds, and indexes
//!   a document, then archives the original.
//! - `GET /query` – similarity search over indexed chunks (`q`, optional `limit`).
//! - `GET /chunks` – index-wide vector counts.
//! - `GET /stats` – index statistics including dimension.
//!
//! Every failure is rendered as `{"detail": "<message>"}`.

use crate::index::NamespaceStats;
use crate::processing::{
    DocumentApi, FileKind, MAX_QUERY_LIMIT, ProcessingError, SearchHit, UploadedFile,
};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Query, State,
        multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

const DEFAULT_QUERY_LIMIT: usize = 10;
const DEFAULT_CHUNK_LIMIT: usize = 100;
const MAX_CHUNK_LIMIT: usize = 1000;
const UPLOAD_FIELD: &str = "file";

/// Build the HTTP router, capping request bodies at `max_upload_bytes`.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: DocumentApi + 'static,
{
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/upload", post(upload_document::<S>))
        .route("/query", get(query_documents::<S>))
        .route("/chunks", get(list_chunks::<S>))
        .route("/stats", get(index_stats::<S>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(service)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Docsearch Backend API" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Success response for `POST /upload`.
#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    filename: String,
    documents_processed: usize,
    chunks_created: usize,
    file_type: &'static str,
    s3_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s3_error: Option<String>,
}

/// Accept a multipart upload and run it through the ingestion pipeline.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError>
where
    S: DocumentApi,
{
    let mut multipart = multipart.map_err(|rejection| {
        AppError::new(rejection.status(), rejection.body_text())
    })?;
    let file = read_upload(&mut multipart).await?;
    let filename = file.filename.clone();

    let outcome = service.ingest(file).await.map_err(|error| {
        tracing::error!(filename = %filename, error = %error, "Error processing file");
        AppError::processing("Error processing file", error)
    })?;

    tracing::info!(
        filename = %outcome.filename,
        documents = outcome.documents_processed,
        chunks = outcome.chunks_created,
        archived = outcome.archive_url.is_some(),
        "Upload completed"
    );
    let warning = outcome.warning();
    Ok(Json(UploadResponse {
        message: "File uploaded and processed successfully",
        filename: outcome.filename,
        documents_processed: outcome.documents_processed,
        chunks_created: outcome.chunks_created,
        file_type: outcome.file_type,
        s3_url: outcome.archive_url,
        warning,
        s3_error: outcome.archive_error,
    }))
}

/// Pull the `file` field out of the multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::new(error.status(), error.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field.file_name().map(sanitize_filename).unwrap_or_default();
        if filename.is_empty() {
            return Err(AppError::bad_request("No filename provided"));
        }
        FileKind::from_filename(&filename)
            .map_err(|error| AppError::bad_request(error.to_string()))?;
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|error| AppError::new(error.status(), error.body_text()))?;
        return Ok(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Err(AppError::bad_request("No file provided"))
}

/// Reduce a client-declared filename to its final path component.
fn sanitize_filename(raw: &str) -> String {
    raw.rsplit(['/', '\\']).next().unwrap_or_default().trim().to_string()
}

/// Apply the default when absent and clamp into `[1, max]`; negative values clamp to 1.
fn clamp_limit(requested: Option<i64>, default: usize, max: usize) -> usize {
    match requested {
        None => default,
        Some(value) => usize::try_from(value.max(1)).map_or(max, |value| value.min(max)),
    }
}

/// Query string for `GET /query`.
#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<i64>,
}

/// Response body for `GET /query`.
#[derive(Serialize)]
struct SearchResponse {
    query: String,
    results: Vec<SearchResult>,
    total_results: usize,
}

#[derive(Serialize)]
struct SearchResult {
    id: String,
    text: String,
    score: f32,
    metadata: Map<String, Value>,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            text: hit.text,
            score: hit.score,
            metadata: hit.metadata,
        }
    }
}

/// Similarity search over indexed chunks.
async fn query_documents<S>(
    State(service): State<Arc<S>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: DocumentApi,
{
    let Query(params) =
        params.map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
    let query = params
        .q
        .ok_or_else(|| AppError::bad_request("Missing required query parameter 'q'"))?;
    let limit = clamp_limit(params.limit, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT);

    let hits = service.search(&query, limit).await.map_err(|error| {
        tracing::error!(error = %error, "Error querying documents");
        AppError::internal("Error querying documents", error)
    })?;

    let results: Vec<SearchResult> = hits.into_iter().map(SearchResult::from).collect();
    Ok(Json(SearchResponse {
        query,
        total_results: results.len(),
        results,
    }))
}

/// Query string for `GET /chunks`.
#[derive(Deserialize)]
struct ChunkParams {
    limit: Option<i64>,
}

/// Response body for `GET /chunks`.
#[derive(Serialize)]
struct ChunksResponse {
    total_vectors: u64,
    index_fullness: f64,
    namespaces: BTreeMap<String, NamespaceStats>,
    note: &'static str,
}

/// Summarize stored chunks; the index exposes counts rather than a listing.
async fn list_chunks<S>(
    State(service): State<Arc<S>>,
    params: Result<Query<ChunkParams>, QueryRejection>,
) -> Result<Json<ChunksResponse>, AppError>
where
    S: DocumentApi,
{
    let Query(params) =
        params.map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;
    let limit = clamp_limit(params.limit, DEFAULT_CHUNK_LIMIT, MAX_CHUNK_LIMIT);
    tracing::debug!(limit, "Listing chunks");

    let stats = service.index_stats().await.map_err(|error| {
        tracing::error!(error = %error, "Error listing chunks");
        AppError::internal("Error listing chunks", error)
    })?;

    Ok(Json(ChunksResponse {
        total_vectors: stats.total_vector_count,
        index_fullness: stats.index_fullness,
        namespaces: stats.namespaces,
        note: "Use /query endpoint to search specific chunks",
    }))
}

/// Index statistics tagged with the index name.
async fn index_stats<S>(State(service): State<Arc<S>>) -> Result<Json<Value>, AppError>
where
    S: DocumentApi,
{
    let stats = service.index_stats().await.map_err(|error| {
        tracing::error!(error = %error, "Error getting index stats");
        AppError::internal("Error getting stats", error)
    })?;
    Ok(Json(json!({
        "index_name": service.index_name(),
        "stats": stats,
    })))
}

/// Error rendered as `{"detail": ...}` with the chosen status.
struct AppError {
    status: StatusCode,
    detail: String,
}

impl AppError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    fn internal(context: &str, error: impl Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{context}: {error}"))
    }

    fn processing(context: &str, error: ProcessingError) -> Self {
        if error.is_client_error() {
            Self::bad_request(error.to_string())
        } else {
            Self::internal(context, error)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
