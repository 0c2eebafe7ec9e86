//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/document/upload` | Multipart upload, repeated `files` field |
//! | `GET`  | `/document/list` | Paged upload ledger (`page`, `page_size`) |
//! | `POST` | `/document/parse` | Extract + index by `doc_id` or `doc_hash` |
//! | `GET`  | `/knowledge/doc-vector` | Vector records for `doc_hashes=h1,h2` |
//! | `GET`  | `/knowledge/similarity` | Nearest records for `text` |
//! | `POST` | `/knowledge/chat` | Retrieval-augmented answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Envelope
//!
//! Every response body is `{ "code": <int>, "msg": <payload> }`. On success
//! `code` is 0 and `msg` carries the result. Failures, including malformed
//! query strings and JSON bodies, carry a nonzero category code, the error
//! message as `msg`, and a matching HTTP status:
//!
//! | Code | Meaning | Status |
//! |------|---------|--------|
//! | 1 | invalid input or rejected file | 400 |
//! | 2 | unknown document or missing file | 404 |
//! | 3 | backend unavailable | 503 |
//! | 4 | configuration error | 500 |
//! | 5 | no usable plugin | 422 / 500 |
//! | 6 | backend or internal failure | 502 / 500 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ragdoc_core::error::Error;
use ragdoc_core::models::DocumentSelector;
use ragdoc_core::prompt::ChatMessage;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app::App;
use crate::ingest::{UploadFile, DEFAULT_PAGE_SIZE};

/// Multipart field carrying uploaded files.
const UPLOAD_FIELD: &str = "files";

/// Starts the HTTP server on `[server].bind` and runs until the process ends.
pub async fn run_server(app: App) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("ragdoc listening on http://{}", bind_addr);
    axum::serve(listener, router(app)).await?;
    Ok(())
}

pub fn router(app: App) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = usize::try_from(app.config.storage.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(8);

    Router::new()
        .route("/document/upload", post(handle_upload))
        .route("/document/list", get(handle_list))
        .route("/document/parse", post(handle_parse))
        .route("/knowledge/doc-vector", get(handle_doc_vector))
        .route("/knowledge/similarity", get(handle_similarity))
        .route("/knowledge/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(app)
}

// ============ Envelope ============

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i32,
    pub msg: T,
}

fn ok<T: Serialize>(msg: T) -> Json<Envelope<T>> {
    Json(Envelope { code: 0, msg })
}

/// Converts pipeline errors into an enveloped HTTP response.
struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        Self(Error::InvalidRequest(rejection.body_text()))
    }
}

/// `Json` whose rejection is enveloped like every other failure.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
struct ApiJson<T>(T);

/// `Query` whose rejection is enveloped like every other failure.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
struct ApiQuery<T>(T);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::TransientBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::PluginNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Backend(_) | Error::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            Error::PermanentConfig(_)
            | Error::PluginInitFailed { .. }
            | Error::Extraction(_)
            | Error::Store(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Envelope {
            code: self.0.envelope_code(),
            msg: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, AppError>;

// ============ /document ============

async fn handle_upload(
    State(app): State<App>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<crate::ingest::UploadReport> {
    let mut multipart = multipart?;
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("multipart: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidRequest(format!("multipart: {e}")))?;
        files.push(UploadFile {
            file_name,
            data: data.to_vec(),
        });
    }
    if files.is_empty() {
        return Err(Error::InvalidRequest(format!("no '{UPLOAD_FIELD}' field in upload")).into());
    }
    Ok(ok(app.documents.upload_documents(files).await))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<u32>,
    page_size: Option<u32>,
    /// Same as `page_size`; the listing reports it under this name.
    page_count: Option<u32>,
}

async fn handle_list(
    State(app): State<App>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<crate::ingest::DocumentListing> {
    let page = params.page.unwrap_or(1);
    let page_size = params
        .page_size
        .or(params.page_count)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(ok(app.documents.list_documents(page, page_size).await?))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ParseRequest {
    doc_id: Option<OneOrMany<i64>>,
    doc_hash: Option<OneOrMany<String>>,
}

async fn handle_parse(
    State(app): State<App>,
    ApiJson(req): ApiJson<ParseRequest>,
) -> ApiResult<crate::ingest::ParseReport> {
    let ids = req.doc_id.map(OneOrMany::into_vec).unwrap_or_default();
    let hashes = req.doc_hash.map(OneOrMany::into_vec).unwrap_or_default();
    let selector = DocumentSelector::from_parts(ids, hashes)
        .ok_or_else(|| Error::InvalidRequest("doc_id or doc_hash is required".into()))?;
    Ok(ok(app.documents.parse_documents(&selector).await?))
}

// ============ /knowledge ============

#[derive(Debug, Deserialize)]
struct DocVectorParams {
    doc_hashes: String,
}

async fn handle_doc_vector(
    State(app): State<App>,
    ApiQuery(params): ApiQuery<DocVectorParams>,
) -> ApiResult<Vec<ragdoc_core::models::VectorRecord>> {
    let hashes: Vec<String> = params
        .doc_hashes
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();
    Ok(ok(app.documents.get_vectors(&hashes).await?))
}

#[derive(Debug, Deserialize)]
struct SimilarityParams {
    text: String,
}

async fn handle_similarity(
    State(app): State<App>,
    ApiQuery(params): ApiQuery<SimilarityParams>,
) -> ApiResult<Vec<ragdoc_core::models::QueryHit>> {
    Ok(ok(app.documents.search_similar(&params.text).await?))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    contexts: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(
    State(app): State<App>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let answer = app.retrieval.answer(&req.question, &req.contexts).await?;
    Ok(ok(ChatResponse { answer }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<Envelope<HealthResponse>> {
    ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
