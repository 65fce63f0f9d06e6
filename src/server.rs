//! HTTP surface of the question-answering service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ai` | `{query}` → `{answer}`, generator only |
//! | `POST` | `/pdf` | multipart `file` field(s) → per-file status list |
//! | `POST` | `/askpdf` | `{query}` → `{response, sources, function_result?}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid request: query must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `extraction_failed` | 422 |
//! | `index_unavailable` | 503 |
//! | `embedding_failed` | 502 |
//! | `generation_failed` | 502 |
//! | `generation_timeout` | 504 |
//! | `invalid_configuration`, `internal` | 500 |
//!
//! Upload failures are reported per file inside a 200 response; only a
//! request with no `file` field at all is a 400.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::QaError;
use crate::models::{FunctionOutcome, IngestStatus};
use crate::qa::QaService;

const UPLOAD_FIELD: &str = "file";

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<QaService>,
    upload_dir: Arc<PathBuf>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<QaService>, upload_dir: PathBuf, max_upload_bytes: usize) -> Self {
        Self {
            service,
            upload_dir: Arc::new(upload_dir),
            max_upload_bytes,
        }
    }
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ai", post(handle_ai))
        // Size is enforced per file while streaming.
        .route("/pdf", post(handle_pdf).layer(DefaultBodyLimit::disable()))
        .route("/askpdf", post(handle_askpdf))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until the process exits.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Every route but `/ai` embeds, so serving without an embedder is refused.
fn ensure_servable(config: &Config) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!(
            "embedding.provider is 'disabled'; /pdf and /askpdf need an embedding provider"
        );
    }
    Ok(())
}

/// Build the service from `config`, bind `[server].bind` and serve.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    ensure_servable(config)?;
    let service = QaService::from_config(config).await?;

    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "cannot create upload directory {}: {}",
                config.storage.upload_dir.display(),
                e
            )
        })?;

    let state = AppState::new(
        Arc::new(service),
        config.storage.upload_dir.clone(),
        config.storage.max_upload_bytes,
    );

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("askpdf listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    serve(listener, state).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        let status = match &err {
            QaError::Validation(_) => StatusCode::BAD_REQUEST,
            QaError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            QaError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QaError::EmbeddingFailure(_) | QaError::GenerationFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            QaError::GenerationTimeout(_) | QaError::EmbeddingTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            QaError::InvalidConfiguration(_) | QaError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ai and /askpdf ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: String,
}

fn query_from(body: Result<Json<QueryRequest>, JsonRejection>) -> Result<String, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    Ok(request.query)
}

#[derive(Serialize)]
struct AiResponse {
    answer: String,
}

/// `POST /ai`: plain generation, no retrieval.
async fn handle_ai(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AiResponse>, AppError> {
    let query = query_from(body)?;
    let answer = state.service.ask_direct(&query).await?;
    Ok(Json(AiResponse { answer }))
}

#[derive(Serialize)]
struct AskPdfResponse {
    /// Raw generated text, including any directive it contained.
    response: String,
    sources: Vec<(String, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_result: Option<FunctionOutcome>,
}

/// `POST /askpdf`: retrieval-augmented answer.
async fn handle_askpdf(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<AskPdfResponse>, AppError> {
    let query = query_from(body)?;
    let result = state.service.ask(&query).await?;
    Ok(Json(AskPdfResponse {
        sources: result.sources(),
        response: result.answer,
        function_result: result.function_outcome,
    }))
}

// ============ POST /pdf ============

/// Reduce a client-supplied filename to a safe basename.
fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(|c| c == '/' || c == '\\').next()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

async fn save_upload(dir: &Path, filename: &str, data: &[u8]) -> Result<PathBuf, QaError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| QaError::Storage(format!("cannot create {}: {}", dir.display(), e)))?;
    let path = dir.join(filename);
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| QaError::Storage(format!("cannot write {}: {}", path.display(), e)))?;
    Ok(path)
}

/// `POST /pdf`: save and index every `file` part; one status per file.
///
/// Each part is indexed before the next is read, so a later part with the
/// same filename cannot replace a file that has not been indexed yet.
async fn handle_pdf(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Vec<IngestStatus>>, AppError> {
    let mut multipart = multipart.map_err(|e| bad_request(e.body_text()))?;
    let mut statuses = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let mut data = Vec::new();
        let mut too_large = false;
        while let Some(bytes) = field
            .chunk()
            .await
            .map_err(|e| bad_request(e.body_text()))?
        {
            // Keep draining so the next part can be read.
            if too_large || data.len() + bytes.len() > state.max_upload_bytes {
                too_large = true;
                data.clear();
                continue;
            }
            data.extend_from_slice(&bytes);
        }

        let display_name = if raw_name.is_empty() {
            "(unnamed)".to_string()
        } else {
            raw_name.clone()
        };

        let filename = match sanitize_filename(&raw_name) {
            Some(name) => name,
            None => {
                statuses.push(IngestStatus::failed(
                    display_name,
                    "upload has no usable filename",
                ));
                continue;
            }
        };

        if too_large {
            statuses.push(IngestStatus::failed(
                filename,
                format!("file exceeds {} bytes", state.max_upload_bytes),
            ));
            continue;
        }

        let status = match save_upload(&state.upload_dir, &filename, &data).await {
            Ok(path) => state.service.ingest_upload(&filename, &path).await,
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "upload not saved");
                IngestStatus::failed(filename, e.to_string())
            }
        };
        statuses.push(status);
    }

    if statuses.is_empty() {
        return Err(bad_request(format!(
            "no '{}' field in upload",
            UPLOAD_FIELD
        )));
    }

    Ok(Json(statuses))
}
