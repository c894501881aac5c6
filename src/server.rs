//! JSON HTTP API over the store and coordinator.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/spaces` | List spaces |
//! | `POST`   | `/spaces` | Create a space |
//! | `POST`   | `/spaces/{space}/query` | Retrieve and answer |
//! | `POST`   | `/spaces/{space}/documents` | Upload and ingest a document |
//! | `DELETE` | `/spaces/{space}` | Delete a space |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "protected_space", "message": "space 'default' is protected and cannot be deleted" } }
//! ```
//!
//! Status mapping: invalid input, unsupported formats, and the protected
//! space are 400; a space that does not exist or has nothing indexed is
//! 404; upstream timeouts are 408; everything else is 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::chunk::Chunker;
use crate::config::Config;
use crate::coordinator::QueryCoordinator;
use crate::error::RagError;
use crate::ingest;
use crate::models::RetrievalResult;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    coordinator: Arc<QueryCoordinator>,
    chunker: Arc<Chunker>,
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(
    config: Arc<Config>,
    coordinator: Arc<QueryCoordinator>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let chunker = Arc::new(Chunker::new(&config.chunking));
    let state = AppState {
        config,
        coordinator,
        chunker,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state).layer(cors);

    info!("listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/spaces", get(handle_list_spaces).post(handle_create_space))
        .route("/spaces/{space}", delete(handle_delete_space))
        .route("/spaces/{space}/query", post(handle_query))
        .route("/spaces/{space}/documents", post(handle_upload))
        .with_state(state)
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

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            RagError::InvalidInput(_) | RagError::Config(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            RagError::ProtectedSpace(_) => (StatusCode::BAD_REQUEST, "protected_space"),
            RagError::SpaceNotReady(_) => (StatusCode::NOT_FOUND, "space_not_ready"),
            RagError::UpstreamTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
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

// ============ GET /spaces ============

#[derive(Serialize)]
struct SpaceListResponse {
    spaces: Vec<String>,
}

async fn handle_list_spaces(
    State(state): State<AppState>,
) -> Result<Json<SpaceListResponse>, AppError> {
    let spaces = state.coordinator.store().list_spaces().await?;
    Ok(Json(SpaceListResponse { spaces }))
}

// ============ POST /spaces ============

#[derive(Deserialize)]
struct CreateSpaceRequest {
    name: String,
    /// Optional initial documents, indexed at creation time.
    #[serde(default)]
    documents: Vec<DocumentPayload>,
}

#[derive(Deserialize)]
struct DocumentPayload {
    text: String,
    #[serde(default)]
    metadata: crate::models::Metadata,
}

#[derive(Serialize)]
struct CreateSpaceResponse {
    space: String,
    units: usize,
}

async fn handle_create_space(
    State(state): State<AppState>,
    Json(req): Json<CreateSpaceRequest>,
) -> Result<(StatusCode, Json<CreateSpaceResponse>), AppError> {
    let store = state.coordinator.store();
    store.ensure_space(&req.name).await?;

    let inputs: Vec<crate::models::DocumentInput> = req
        .documents
        .into_iter()
        .map(|d| crate::models::DocumentInput::Annotated {
            text: d.text,
            metadata: d.metadata,
        })
        .collect();
    let units = if inputs.is_empty() {
        0
    } else {
        store.add_documents(&req.name, inputs).await?.len()
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateSpaceResponse {
            space: req.name,
            units,
        }),
    ))
}

// ============ POST /spaces/{space}/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct QueryResponse {
    space: String,
    question: String,
    results: Vec<RetrievalResult>,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let results = if state.config.llm.is_enabled() {
        state.coordinator.query(&space, &req.question).await?
    } else {
        state.coordinator.retrieve(&space, &req.question).await?
    };
    Ok(Json(QueryResponse {
        space,
        question: req.question,
        results,
    }))
}

// ============ POST /spaces/{space}/documents ============

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    content_base64: String,
}

#[derive(Serialize)]
struct UploadResponse {
    space: String,
    filename: String,
    units: usize,
}

/// Saves the uploaded file under the data directory, then runs the same
/// ingestion path as the CLI. The format check happens on the filename
/// before any bytes are written.
async fn handle_upload(
    State(state): State<AppState>,
    Path(space): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let filename = sanitize_filename(&req.filename)?;
    crate::loader::file_kind(std::path::Path::new(&filename))?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.content_base64)
        .map_err(|e| bad_request(format!("invalid base64 content: {e}")))?;

    let dir = state.config.store.data_dir.join(&space);
    std::fs::create_dir_all(&dir).map_err(RagError::Io)?;
    let path = dir.join(&filename);
    std::fs::write(&path, &bytes).map_err(RagError::Io)?;

    let units = ingest::ingest_file(
        state.coordinator.store(),
        &state.chunker,
        &space,
        &path,
    )
    .await?;

    // New content invalidates any cached readiness state.
    state.coordinator.invalidate(&space);

    Ok(Json(UploadResponse {
        space,
        filename,
        units,
    }))
}

fn sanitize_filename(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
    {
        return Err(bad_request(format!("invalid filename: '{name}'")));
    }
    Ok(trimmed.to_string())
}

// ============ DELETE /spaces/{space} ============

#[derive(Serialize)]
struct DeleteSpaceResponse {
    deleted: String,
}

async fn handle_delete_space(
    State(state): State<AppState>,
    Path(space): Path<String>,
) -> Result<Json<DeleteSpaceResponse>, AppError> {
    state.coordinator.store().delete_space(&space).await?;
    state.coordinator.invalidate(&space);
    Ok(Json(DeleteSpaceResponse { deleted: space }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let cases = [
            (
                RagError::InvalidInput("x".into()),
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (
                RagError::UnsupportedFormat(".bin".into()),
                StatusCode::BAD_REQUEST,
                "unsupported_format",
            ),
            (
                RagError::ProtectedSpace("default".into()),
                StatusCode::BAD_REQUEST,
                "protected_space",
            ),
            (
                RagError::SpaceNotReady("demo".into()),
                StatusCode::NOT_FOUND,
                "space_not_ready",
            ),
            (
                RagError::UpstreamTimeout {
                    operation: "embedding".into(),
                    seconds: 30,
                },
                StatusCode::REQUEST_TIMEOUT,
                "timeout",
            ),
            (
                RagError::StoreFailed("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];
        for (err, status, code) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }

    #[test]
    fn filename_sanitization() {
        assert!(sanitize_filename("notes.txt").is_ok());
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("a/b.txt").is_err());
        assert!(sanitize_filename("").is_err());
    }
}
