//! HTTP server for the web client.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | API information |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/generate` | Prompt (plus optional base64 attachment) → docx |
//! | `GET`    | `/download/{filename}` | Fetch a stored docx |
//! | `DELETE` | `/cleanup?max_age_hours=N` | Delete artifacts older than N hours |
//! | `POST`   | `/export` | Editor HTML → stored docx |
//! | `POST`   | `/refine` | Rewrite editor HTML with an instruction |
//! | `POST`   | `/import` | Base64 docx → editor HTML |
//!
//! `generate`, `export`, `refine` and `import` always answer `200` with a
//! result body whose `success` flag tells the client what happened; a
//! failed generation is an expected outcome, not a transport error.
//!
//! # Error Contract
//!
//! The remaining endpoints, and malformed request bodies, answer with:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "File not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # Background sweep
//!
//! When `storage.sweep_interval_secs` is non-zero, a task deletes artifacts
//! older than `storage.retention_hours` on that interval.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::docx::MIME_DOCX;
use crate::models::{
    Attachment, CleanupResult, ErrorKind, GenerationRequest, GenerationResult, ImportResult,
    RefineResult,
};
use crate::oracle::{create_oracle, Oracle};
use crate::service::GenerationService;
use crate::store::StoreError;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<GenerationService>,
}

/// Start the server with the oracle named in the configuration.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let oracle = create_oracle(&config.oracle)?;
    if config.oracle.is_enabled() && config.oracle.resolved_api_key().is_none() {
        tracing::warn!(
            provider = %config.oracle.provider,
            "no oracle API key configured; generation requests will fail"
        );
    }
    run_server_with_oracle(config, oracle).await
}

/// Start the server with a caller-supplied [`Oracle`].
///
/// Used by tests and by binaries that embed a custom provider.
pub async fn run_server_with_oracle(
    config: &Config,
    oracle: Arc<dyn Oracle>,
) -> anyhow::Result<()> {
    let service = Arc::new(GenerationService::new(config, oracle.clone())?);

    if config.storage.sweep_interval_secs > 0 {
        spawn_retention_sweep(
            service.clone(),
            Duration::from_secs(config.storage.sweep_interval_secs),
        );
    }

    let app = router(config, service);
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!(
        addr = %bind_addr,
        oracle = oracle.name(),
        model = oracle.model(),
        storage = %config.storage.dir.display(),
        "server listening"
    );
    println!("docforge listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router over an existing service.
pub fn router(config: &Config, service: Arc<GenerationService>) -> Router {
    // Uploads arrive base64-encoded inside JSON.
    let body_limit = config.storage.max_upload_bytes / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/generate", post(handle_generate))
        .route("/download/{filename}", get(handle_download))
        .route("/cleanup", delete(handle_cleanup))
        .route("/export", post(handle_export))
        .route("/refine", post(handle_refine))
        .route("/import", post(handle_import))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer(&config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

fn spawn_retention_sweep(service: Arc<GenerationService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match service.cleanup(None).await {
                Ok(result) => {
                    tracing::debug!(deleted = result.deleted_count, "retention sweep finished")
                }
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }
    });
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

/// Error type that converts into an Axum HTTP response.
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound | StoreError::InvalidName(_) => not_found("File not found"),
            StoreError::Io { .. } => {
                tracing::error!(error = %err, "storage failure");
                internal("storage failure")
            }
        }
    }
}

/// A handler panic becomes an `internal` error body instead of a dropped
/// connection.
fn panic_response(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "request handler panicked");
    internal("unexpected server error").into_response()
}

fn decode_base64(data: &str) -> Result<Vec<u8>, String> {
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| format!("invalid base64 data: {}", e))
}

// ============ GET / and GET /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "docforge API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /generate": "Generate a DOCX file from a prompt",
            "GET /download/{filename}": "Download a generated file",
            "DELETE /cleanup": "Delete generated files older than max_age_hours",
            "POST /export": "Convert editor HTML into a DOCX file",
            "POST /refine": "Rewrite editor content with an instruction",
            "POST /import": "Convert a DOCX file into editor HTML",
        }
    }))
}

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

// ============ POST /generate ============

#[derive(Deserialize)]
struct GenerateBody {
    prompt: String,
    #[serde(default)]
    attachment: Option<AttachmentBody>,
}

#[derive(Deserialize)]
struct AttachmentBody {
    #[serde(default)]
    filename: Option<String>,
    content_type: String,
    /// Base64-encoded file content.
    data: String,
}

async fn handle_generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<GenerationResult>, AppError> {
    let Json(body) = body?;

    let attachment = match body.attachment {
        Some(a) => match decode_base64(&a.data) {
            Ok(data) => Some(Attachment {
                filename: a.filename,
                content_type: a.content_type,
                data,
            }),
            Err(message) => {
                return Ok(Json(GenerationResult::failure(
                    "Failed to generate document",
                    ErrorKind::Validation,
                    message,
                    None,
                    false,
                )))
            }
        },
        None => None,
    };

    let request = GenerationRequest {
        prompt: body.prompt,
        attachment,
    };
    Ok(Json(state.service.generate(request).await))
}

// ============ GET /download/{filename} ============

async fn handle_download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (name, bytes) = state.service.download(&filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", name);
    Ok((
        [
            (header::CONTENT_TYPE, MIME_DOCX.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ DELETE /cleanup ============

#[derive(Deserialize)]
struct CleanupQuery {
    max_age_hours: Option<u64>,
}

async fn handle_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResult>, AppError> {
    Ok(Json(state.service.cleanup(query.max_age_hours).await?))
}

// ============ POST /export ============

#[derive(Deserialize)]
struct ExportBody {
    html: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_export(
    State(state): State<AppState>,
    body: Result<Json<ExportBody>, JsonRejection>,
) -> Result<Json<GenerationResult>, AppError> {
    let Json(body) = body?;
    Ok(Json(
        state
            .service
            .export(&body.html, body.filename.as_deref())
            .await,
    ))
}

// ============ POST /refine ============

#[derive(Deserialize)]
struct RefineBody {
    content: String,
    instruction: String,
}

async fn handle_refine(
    State(state): State<AppState>,
    body: Result<Json<RefineBody>, JsonRejection>,
) -> Result<Json<RefineResult>, AppError> {
    let Json(body) = body?;
    Ok(Json(
        state.service.refine(&body.content, &body.instruction).await,
    ))
}

// ============ POST /import ============

#[derive(Deserialize)]
struct ImportBody {
    /// Base64-encoded docx.
    data: String,
    #[serde(default)]
    filename: Option<String>,
}

async fn handle_import(
    State(state): State<AppState>,
    body: Result<Json<ImportBody>, JsonRejection>,
) -> Result<Json<ImportResult>, AppError> {
    let Json(body) = body?;
    let result = match decode_base64(&body.data) {
        Ok(data) => {
            let service = state.service.clone();
            tokio::task::spawn_blocking(move || service.import(&data))
                .await
                .map_err(|e| internal(format!("import task failed: {}", e)))?
        }
        Err(message) => ImportResult {
            success: false,
            message: "Failed to import document".to_string(),
            html: None,
            error: Some(message),
        },
    };
    if !result.success {
        tracing::debug!(
            filename = body.filename.as_deref().unwrap_or("-"),
            error = result.error.as_deref().unwrap_or_default(),
            "import rejected"
        );
    }
    Ok(Json(result))
}
