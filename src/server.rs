//! HTTP surface: `GET /health` and multipart `POST /extract`.
//!
//! A thin layer over [`Pipeline::run`]. Every pipeline failure maps to
//! `400 {"detail": "<message>"}`; the pipeline itself knows nothing about
//! status codes.

use crate::error::Table2JsonError;
use crate::extract::Pipeline;
use crate::output::{ExtractRequest, ExtractResponse};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Uploads larger than this are rejected before reaching the pipeline.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Error body returned with every 400.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Client-facing error: always `400 Bad Request`.
#[derive(Debug)]
pub struct ApiError(String);

impl From<Table2JsonError> for ApiError {
    fn from(e: Table2JsonError) -> Self {
        Self(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Request failed: {}", self.0);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse { detail: self.0 }),
        )
            .into_response()
    }
}

/// Build the router over a shared pipeline.
pub fn router(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract_table))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(pipeline)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(pipeline: Pipeline, addr: SocketAddr) -> Result<(), Table2JsonError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Table2JsonError::Internal(format!("bind {addr}: {e}")))?;
    serve_on(listener, pipeline).await
}

/// Serve on an already-bound listener (lets tests use port 0).
pub async fn serve_on(listener: TcpListener, pipeline: Pipeline) -> Result<(), Table2JsonError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{addr}");
    }
    axum::serve(listener, router(pipeline))
        .await
        .map_err(|e| Table2JsonError::Internal(format!("server: {e}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn extract_table(
    State(pipeline): State<Pipeline>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    let request = read_form(multipart).await?;
    debug!(
        "Extract request: {} image bytes, model={:?}, expected_json={}",
        request.image.len(),
        request.model,
        request.expected_json.is_some()
    );
    Ok(Json(pipeline.run(request).await?))
}

/// Collect the multipart fields into an [`ExtractRequest`].
async fn read_form(mut multipart: Multipart) -> Result<ExtractRequest, ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut request = ExtractRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(format!("Failed to read upload: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(format!("Failed to read image data: {e}")))?;
                image = Some(data.to_vec());
            }
            "model_name" | "table_title_hint" | "expected_json" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError(format!("Failed to read field '{name}': {e}")))?;
                if text.is_empty() {
                    continue;
                }
                match name.as_str() {
                    "model_name" => request.model = Some(text),
                    "table_title_hint" => request.title_hint = Some(text),
                    _ => request.expected_json = Some(text),
                }
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    request.image = image.ok_or_else(|| ApiError("No image provided. Use field name 'image'".into()))?;
    Ok(request)
}
