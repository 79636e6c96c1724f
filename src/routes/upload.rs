//! Upload Routes
//!
//! HTTP endpoints for chunked and single-shot uploads.
//!
//! Endpoints:
//! - POST /api/upload/chunk?sessionId&ordinal&totalChunks&... - Upload one chunk (raw body)
//! - POST /api/upload - Upload a whole file (multipart)
//! - GET /api/upload/:session_id - Get session status
//! - DELETE /api/upload/:session_id - Abort upload

use axum::{
    body::Body,
    extract::{
        multipart::{Field, Multipart, MultipartRejection},
        rejection::QueryRejection,
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::upload::{
    ChunkRequest, FileMetadata, SessionSnapshot, StagedChunk, UploadError, UploadOutcome,
};

/// Longest accepted non-file multipart field
const MAX_FORM_FIELD_BYTES: u64 = 4096;

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Upload request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Upload request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
///
/// Bodies are size-checked while streaming, so axum's default limit is off.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_file))
        .route("/chunk", post(upload_chunk))
        .route("/:session_id", get(get_session).delete(abort_session))
        .layer(DefaultBodyLimit::disable())
}

// ============================================================================
// Handlers
// ============================================================================

/// Query parameters of a chunk upload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkParams {
    pub session_id: String,
    #[serde(alias = "chunkIndex")]
    pub ordinal: u32,
    pub total_chunks: u32,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    #[serde(alias = "folderId")]
    pub destination_folder: Option<String>,
}

/// POST /api/upload/chunk
///
/// The chunk data is the raw request body. Metadata is read on ordinal 0 only.
async fn upload_chunk(
    State(state): State<AppState>,
    params: Result<Query<ChunkParams>, QueryRejection>,
    body: Body,
) -> Result<Json<UploadOutcome>, UploadError> {
    let Query(params) = params.map_err(|e| UploadError::InvalidRequest(e.body_text()))?;

    let receiver = state.receiver();
    let max = receiver.max_chunk_bytes();
    let payload = read_body(body, max).await?;

    let metadata = match (params.ordinal, &params.file_name, &params.destination_folder) {
        (0, Some(file_name), Some(folder)) => Some(FileMetadata::new(
            file_name,
            params.mime_type.as_deref(),
            folder,
        )?),
        _ => None,
    };

    let outcome = receiver
        .receive(
            ChunkRequest {
                session_id: params.session_id,
                ordinal: params.ordinal,
                total_chunks: params.total_chunks,
                metadata,
            },
            &payload,
        )
        .await?;

    Ok(Json(outcome))
}

/// POST /api/upload
///
/// Single-shot upload. Fields: `file` (required), `folderId` or
/// `destinationFolder` (required), `sessionId` and `mimeType` (optional).
/// Fields may come in any order; the file part is streamed into the upload
/// buffer as it arrives.
async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadOutcome>, UploadError> {
    let mut multipart = multipart.map_err(|e| UploadError::InvalidRequest(e.body_text()))?;
    let receiver = state.receiver();

    let mut file: Option<(String, Option<String>, StagedChunk)> = None;
    let mut folder = None;
    let mut session_id = None;
    let mut mime_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let frames = field.map_err(|e| UploadError::InvalidRequest(e.body_text()));
                let staged = receiver.stage(frames).await?;
                file = Some((file_name, content_type, staged));
            }
            "folderId" | "destinationFolder" => folder = Some(read_text(field).await?),
            "sessionId" => session_id = Some(read_text(field).await?),
            "mimeType" => mime_type = Some(read_text(field).await?),
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let (file_name, content_type, staged) =
        file.ok_or_else(|| UploadError::InvalidRequest("missing file field".to_string()))?;
    let folder = folder.ok_or_else(|| {
        UploadError::InvalidRequest("missing folderId/destinationFolder field".to_string())
    })?;

    let metadata = FileMetadata::new(
        &file_name,
        mime_type.as_deref().or(content_type.as_deref()),
        &folder,
    )?;

    let completed = receiver
        .receive_whole(session_id.filter(|id| !id.is_empty()), metadata, staged)
        .await?;

    Ok(Json(UploadOutcome::Complete(completed)))
}

/// GET /api/upload/:session_id
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, UploadError> {
    Ok(Json(state.store().snapshot(&session_id).await?))
}

/// DELETE /api/upload/:session_id
///
/// Abort an open upload and release its buffer.
async fn abort_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, UploadError> {
    state.store().abort(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

/// Read a chunk body, failing as soon as it passes `max` bytes
async fn read_body(body: Body, max: u64) -> Result<Vec<u8>, UploadError> {
    let mut stream = body.into_data_stream();
    let mut data = Vec::new();

    while let Some(frame) = stream.next().await {
        let frame = frame
            .map_err(|e| UploadError::InvalidRequest(format!("Failed to read body: {}", e)))?;
        let size = (data.len() + frame.len()) as u64;
        if size > max {
            return Err(UploadError::ChunkTooLarge { size, max });
        }
        data.extend_from_slice(&frame);
    }

    Ok(data)
}

/// Read a multipart field, failing with `too_large(size)` once it passes `max` bytes
async fn read_field(
    mut field: Field<'_>,
    max: u64,
    too_large: impl Fn(u64) -> UploadError,
) -> Result<Vec<u8>, UploadError> {
    let mut data = Vec::new();

    while let Some(bytes) = field
        .chunk()
        .await
        .map_err(|e| UploadError::InvalidRequest(e.body_text()))?
    {
        let size = (data.len() + bytes.len()) as u64;
        if size > max {
            return Err(too_large(size));
        }
        data.extend_from_slice(&bytes);
    }

    Ok(data)
}

async fn read_text(field: Field<'_>) -> Result<String, UploadError> {
    let name = field.name().unwrap_or_default().to_string();
    let data = read_field(field, MAX_FORM_FIELD_BYTES, |_| {
        UploadError::InvalidRequest(format!("field {} is too long", name))
    })
    .await?;

    String::from_utf8(data)
        .map(|text| text.trim().to_string())
        .map_err(|_| UploadError::InvalidRequest(format!("field {} is not valid UTF-8", name)))
}

// ============================================================================
// Tests
// ============================================================================
