//! Upload types for the chunked upload protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::StoredFile;

// ============================================================================
// Constants
// ============================================================================

/// Longest accepted client-supplied session identifier
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Content type used when neither the client nor the file name tells us one
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ============================================================================
// Session Metadata
// ============================================================================

/// File metadata fixed when a session is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Sanitised file name (no directory components)
    pub file_name: String,

    /// MIME type sent to the backend
    pub mime_type: String,

    /// Backend folder (key prefix) the file is written under
    pub destination_folder: String,
}

impl FileMetadata {
    /// Build metadata from client input, sanitising the name and resolving
    /// a MIME type when none was supplied
    pub fn new(
        file_name: &str,
        mime_type: Option<&str>,
        destination_folder: &str,
    ) -> Result<Self, UploadError> {
        let file_name = sanitize_file_name(file_name)?;

        let destination_folder = destination_folder.trim().trim_matches('/').to_string();
        if destination_folder.is_empty() {
            return Err(UploadError::InvalidRequest(
                "destinationFolder is required".to_string(),
            ));
        }

        let mime_type = match mime_type.map(str::trim) {
            Some(mime) if !mime.is_empty() => mime.to_string(),
            _ => mime_guess::from_path(&file_name)
                .first_raw()
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string(),
        };

        Ok(Self {
            file_name,
            mime_type,
            destination_folder,
        })
    }
}

/// Strip directory components and reject names that end up empty
pub fn sanitize_file_name(raw: &str) -> Result<String, UploadError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(UploadError::InvalidRequest(format!(
            "invalid file name: {raw:?}"
        )));
    }

    Ok(name.to_string())
}

/// Check a client-supplied session identifier
pub fn validate_session_id(session_id: &str) -> Result<(), UploadError> {
    if session_id.is_empty()
        || session_id.len() > MAX_SESSION_ID_LEN
        || session_id.chars().any(char::is_control)
    {
        return Err(UploadError::InvalidRequest(format!(
            "sessionId must be 1-{MAX_SESSION_ID_LEN} printable characters"
        )));
    }
    Ok(())
}

// ============================================================================
// Chunk Types
// ============================================================================

/// One incoming chunk as seen by the receiver
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub session_id: String,
    pub ordinal: u32,
    pub total_chunks: u32,
    /// Required on ordinal 0 when the session does not exist yet
    pub metadata: Option<FileMetadata>,
}

/// Acknowledgment for a chunk that did not complete its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    /// Ordinal that was acknowledged
    pub received: u32,

    /// Chunks still expected before completion
    pub remaining: u32,

    /// True when the ordinal had already been accepted and nothing was appended
    pub duplicate: bool,
}

/// Terminal result of a completed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    #[serde(flatten)]
    pub file: StoredFile,

    /// Assembled size in bytes
    pub size: u64,

    /// Hex SHA-256 of the assembled bytes
    pub sha256: String,
}

/// What the receiver returns for a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadOutcome {
    /// Chunk stored, session still open
    Received(ChunkAck),
    /// Chunk completed the session and the transfer succeeded
    Complete(CompletedUpload),
}

// ============================================================================
// Session State
// ============================================================================

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum SessionStatus {
    /// Accepting chunks
    Open,
    /// Last chunk received, transfer in flight
    Completing,
    /// Terminal; the session is (being) removed from the store
    Closed(CloseReason),
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Success,
    Failed,
    Expired,
    Aborted,
}

/// Point-in-time view of a session for the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub status: SessionStatus,
    pub total_chunks: u32,
    pub received_chunks: u32,
    pub next_ordinal: u32,
    pub received_bytes: u64,
    pub spilled: bool,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Chunk ordinal {ordinal} outside declared range 0..{total_chunks}")]
    InvalidOrdinal { ordinal: u32, total_chunks: u32 },

    #[error("Chunk ordinal {received} out of sequence (expected {expected})")]
    OutOfSequence { expected: u32, received: u32 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Chunk too large: {size} bytes (max: {max})")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("Upload quota exceeded: {size} bytes (max: {max})")]
    QuotaExceeded { size: u64, max: u64 },

    #[error("Session no longer accepts chunks: {0}")]
    SessionClosed(String),

    #[error("Session expired: {0}")]
    Expired(String),

    #[error("Backend transfer failed: {0}")]
    BackendFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::InvalidOrdinal { .. } => StatusCode::BAD_REQUEST,
            Self::OutOfSequence { .. } => StatusCode::BAD_REQUEST,
            Self::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            Self::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SessionClosed(_) => StatusCode::CONFLICT,
            Self::Expired(_) => StatusCode::GONE,
            Self::BackendFailure(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "UNKNOWN_SESSION",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::InvalidOrdinal { .. } | Self::OutOfSequence { .. } => "INVALID_ORDINAL",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::ChunkTooLarge { .. } | Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::Expired(_) => "EXPIRED",
            Self::BackendFailure(_) => "BACKEND_FAILURE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether the client caused this error (4xx) rather than the backend or server
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        Self::BackendFailure(err.to_string())
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
