//! Completion Detection and Hand-off
//!
//! Decides when a session holds every declared chunk, detaches its bytes
//! under the session lock, and drives the transfer once the lock is gone.

use std::sync::Arc;

use sha2::Digest;

use crate::storage::TransferSink;
use super::buffer::AssembledFile;
use super::session::{SessionStore, UploadSession};
use super::types::{CloseReason, CompletedUpload, SessionStatus, UploadError};

/// Whether every declared chunk has been appended
///
/// The highest-ordinal check guards against a client that inflates
/// `totalChunks` and then stops early.
pub fn is_complete(session: &UploadSession) -> bool {
    session.received_chunks == session.total_chunks
        && session.highest_ordinal == Some(session.total_chunks - 1)
}

/// Transition `Open → Completing` and take ownership of the buffer
///
/// Must run under the session lock, right after a successful append. Returns
/// `None` while chunks are still missing.
pub(super) async fn detach_if_complete(
    session: &mut UploadSession,
) -> Result<Option<AssembledFile>, UploadError> {
    if session.status != SessionStatus::Open || !is_complete(session) {
        return Ok(None);
    }

    session.status = SessionStatus::Completing;

    let buffer = session
        .buffer
        .take()
        .ok_or_else(|| UploadError::Storage("session buffer already released".to_string()))?;
    let sha256 = hex::encode(std::mem::take(&mut session.hasher).finalize());

    let file = buffer
        .into_assembled(session.metadata.clone(), sha256)
        .await?;

    tracing::info!(
        session_id = %session.id,
        file_name = %session.metadata.file_name,
        chunks = session.total_chunks,
        size = file.size,
        "All chunks received, handing off"
    );

    Ok(Some(file))
}

/// Transfer an assembled file and close its session
///
/// Makes at most `1 + retries` transfer attempts. The session is removed
/// whatever the outcome; a failed transfer means the client starts over.
pub async fn hand_off(
    store: &SessionStore,
    sink: &Arc<dyn TransferSink>,
    session_id: &str,
    file: AssembledFile,
    retries: u8,
) -> Result<CompletedUpload, UploadError> {
    let attempts = 1 + u32::from(retries.min(1));
    let mut last_error = None;

    for attempt in 1..=attempts {
        match sink.transfer(&file).await {
            Ok(stored) => {
                tracing::info!(
                    session_id = %session_id,
                    sink = sink.name(),
                    file_id = %stored.id,
                    size = file.size,
                    attempt = attempt,
                    "Transfer complete"
                );
                store.finish(session_id, CloseReason::Success).await;
                return Ok(CompletedUpload {
                    file: stored,
                    size: file.size,
                    sha256: file.sha256.clone(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    sink = sink.name(),
                    attempt = attempt,
                    attempts = attempts,
                    error = %e,
                    "Transfer attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    store.finish(session_id, CloseReason::Failed).await;

    Err(last_error
        .map(UploadError::from)
        .unwrap_or_else(|| UploadError::BackendFailure("no transfer attempted".to_string())))
}
