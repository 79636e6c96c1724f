//! Chunk Receiver
//!
//! Entry point for chunked and single-shot uploads: validates requests,
//! creates sessions on ordinal 0, appends, and hands completed sessions to
//! the transfer sink.

use std::sync::Arc;

use axum::body::Bytes;
use futures::{pin_mut, Stream, TryStreamExt};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::storage::TransferSink;
use super::buffer::StagedChunk;
use super::completion;
use super::session::{Appended, SessionStore};
use super::types::{
    validate_session_id, ChunkRequest, CompletedUpload, FileMetadata, UploadError,
    UploadOutcome,
};

/// Validates chunks and drives sessions to completion
#[derive(Clone)]
pub struct ChunkReceiver {
    store: SessionStore,
    sink: Arc<dyn TransferSink>,
    max_chunk_bytes: u64,
    max_upload_bytes: u64,
    transfer_retries: u8,
}

impl ChunkReceiver {
    pub fn new(store: SessionStore, sink: Arc<dyn TransferSink>, config: &UploadConfig) -> Self {
        Self {
            store,
            sink,
            max_chunk_bytes: config.max_chunk_bytes,
            max_upload_bytes: config.max_upload_bytes,
            transfer_retries: config.transfer_retries.min(1),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Per-chunk payload ceiling
    pub fn max_chunk_bytes(&self) -> u64 {
        self.max_chunk_bytes
    }

    /// Ceiling for a whole upload (and a single-shot payload)
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Accept one chunk of a chunked upload
    pub async fn receive(
        &self,
        chunk: ChunkRequest,
        payload: &[u8],
    ) -> Result<UploadOutcome, UploadError> {
        validate_session_id(&chunk.session_id)?;

        if chunk.total_chunks == 0 {
            return Err(UploadError::InvalidRequest(
                "totalChunks must be at least 1".to_string(),
            ));
        }

        if chunk.ordinal >= chunk.total_chunks {
            return Err(UploadError::InvalidOrdinal {
                ordinal: chunk.ordinal,
                total_chunks: chunk.total_chunks,
            });
        }

        let size = payload.len() as u64;
        if size > self.max_chunk_bytes {
            return Err(UploadError::ChunkTooLarge {
                size,
                max: self.max_chunk_bytes,
            });
        }

        if chunk.ordinal == 0 && !self.store.contains(&chunk.session_id).await {
            let metadata = chunk.metadata.clone().ok_or_else(|| {
                UploadError::InvalidRequest(
                    "fileName and destinationFolder are required on chunk 0".to_string(),
                )
            })?;

            match self
                .store
                .create(&chunk.session_id, metadata, chunk.total_chunks)
                .await
            {
                // A concurrent chunk 0 won the race; append decides what this one is
                Ok(()) | Err(UploadError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let appended = self
            .store
            .append(&chunk.session_id, chunk.ordinal, chunk.total_chunks, payload)
            .await?;

        match appended {
            Appended::Progress(ack) => Ok(UploadOutcome::Received(ack)),
            Appended::Complete(file) => {
                let completed = completion::hand_off(
                    &self.store,
                    &self.sink,
                    &chunk.session_id,
                    file,
                    self.transfer_retries,
                )
                .await?;
                Ok(UploadOutcome::Complete(completed))
            }
        }
    }

    /// Stream a single-shot payload into a buffer ahead of its session
    ///
    /// Frames go straight to the store's buffer medium, so a large file
    /// spills to disk instead of growing in memory. Stops at the first frame
    /// that would pass `max_upload_bytes`.
    pub async fn stage<S>(&self, frames: S) -> Result<StagedChunk, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>>,
    {
        pin_mut!(frames);
        let mut staged = self.store.stage().await?;

        while let Some(frame) = frames.try_next().await? {
            let size = staged.len() + frame.len() as u64;
            if size > self.max_upload_bytes {
                return Err(UploadError::QuotaExceeded {
                    size,
                    max: self.max_upload_bytes,
                });
            }
            staged.append(&frame).await?;
        }

        Ok(staged)
    }

    /// Accept a whole file in one request
    ///
    /// Runs as a fresh one-chunk session that adopts the staged payload; an
    /// existing session with the same ID is an error rather than a
    /// continuation.
    pub async fn receive_whole(
        &self,
        session_id: Option<String>,
        metadata: FileMetadata,
        payload: StagedChunk,
    ) -> Result<CompletedUpload, UploadError> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        validate_session_id(&session_id)?;

        let size = payload.len();
        if size > self.max_upload_bytes {
            return Err(UploadError::QuotaExceeded {
                size,
                max: self.max_upload_bytes,
            });
        }

        self.store.create(&session_id, metadata, 1).await?;

        let appended = match self.store.append_staged(&session_id, payload).await {
            Ok(appended) => appended,
            Err(e) => {
                // Nothing else can complete this session
                let _ = self.store.abort(&session_id).await;
                return Err(e);
            }
        };

        match appended {
            Appended::Complete(file) => {
                completion::hand_off(
                    &self.store,
                    &self.sink,
                    &session_id,
                    file,
                    self.transfer_retries,
                )
                .await
            }
            // A second request for this ID slipped in between create and append
            Appended::Progress(_) => Err(UploadError::SessionClosed(session_id)),
        }
    }
}
