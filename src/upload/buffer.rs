//! Session Buffers
//!
//! Accumulates chunk payloads for one session until hand-off. Bytes live in
//! memory, in a temp file, or in memory until a threshold and then on disk,
//! depending on the configured [`BufferMode`].

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::config::{BufferMode, UploadConfig};
use super::types::{FileMetadata, UploadError};

/// Stream of assembled bytes handed to a transfer sink
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

// ============================================================================
// Buffer Policy
// ============================================================================

/// How new session buffers pick their medium
#[derive(Debug, Clone)]
pub struct BufferPolicy {
    pub mode: BufferMode,
    pub spill_threshold: u64,
    pub spill_dir: PathBuf,
}

impl BufferPolicy {
    pub fn memory() -> Self {
        Self {
            mode: BufferMode::Memory,
            spill_threshold: u64::MAX,
            spill_dir: std::env::temp_dir(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            mode: config.buffer_mode,
            spill_threshold: config.spill_threshold_bytes,
            spill_dir: config.spill_dir.clone(),
        }
    }

    /// Whether a buffer of `len` bytes should live on disk
    fn wants_disk(&self, len: u64) -> bool {
        match self.mode {
            BufferMode::Memory => false,
            BufferMode::Disk => true,
            BufferMode::Hybrid => len > self.spill_threshold,
        }
    }
}

// ============================================================================
// Session Buffer
// ============================================================================

/// Bytes accumulated by one session
pub struct SessionBuffer {
    policy: BufferPolicy,
    len: u64,
    medium: Medium,
}

enum Medium {
    Memory(Vec<u8>),
    Spilled(SpillFile),
}

/// Temp file backing a spilled buffer
///
/// The `NamedTempFile` owns the path and deletes it on drop; `writer` shares
/// the same descriptor.
struct SpillFile {
    temp: NamedTempFile,
    writer: File,
}

impl SpillFile {
    async fn create(dir: &Path) -> Result<Self, UploadError> {
        let dir = dir.to_path_buf();
        let temp = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            tempfile::Builder::new()
                .prefix("upload-")
                .suffix(".part")
                .tempfile_in(&dir)
        })
        .await
        .map_err(|e| UploadError::Storage(format!("spill file task failed: {}", e)))??;

        let writer = File::from_std(temp.as_file().try_clone()?);
        Ok(Self { temp, writer })
    }

    /// Append `data`, truncating back to `committed` bytes if the write fails
    async fn append(&mut self, committed: u64, data: &[u8]) -> Result<(), UploadError> {
        let result = async {
            self.writer.write_all(data).await?;
            self.writer.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(
                path = %self.temp.path().display(),
                error = %e,
                "Spill write failed, rolling back"
            );
            self.writer.set_len(committed).await?;
            self.writer.seek(SeekFrom::Start(committed)).await?;
            return Err(e.into());
        }

        Ok(())
    }
}

impl SessionBuffer {
    pub async fn new(policy: BufferPolicy) -> Result<Self, UploadError> {
        let medium = if policy.wants_disk(0) {
            Medium::Spilled(SpillFile::create(&policy.spill_dir).await?)
        } else {
            Medium::Memory(Vec::new())
        };

        Ok(Self {
            policy,
            len: 0,
            medium,
        })
    }

    /// Accumulated size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the bytes currently live in a temp file
    pub fn is_spilled(&self) -> bool {
        matches!(self.medium, Medium::Spilled(_))
    }

    /// Append a chunk payload
    ///
    /// On error the buffer keeps exactly the bytes it held before the call.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), UploadError> {
        let new_len = self.len + data.len() as u64;

        if let Medium::Memory(bytes) = &mut self.medium {
            if !self.policy.wants_disk(new_len) {
                bytes.extend_from_slice(data);
                self.len = new_len;
                return Ok(());
            }

            // Move what we have so far to disk before appending
            let mut spill = SpillFile::create(&self.policy.spill_dir).await?;
            spill.append(0, bytes).await?;
            tracing::debug!(
                bytes = self.len,
                path = %spill.temp.path().display(),
                "Spilled session buffer to disk"
            );
            self.medium = Medium::Spilled(spill);
        }

        if let Medium::Spilled(spill) = &mut self.medium {
            spill.append(self.len, data).await?;
        }
        self.len = new_len;
        Ok(())
    }

    /// Detach the accumulated bytes for hand-off
    pub async fn into_assembled(
        self,
        metadata: FileMetadata,
        sha256: String,
    ) -> Result<AssembledFile, UploadError> {
        let content = match self.medium {
            Medium::Memory(bytes) => AssembledContent::Memory(Bytes::from(bytes)),
            Medium::Spilled(mut spill) => {
                spill.writer.flush().await?;
                AssembledContent::Spilled(spill.temp)
            }
        };

        Ok(AssembledFile {
            metadata,
            size: self.len,
            sha256,
            content,
        })
    }
}

// ============================================================================
// Staged Chunk
// ============================================================================

/// A chunk payload accumulated before its session exists
///
/// Single-shot uploads stream into one of these while the rest of the form is
/// still arriving; the session then adopts the buffer without copying it.
pub struct StagedChunk {
    pub(super) buffer: SessionBuffer,
    pub(super) hasher: Sha256,
}

impl StagedChunk {
    pub async fn new(policy: BufferPolicy) -> Result<Self, UploadError> {
        Ok(Self {
            buffer: SessionBuffer::new(policy).await?,
            hasher: Sha256::new(),
        })
    }

    /// Append one frame of the payload
    pub async fn append(&mut self, data: &[u8]) -> Result<(), UploadError> {
        self.buffer.append(data).await?;
        self.hasher.update(data);
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_spilled(&self) -> bool {
        self.buffer.is_spilled()
    }
}

// ============================================================================
// Assembled File
// ============================================================================

/// A completed session's bytes, owned by the hand-off
///
/// Dropping it releases the memory or deletes the temp file.
pub struct AssembledFile {
    pub metadata: FileMetadata,
    pub size: u64,
    pub sha256: String,
    content: AssembledContent,
}

/// Where the assembled bytes live
pub enum AssembledContent {
    Memory(Bytes),
    Spilled(NamedTempFile),
}

impl AssembledFile {
    /// Wrap bytes that are already in memory
    pub fn from_bytes(metadata: FileMetadata, bytes: Bytes) -> Self {
        Self {
            metadata,
            size: bytes.len() as u64,
            sha256: compute_hash(&bytes),
            content: AssembledContent::Memory(bytes),
        }
    }

    pub fn content(&self) -> &AssembledContent {
        &self.content
    }

    /// Path of the temp file, when spilled
    pub fn path(&self) -> Option<&Path> {
        match &self.content {
            AssembledContent::Memory(_) => None,
            AssembledContent::Spilled(temp) => Some(temp.path()),
        }
    }

    /// Open a fresh stream over the assembled bytes
    ///
    /// Each call starts from the first byte, so a failed transfer can be retried.
    pub async fn open_stream(&self) -> std::io::Result<ByteStream> {
        match &self.content {
            AssembledContent::Memory(bytes) => {
                let bytes = bytes.clone();
                Ok(stream::once(async move { Ok::<_, std::io::Error>(bytes) }).boxed())
            }
            AssembledContent::Spilled(temp) => {
                let file = File::open(temp.path()).await?;
                Ok(ReaderStream::new(file).boxed())
            }
        }
    }

    /// Read the whole file into memory
    pub async fn to_bytes(&self) -> std::io::Result<Bytes> {
        match &self.content {
            AssembledContent::Memory(bytes) => Ok(bytes.clone()),
            AssembledContent::Spilled(temp) => Ok(Bytes::from(tokio::fs::read(temp.path()).await?)),
        }
    }
}

impl std::fmt::Debug for AssembledFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledFile")
            .field("metadata", &self.metadata)
            .field("size", &self.size)
            .field("sha256", &self.sha256)
            .field("spilled", &self.path().is_some())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
