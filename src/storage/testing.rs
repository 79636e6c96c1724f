//! In-memory sink for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{Result, StorageError};
use crate::upload::{AssembledFile, FileMetadata};
use super::sink::TransferSink;
use super::types::{link_for, object_key, StoredFile};

/// One successful transfer
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub metadata: FileMetadata,
    pub data: Vec<u8>,
    pub stored: StoredFile,
}

/// Sink that keeps transferred bytes in memory
///
/// `failing(n)` rejects the first `n` attempts. `gated()` holds every
/// transfer until `release` hands out a permit.
#[derive(Debug, Default)]
pub struct RecordingSink {
    fail_first: usize,
    gate: Option<Semaphore>,
    attempts: AtomicUsize,
    transfers: Mutex<Vec<TransferRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let `n` held transfers proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransferSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn transfer(&self, file: &AssembledFile) -> Result<StoredFile> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| StorageError::Rejected(e.to_string()))?
                .forget();
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(StorageError::Rejected(format!("attempt {} refused", attempt + 1)));
        }

        let data = file.to_bytes().await?.to_vec();
        let key = object_key(
            &file.metadata.destination_folder,
            &format!("t{}", attempt),
            &file.metadata.file_name,
        );
        let stored = StoredFile {
            link: link_for("http://sink.test", &key),
            id: key,
            name: file.metadata.file_name.clone(),
        };

        self.transfers.lock().unwrap().push(TransferRecord {
            metadata: file.metadata.clone(),
            data,
            stored: stored.clone(),
        });

        Ok(stored)
    }
}
