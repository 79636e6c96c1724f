//! Local directory sink
//!
//! Writes completed uploads under a root directory using the same key layout
//! as the S3 sink. Meant for development and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::LocalSinkConfig;
use crate::error::Result;
use crate::upload::AssembledFile;
use super::sink::TransferSink;
use super::types::{link_for, object_key, StoredFile};

/// Sink that writes files to a local directory
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
    base_url: String,
}

impl LocalSink {
    pub fn new(config: &LocalSinkConfig) -> Self {
        Self {
            root: config.root.clone(),
            base_url: config.base_url.clone(),
        }
    }

    async fn write(&self, path: &Path, file: &AssembledFile) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut out = File::create(path).await?;
        let mut stream = file.open_stream().await?;
        while let Some(bytes) = stream.try_next().await? {
            out.write_all(&bytes).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TransferSink for LocalSink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn transfer(&self, file: &AssembledFile) -> Result<StoredFile> {
        let key = object_key(
            &file.metadata.destination_folder,
            &Uuid::new_v4().to_string(),
            &file.metadata.file_name,
        );
        let path = self.root.join(&key);

        if let Err(e) = self.write(&path, file).await {
            // Leave nothing half-written behind
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }

        tracing::debug!(path = %path.display(), size = file.size, "Wrote file to local sink");

        Ok(StoredFile {
            link: link_for(&self.base_url, &key),
            id: key,
            name: file.metadata.file_name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::FileMetadata;
    use axum::body::Bytes;
    use tempfile::TempDir;

    fn sink(root: &Path) -> LocalSink {
        LocalSink::new(&LocalSinkConfig {
            root: root.to_path_buf(),
            base_url: "http://localhost:3000/files/".to_string(),
        })
    }

    #[tokio::test]
    async fn test_transfer_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let sink = sink(temp_dir.path());

        let metadata = FileMetadata::new("hello world.txt", None, "team/notes").unwrap();
        let file = AssembledFile::from_bytes(metadata, Bytes::from_static(b"Hello, World!"));

        let stored = sink.transfer(&file).await.unwrap();

        assert_eq!(stored.name, "hello world.txt");
        assert!(stored.id.starts_with("team/notes/"));
        assert!(stored.id.ends_with("/hello world.txt"));
        assert!(stored.link.starts_with("http://localhost:3000/files/team/notes/"));
        assert!(stored.link.ends_with("/hello%20world.txt"));

        let written = std::fs::read(temp_dir.path().join(&stored.id)).unwrap();
        assert_eq!(written, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_each_transfer_gets_its_own_key() {
        let temp_dir = TempDir::new().unwrap();
        let sink = sink(temp_dir.path());

        let metadata = FileMetadata::new("same.txt", None, "inbox").unwrap();
        let file = AssembledFile::from_bytes(metadata, Bytes::from_static(b"x"));

        let first = sink.transfer(&file).await.unwrap();
        let second = sink.transfer(&file).await.unwrap();
        assert_ne!(first.id, second.id);
    }
}
