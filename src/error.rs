//! Error types shared outside the upload protocol
//!
//! Protocol errors live in [`crate::upload::UploadError`]; this module holds
//! the configuration and transfer-sink errors that feed into it.

use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Transfer sink errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Backend rejected upload: {0}")]
    Rejected(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink-level result type
pub type Result<T> = std::result::Result<T, StorageError>;
