//! Transfer sinks for completed uploads
//!
//! Supports MinIO, Cloudflare R2, Backblaze B2, and AWS S3 through the S3
//! API, plus a local directory sink for development.

mod local;
mod s3_client;
mod sink;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use local::LocalSink;
pub use s3_client::S3Sink;
pub use sink::TransferSink;
pub use types::*;
