//! S3-compatible transfer sink
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{S3Config, S3Provider};
use crate::error::{Result, StorageError};
use crate::upload::{AssembledContent, AssembledFile};
use super::sink::TransferSink;
use super::types::{link_for, object_key, StoredFile};

/// S3-compatible storage sink
#[derive(Clone)]
pub struct S3Sink {
    client: Client,
    bucket: String,
    /// Base for view links, without a trailing slash
    link_base: String,
}

impl S3Sink {
    /// Create a new S3 sink from configuration
    pub async fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "upload-relay",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| default_region(config.provider).to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!(provider = ?config.provider, "Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt uploads anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self {
            client,
            link_base: link_base(config),
            bucket,
        })
    }

    async fn body(file: &AssembledFile) -> Result<ByteStream> {
        match file.content() {
            AssembledContent::Memory(bytes) => Ok(ByteStream::from(bytes.clone())),
            AssembledContent::Spilled(temp) => ByteStream::from_path(temp.path())
                .await
                .map_err(|e| StorageError::SdkError(format!("Failed to open spill file: {}", e))),
        }
    }
}

#[async_trait]
impl TransferSink for S3Sink {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn transfer(&self, file: &AssembledFile) -> Result<StoredFile> {
        let key = object_key(
            &file.metadata.destination_folder,
            &Uuid::new_v4().to_string(),
            &file.metadata.file_name,
        );

        let size = i64::try_from(file.size)
            .map_err(|_| StorageError::Rejected(format!("file too large: {} bytes", file.size)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(&file.metadata.mime_type)
            .content_length(size)
            .body(Self::body(file).await?)
            .send()
            .await
            .map_err(|e| {
                let failure = PutFailure {
                    code: e.as_service_error().and_then(|err| err.code()),
                    status: e.raw_response().map(|raw| raw.status().as_u16()),
                    unreachable: matches!(e, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)),
                };
                failure.into_error(&self.bucket, &key, DisplayErrorContext(&e).to_string())
            })?;

        tracing::debug!(bucket = %self.bucket, key = %key, size = file.size, "Put object");

        Ok(StoredFile {
            link: link_for(&self.link_base, &key),
            id: key,
            name: file.metadata.file_name.clone(),
        })
    }
}

/// What the SDK reported about a failed put
struct PutFailure<'a> {
    /// Service error code such as `NoSuchBucket`
    code: Option<&'a str>,
    /// HTTP status, when a response arrived
    status: Option<u16>,
    /// The request never got an answer (dispatch failure or timeout)
    unreachable: bool,
}

impl PutFailure<'_> {
    fn into_error(self, bucket: &str, key: &str, detail: String) -> StorageError {
        if self.unreachable {
            return StorageError::ConnectionFailed(format!("put {}: {}", key, detail));
        }

        match (self.code, self.status) {
            (Some("NoSuchBucket"), _) => StorageError::BucketNotFound(bucket.to_string()),
            (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _)
            | (_, Some(403)) => StorageError::AccessDenied(format!("put {}: {}", key, detail)),
            (_, Some(status)) if (400..500).contains(&status) => {
                StorageError::Rejected(format!("put {} ({}): {}", key, status, detail))
            }
            _ => StorageError::SdkError(format!("Failed to put object {}: {}", key, detail)),
        }
    }
}

fn default_region(provider: S3Provider) -> &'static str {
    match provider {
        S3Provider::R2 => "auto",
        S3Provider::Minio | S3Provider::S3 | S3Provider::B2 => "us-east-1",
    }
}

/// Public URL if configured, otherwise the path-style bucket URL
fn link_base(config: &S3Config) -> String {
    match &config.public_url {
        Some(url) if !url.trim().is_empty() => url.trim_end_matches('/').to_string(),
        _ => format!(
            "{}/{}",
            config.endpoint.trim_end_matches('/'),
            config.bucket
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(public_url: Option<&str>) -> S3Config {
        S3Config {
            provider: S3Provider::Minio,
            endpoint: "http://localhost:9000/".to_string(),
            bucket: "uploads".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            region: None,
            public_url: public_url.map(str::to_string),
        }
    }

    #[test]
    fn test_link_base_defaults_to_bucket_url() {
        assert_eq!(link_base(&config(None)), "http://localhost:9000/uploads");
        assert_eq!(link_base(&config(Some(""))), "http://localhost:9000/uploads");
    }

    #[test]
    fn test_link_base_prefers_public_url() {
        assert_eq!(
            link_base(&config(Some("https://files.example.com/"))),
            "https://files.example.com"
        );
    }

    #[test]
    fn test_default_region() {
        assert_eq!(default_region(S3Provider::R2), "auto");
        assert_eq!(default_region(S3Provider::Minio), "us-east-1");
    }

    fn failure(code: Option<&str>, status: Option<u16>) -> PutFailure<'_> {
        PutFailure {
            code,
            status,
            unreachable: false,
        }
    }

    #[test]
    fn test_put_failure_uses_error_code() {
        let err = failure(Some("NoSuchBucket"), Some(404)).into_error("uploads", "k", String::new());
        assert!(matches!(err, StorageError::BucketNotFound(bucket) if bucket == "uploads"));

        let err = failure(Some("AccessDenied"), Some(403)).into_error("uploads", "k", String::new());
        assert!(matches!(err, StorageError::AccessDenied(_)));

        let err = failure(None, Some(403)).into_error("uploads", "k", String::new());
        assert!(matches!(err, StorageError::AccessDenied(_)));
    }

    #[test]
    fn test_put_failure_ignores_message_text() {
        // Key and detail mention 403 and AccessDenied, the service said 500
        let err = failure(Some("InternalError"), Some(500)).into_error(
            "uploads",
            "inbox/403/AccessDenied.txt",
            "service error: InternalError for inbox/403/AccessDenied.txt".to_string(),
        );
        assert!(matches!(err, StorageError::SdkError(_)));
    }

    #[test]
    fn test_put_failure_client_errors_and_transport() {
        let err = failure(Some("EntityTooLarge"), Some(400)).into_error("uploads", "k", String::new());
        assert!(matches!(err, StorageError::Rejected(_)));

        let err = PutFailure {
            code: None,
            status: None,
            unreachable: true,
        }
        .into_error("uploads", "k", "dispatch failure".to_string());
        assert!(matches!(err, StorageError::ConnectionFailed(_)));

        let err = failure(None, None).into_error("uploads", "k", String::new());
        assert!(matches!(err, StorageError::SdkError(_)));
    }
}
