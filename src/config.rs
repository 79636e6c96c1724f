//! Configuration management for the upload relay

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub sink: SinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Limits and buffering policy for upload sessions
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted payload for a single chunk
    pub max_chunk_bytes: u64,
    /// Largest accumulated size of one session (and of a single-shot upload)
    pub max_upload_bytes: u64,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub buffer_mode: BufferMode,
    /// Hybrid mode moves a session to disk once it grows past this size
    pub spill_threshold_bytes: u64,
    pub spill_dir: PathBuf,
    /// Extra transfer attempts after a failed hand-off (0 or 1)
    pub transfer_retries: u8,
}

/// Where session bytes accumulate until hand-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferMode {
    Memory,
    Disk,
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    S3(S3Config),
    Local(LocalSinkConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub provider: S3Provider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Base URL used to build view links; defaults to `{endpoint}/{bucket}`
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum S3Provider {
    Minio,
    R2,
    S3,
    B2,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSinkConfig {
    pub root: PathBuf,
    pub base_url: String,
}

impl UploadConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_chunk_bytes: 10 * MIB,
            max_upload_bytes: 100 * MIB,
            idle_timeout_secs: 900,
            reap_interval_secs: 60,
            buffer_mode: BufferMode::Hybrid,
            spill_threshold_bytes: 8 * MIB,
            spill_dir: env::temp_dir(),
            transfer_retries: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            upload: UploadConfig::default(),
            sink: SinkConfig::Local(LocalSinkConfig {
                root: PathBuf::from("./uploads"),
                base_url: "http://localhost:3000/files".to_string(),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = UploadConfig::default();

        let transfer_retries: u8 = parse_var("UPLOAD_TRANSFER_RETRIES", 0)?;
        if transfer_retries > 1 {
            tracing::warn!(
                requested = transfer_retries,
                "UPLOAD_TRANSFER_RETRIES is capped at 1"
            );
        }

        let buffer_mode = match env::var("UPLOAD_BUFFER_MODE")
            .unwrap_or_else(|_| "hybrid".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => BufferMode::Memory,
            "disk" => BufferMode::Disk,
            "hybrid" => BufferMode::Hybrid,
            other => {
                return Err(ConfigError::Invalid {
                    name: "UPLOAD_BUFFER_MODE",
                    value: other.to_string(),
                })
            }
        };

        let upload = UploadConfig {
            max_chunk_bytes: parse_var("UPLOAD_MAX_CHUNK_BYTES", defaults.max_chunk_bytes)?,
            max_upload_bytes: parse_var("UPLOAD_MAX_BYTES", defaults.max_upload_bytes)?,
            idle_timeout_secs: parse_var("UPLOAD_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,
            reap_interval_secs: parse_var(
                "UPLOAD_REAP_INTERVAL_SECS",
                defaults.reap_interval_secs,
            )?,
            buffer_mode,
            spill_threshold_bytes: parse_var(
                "UPLOAD_SPILL_THRESHOLD_BYTES",
                defaults.spill_threshold_bytes,
            )?,
            spill_dir: env::var("UPLOAD_SPILL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.spill_dir),
            transfer_retries: transfer_retries.min(1),
        };

        let sink = match env::var("SINK_PROVIDER")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => SinkConfig::S3(S3Config {
                provider: match env::var("S3_PROVIDER")
                    .unwrap_or_else(|_| "minio".to_string())
                    .as_str()
                {
                    "r2" => S3Provider::R2,
                    "s3" => S3Provider::S3,
                    "b2" => S3Provider::B2,
                    _ => S3Provider::Minio,
                },
                endpoint: required_var("S3_ENDPOINT")?,
                bucket: required_var("S3_BUCKET")?,
                access_key: required_var("S3_ACCESS_KEY")?,
                secret_key: required_var("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
                public_url: env::var("S3_PUBLIC_URL").ok(),
            }),
            "local" => SinkConfig::Local(LocalSinkConfig {
                root: env::var("LOCAL_SINK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./uploads")),
                base_url: env::var("LOCAL_SINK_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000/files".to_string()),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    name: "SINK_PROVIDER",
                    value: other.to_string(),
                })
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 3000)?,
            },
            upload,
            sink,
        })
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
