//! Upload Relay
//!
//! Accepts files as sequences of chunks (or in one request), reassembles them
//! and relays the result to S3-compatible object storage.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_relay::config::{Config, SinkConfig};
use upload_relay::routes;
use upload_relay::state::AppState;
use upload_relay::storage::{LocalSink, S3Sink, TransferSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "upload_relay=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting Upload Relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        max_chunk_bytes = config.upload.max_chunk_bytes,
        max_upload_bytes = config.upload.max_upload_bytes,
        idle_timeout_secs = config.upload.idle_timeout_secs,
        buffer_mode = ?config.upload.buffer_mode,
        "Upload limits"
    );

    // Initialize transfer sink
    let sink: Arc<dyn TransferSink> = match &config.sink {
        SinkConfig::S3(s3) => {
            tracing::info!("S3 endpoint: {}", s3.endpoint);
            tracing::info!("S3 bucket: {}", s3.bucket);
            Arc::new(
                S3Sink::new(s3)
                    .await
                    .context("Failed to initialize S3 sink")?,
            )
        }
        SinkConfig::Local(local) => {
            tracing::info!("Local sink directory: {}", local.root.display());
            Arc::new(LocalSink::new(local))
        }
    };

    // Create application state
    let app_state = AppState::new(config, sink);
    let server = &app_state.config().server;

    // Start session reaper
    let shutdown = CancellationToken::new();
    let reaper = app_state.reaper().spawn(shutdown.clone());

    let app = routes::router(app_state.clone());

    // Start server with graceful shutdown
    let host: std::net::IpAddr = server
        .host
        .parse()
        .with_context(|| format!("Invalid SERVER_HOST: {}", server.host))?;
    let addr = SocketAddr::from((host, server.port));
    tracing::info!("Upload Relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!("Session reaper ended abnormally: {}", e);
    }

    let drained = app_state.shutdown().await;
    tracing::info!(drained = drained, "Server shutdown complete");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
