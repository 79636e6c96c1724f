//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::storage::TransferSink;
use crate::upload::{BufferPolicy, ChunkReceiver, SessionLimits, SessionReaper, SessionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: SessionStore,
    receiver: ChunkReceiver,
}

impl AppState {
    /// Create a new application state with an empty session store
    pub fn new(config: Config, sink: Arc<dyn TransferSink>) -> Self {
        let store = SessionStore::new(
            SessionLimits {
                max_upload_bytes: config.upload.max_upload_bytes,
                idle_timeout: config.upload.idle_timeout(),
            },
            BufferPolicy::from_config(&config.upload),
        );
        let receiver = ChunkReceiver::new(store.clone(), sink, &config.upload);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                receiver,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the session store
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.inner.receiver
    }

    /// Reaper for this state's session store
    pub fn reaper(&self) -> SessionReaper {
        SessionReaper::new(
            self.inner.store.clone(),
            self.inner.config.upload.idle_timeout(),
            self.inner.config.upload.reap_interval(),
        )
    }

    /// Expire every remaining session and release its buffer
    pub async fn shutdown(&self) -> usize {
        self.inner.store.drain().await
    }
}
