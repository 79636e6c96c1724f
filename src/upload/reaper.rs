//! Session Reaper
//!
//! Background task that expires idle sessions and releases their buffers.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::session::SessionStore;

/// Periodically expires sessions idle past the timeout
#[derive(Clone)]
pub struct SessionReaper {
    store: SessionStore,
    idle_timeout: Duration,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(store: SessionStore, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            store,
            idle_timeout,
            interval,
        }
    }

    /// Expire every stale session once
    ///
    /// Returns the number of sessions expired.
    pub async fn sweep(&self) -> usize {
        let stale = self.store.list_stale(self.idle_timeout).await;

        let mut count = 0;
        for id in stale {
            if self.store.expire(&id, self.idle_timeout).await {
                tracing::debug!(session_id = %id, "Reaped idle session");
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired upload sessions");
        }

        count
    }

    /// Start background cleanup task
    ///
    /// Runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Session reaper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferMode;
    use crate::upload::buffer::BufferPolicy;
    use crate::upload::session::SessionLimits;
    use crate::upload::FileMetadata;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn store(policy: BufferPolicy) -> SessionStore {
        SessionStore::new(
            SessionLimits {
                max_upload_bytes: 1 << 20,
                idle_timeout: TIMEOUT,
            },
            policy,
        )
    }

    fn metadata() -> FileMetadata {
        FileMetadata::new("part.bin", None, "inbox").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_only_takes_idle_sessions() {
        let store = store(BufferPolicy::memory());
        let reaper = SessionReaper::new(store.clone(), TIMEOUT, Duration::from_secs(5));

        store.create("idle", metadata(), 3).await.unwrap();
        tokio::time::advance(Duration::from_secs(40)).await;
        store.create("busy", metadata(), 3).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(reaper.sweep().await, 1);
        assert!(!store.contains("idle").await);
        assert!(store.contains("busy").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_reaps_and_releases_spill_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(BufferPolicy {
            mode: BufferMode::Disk,
            spill_threshold: 0,
            spill_dir: temp_dir.path().to_path_buf(),
        });

        for i in 0..100 {
            let id = format!("s{i}");
            store.create(&id, metadata(), 4).await.unwrap();
            store.append(&id, 0, 4, &[i as u8; 64]).await.unwrap();
        }
        assert_eq!(store.len().await, 100);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 100);

        let shutdown = CancellationToken::new();
        let handle = SessionReaper::new(store.clone(), TIMEOUT, Duration::from_secs(10))
            .spawn(shutdown.clone());

        // Idle timeout plus one reap interval
        tokio::time::sleep(TIMEOUT + Duration::from_secs(15)).await;

        assert!(store.is_empty().await);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_rejects_late_chunk() {
        let store = store(BufferPolicy::memory());
        let reaper = SessionReaper::new(store.clone(), TIMEOUT, Duration::from_secs(5));

        store.create("s1", metadata(), 2).await.unwrap();
        store.append("s1", 0, 2, b"abc").await.unwrap();
        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;
        reaper.sweep().await;

        let result = store.append("s1", 1, 2, b"def").await;
        assert!(matches!(result, Err(crate::upload::UploadError::UnknownSession(_))));
    }
}
