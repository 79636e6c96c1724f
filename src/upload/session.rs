//! Upload Session Store
//!
//! Manages upload sessions with:
//! - A process-wide session map guarded by an async RwLock
//! - Per-session mutex so appends, completion and expiry never interleave
//! - Idle expiry, checked on every append and by the reaper

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::buffer::{AssembledFile, BufferPolicy, SessionBuffer, StagedChunk};
use super::completion;
use super::types::{
    ChunkAck, CloseReason, FileMetadata, SessionSnapshot, SessionStatus, UploadError,
};

// ============================================================================
// Upload Session
// ============================================================================

/// State of one upload session
pub struct UploadSession {
    pub(super) id: String,
    pub(super) metadata: FileMetadata,
    pub(super) total_chunks: u32,
    /// The only ordinal that may append next
    pub(super) next_ordinal: u32,
    /// Distinct ordinals appended so far
    pub(super) received_chunks: u32,
    pub(super) highest_ordinal: Option<u32>,
    /// `None` once detached for hand-off or released on close
    pub(super) buffer: Option<SessionBuffer>,
    pub(super) hasher: Sha256,
    pub(super) status: SessionStatus,
    pub(super) created_at: DateTime<Utc>,
    pub(super) last_activity: Instant,
}

impl UploadSession {
    fn new(id: String, metadata: FileMetadata, total_chunks: u32, buffer: SessionBuffer) -> Self {
        Self {
            id,
            metadata,
            total_chunks,
            next_ordinal: 0,
            received_chunks: 0,
            highest_ordinal: None,
            buffer: Some(buffer),
            hasher: Sha256::new(),
            status: SessionStatus::Open,
            created_at: Utc::now(),
            last_activity: Instant::now(),
        }
    }

    /// Chunks still expected
    pub fn remaining(&self) -> u32 {
        self.total_chunks - self.received_chunks
    }

    /// Bytes accumulated so far
    pub fn buffered_bytes(&self) -> u64 {
        self.buffer.as_ref().map(SessionBuffer::len).unwrap_or(0)
    }

    /// Whether the session has seen no activity for longer than `timeout`
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Move to `Closed` and release the accumulated bytes
    pub(super) fn close(&mut self, reason: CloseReason) {
        let released = self.buffered_bytes();
        self.buffer = None;
        self.status = SessionStatus::Closed(reason);

        tracing::info!(
            session_id = %self.id,
            file_name = %self.metadata.file_name,
            reason = ?reason,
            released_bytes = released,
            "Upload session closed"
        );
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            metadata: self.metadata.clone(),
            status: self.status,
            total_chunks: self.total_chunks,
            received_chunks: self.received_chunks,
            next_ordinal: self.next_ordinal,
            received_bytes: self.buffered_bytes(),
            spilled: self.buffer.as_ref().is_some_and(SessionBuffer::is_spilled),
            created_at: self.created_at,
            idle_secs: self.last_activity.elapsed().as_secs(),
        }
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Limits enforced by the store
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Largest accumulated size of one session
    pub max_upload_bytes: u64,
    /// Inactivity after which an open session expires
    pub idle_timeout: Duration,
}

/// Result of a successful append
#[derive(Debug)]
pub enum Appended {
    /// Session still open
    Progress(ChunkAck),
    /// Chunk completed the session; the caller owns the hand-off
    Complete(AssembledFile),
}

type SessionRef = Arc<Mutex<UploadSession>>;

/// Bytes offered to a session by one append
enum Payload<'a> {
    Bytes(&'a [u8]),
    Staged(StagedChunk),
}

impl Payload<'_> {
    fn len(&self) -> u64 {
        match self {
            Payload::Bytes(data) => data.len() as u64,
            Payload::Staged(staged) => staged.len(),
        }
    }
}

/// Process-wide upload session store
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    /// Active sessions indexed by client-supplied ID
    sessions: RwLock<HashMap<String, SessionRef>>,

    limits: SessionLimits,

    /// Medium used for new session buffers
    buffer_policy: BufferPolicy,
}

impl SessionStore {
    /// Create a new session store
    pub fn new(limits: SessionLimits, buffer_policy: BufferPolicy) -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
                limits,
                buffer_policy,
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create a new upload session
    pub async fn create(
        &self,
        session_id: &str,
        metadata: FileMetadata,
        total_chunks: u32,
    ) -> Result<(), UploadError> {
        if total_chunks == 0 {
            return Err(UploadError::InvalidRequest(
                "totalChunks must be at least 1".to_string(),
            ));
        }

        let buffer = SessionBuffer::new(self.inner.buffer_policy.clone()).await?;

        {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(session_id) {
                return Err(UploadError::AlreadyExists(session_id.to_string()));
            }
            let session = UploadSession::new(
                session_id.to_string(),
                metadata.clone(),
                total_chunks,
                buffer,
            );
            sessions.insert(session_id.to_string(), Arc::new(Mutex::new(session)));
        }

        tracing::info!(
            session_id = %session_id,
            file_name = %metadata.file_name,
            destination_folder = %metadata.destination_folder,
            total_chunks = total_chunks,
            "Created upload session"
        );

        Ok(())
    }

    /// Append a chunk to a session
    ///
    /// Only `next_ordinal` appends. An ordinal that was already accepted is
    /// acknowledged again with `duplicate: true` and nothing is written. Any
    /// error leaves the session exactly as it was.
    pub async fn append(
        &self,
        session_id: &str,
        ordinal: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<Appended, UploadError> {
        self.apply(session_id, ordinal, total_chunks, Payload::Bytes(data))
            .await
    }

    /// Start a chunk payload outside any session, using the store's buffer medium
    pub async fn stage(&self) -> Result<StagedChunk, UploadError> {
        StagedChunk::new(self.inner.buffer_policy.clone()).await
    }

    /// Adopt a staged payload as the whole content of a one-chunk session
    ///
    /// The staged buffer becomes the session buffer as is, so spilled
    /// payloads are never copied.
    pub async fn append_staged(
        &self,
        session_id: &str,
        staged: StagedChunk,
    ) -> Result<Appended, UploadError> {
        self.apply(session_id, 0, 1, Payload::Staged(staged)).await
    }

    async fn apply(
        &self,
        session_id: &str,
        ordinal: u32,
        total_chunks: u32,
        payload: Payload<'_>,
    ) -> Result<Appended, UploadError> {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| UploadError::UnknownSession(session_id.to_string()))?;

        let mut guard = entry.lock().await;
        let session = &mut *guard;

        match session.status {
            SessionStatus::Open => {}
            SessionStatus::Closed(CloseReason::Expired) => {
                return Err(UploadError::Expired(session_id.to_string()));
            }
            SessionStatus::Completing | SessionStatus::Closed(_) => {
                return Err(UploadError::SessionClosed(session_id.to_string()));
            }
        }

        if session.is_idle(self.inner.limits.idle_timeout) {
            session.close(CloseReason::Expired);
            drop(guard);
            self.detach(session_id, &entry).await;
            return Err(UploadError::Expired(session_id.to_string()));
        }

        if total_chunks != session.total_chunks {
            return Err(UploadError::ProtocolViolation(format!(
                "totalChunks {} does not match {} declared for session {}",
                total_chunks, session.total_chunks, session_id
            )));
        }

        if ordinal >= session.total_chunks {
            return Err(UploadError::InvalidOrdinal {
                ordinal,
                total_chunks: session.total_chunks,
            });
        }

        if ordinal < session.next_ordinal {
            session.touch();
            tracing::warn!(
                session_id = %session_id,
                ordinal = ordinal,
                "Duplicate chunk acknowledged without appending"
            );
            return Ok(Appended::Progress(ChunkAck {
                received: ordinal,
                remaining: session.remaining(),
                duplicate: true,
            }));
        }

        if ordinal > session.next_ordinal {
            return Err(UploadError::OutOfSequence {
                expected: session.next_ordinal,
                received: ordinal,
            });
        }

        let chunk_bytes = payload.len();
        let new_size = session.buffered_bytes() + chunk_bytes;
        if new_size > self.inner.limits.max_upload_bytes {
            return Err(UploadError::QuotaExceeded {
                size: new_size,
                max: self.inner.limits.max_upload_bytes,
            });
        }

        match payload {
            Payload::Bytes(data) => {
                let buffer = session.buffer.as_mut().ok_or_else(|| {
                    UploadError::Storage("session buffer already released".to_string())
                })?;
                buffer.append(data).await?;
                session.hasher.update(data);
            }
            Payload::Staged(staged) => {
                if session.buffered_bytes() > 0 {
                    return Err(UploadError::ProtocolViolation(format!(
                        "session {} already holds data",
                        session_id
                    )));
                }
                session.buffer = Some(staged.buffer);
                session.hasher = staged.hasher;
            }
        }

        session.next_ordinal += 1;
        session.received_chunks += 1;
        session.highest_ordinal = Some(ordinal);
        session.touch();

        tracing::debug!(
            session_id = %session_id,
            ordinal = ordinal,
            bytes = chunk_bytes,
            buffered = new_size,
            remaining = session.remaining(),
            "Chunk appended"
        );

        match completion::detach_if_complete(session).await {
            Ok(Some(file)) => Ok(Appended::Complete(file)),
            Ok(None) => Ok(Appended::Progress(ChunkAck {
                received: ordinal,
                remaining: session.remaining(),
                duplicate: false,
            })),
            Err(e) => {
                session.close(CloseReason::Failed);
                drop(guard);
                self.detach(session_id, &entry).await;
                Err(e)
            }
        }
    }

    /// Close a session after its hand-off and remove it
    ///
    /// Only a session in `Completing` is affected, so a stale call never
    /// closes a newer session that reused the ID.
    pub async fn finish(&self, session_id: &str, reason: CloseReason) {
        let Some(entry) = self.get(session_id).await else {
            return;
        };

        let mut session = entry.lock().await;
        if session.status != SessionStatus::Completing {
            return;
        }
        session.close(reason);
        drop(session);

        self.detach(session_id, &entry).await;
    }

    /// Abort an open session, releasing its bytes
    pub async fn abort(&self, session_id: &str) -> Result<(), UploadError> {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| UploadError::UnknownSession(session_id.to_string()))?;

        let mut session = entry.lock().await;
        if session.status != SessionStatus::Open {
            return Err(UploadError::SessionClosed(session_id.to_string()));
        }
        session.close(CloseReason::Aborted);
        drop(session);

        self.detach(session_id, &entry).await;
        Ok(())
    }

    /// Expire a session if it is still open and idle past `idle_timeout`
    ///
    /// Re-checks under the session lock, so a chunk that arrived after the
    /// session was listed as stale keeps it alive.
    pub async fn expire(&self, session_id: &str, idle_timeout: Duration) -> bool {
        let Some(entry) = self.get(session_id).await else {
            return false;
        };

        let mut session = entry.lock().await;
        if session.status != SessionStatus::Open || !session.is_idle(idle_timeout) {
            return false;
        }
        session.close(CloseReason::Expired);
        drop(session);

        self.detach(session_id, &entry).await;
        true
    }

    /// Remove a session unconditionally, closing it with `reason` if needed
    pub async fn remove(&self, session_id: &str, reason: CloseReason) -> bool {
        let entry = {
            let mut sessions = self.inner.sessions.write().await;
            sessions.remove(session_id)
        };

        let Some(entry) = entry else {
            return false;
        };

        let mut session = entry.lock().await;
        if !matches!(session.status, SessionStatus::Closed(_)) {
            session.close(reason);
        }
        true
    }

    /// Expire every remaining session (used at shutdown)
    ///
    /// Returns the number of sessions removed.
    pub async fn drain(&self) -> usize {
        let ids: Vec<String> = {
            let sessions = self.inner.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        let mut count = 0;
        for id in ids {
            if self.remove(&id, CloseReason::Expired).await {
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(count = count, "Drained upload sessions");
        }

        count
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// IDs of open sessions idle for longer than `older_than`
    ///
    /// Sessions whose lock is held are busy and therefore skipped.
    pub async fn list_stale(&self, older_than: Duration) -> Vec<String> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .iter()
            .filter_map(|(id, entry)| {
                let session = entry.try_lock().ok()?;
                (session.status == SessionStatus::Open && session.is_idle(older_than))
                    .then(|| id.clone())
            })
            .collect()
    }

    /// Get a point-in-time view of a session
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, UploadError> {
        let entry = self
            .get(session_id)
            .await
            .ok_or_else(|| UploadError::UnknownSession(session_id.to_string()))?;
        let session = entry.lock().await;
        Ok(session.snapshot())
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        let sessions = self.inner.sessions.read().await;
        sessions.contains_key(session_id)
    }

    /// Get session count
    pub async fn len(&self) -> usize {
        let sessions = self.inner.sessions.read().await;
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn get(&self, session_id: &str) -> Option<SessionRef> {
        let sessions = self.inner.sessions.read().await;
        sessions.get(session_id).cloned()
    }

    /// Remove `entry` from the map if it is still the one registered under `session_id`
    async fn detach(&self, session_id: &str, entry: &SessionRef) {
        let mut sessions = self.inner.sessions.write().await;
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            sessions.remove(session_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferMode;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn store() -> SessionStore {
        SessionStore::new(
            SessionLimits {
                max_upload_bytes: 1024,
                idle_timeout: TIMEOUT,
            },
            BufferPolicy::memory(),
        )
    }

    fn metadata() -> FileMetadata {
        FileMetadata::new("test.txt", None, "inbox").unwrap()
    }

    fn ack(appended: Appended) -> ChunkAck {
        match appended {
            Appended::Progress(ack) => ack,
            Appended::Complete(_) => panic!("expected progress"),
        }
    }

    fn complete(appended: Appended) -> AssembledFile {
        match appended {
            Appended::Complete(file) => file,
            Appended::Progress(ack) => panic!("expected completion, got {ack:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_session() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.total_chunks, 2);
        assert_eq!(snapshot.received_chunks, 0);
        assert_eq!(snapshot.status, SessionStatus::Open);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();

        let result = store.create("s1", metadata(), 2).await;
        assert!(matches!(result, Err(UploadError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_zero_chunks() {
        let result = store().create("s1", metadata(), 0).await;
        assert!(matches!(result, Err(UploadError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_append_in_order_reassembles() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();

        let first = ack(store.append("s1", 0, 3, b"Hello").await.unwrap());
        assert_eq!(first.received, 0);
        assert_eq!(first.remaining, 2);
        assert!(!first.duplicate);

        ack(store.append("s1", 1, 3, b", ").await.unwrap());
        let file = complete(store.append("s1", 2, 3, b"World!").await.unwrap());

        assert_eq!(file.size, 13);
        assert_eq!(file.to_bytes().await.unwrap().as_ref(), b"Hello, World!");
        assert_eq!(file.sha256, crate::upload::compute_hash(b"Hello, World!"));

        // Completing sessions reject further chunks until finished
        let late = store.append("s1", 2, 3, b"!").await;
        assert!(matches!(late, Err(UploadError::SessionClosed(_))));

        store.finish("s1", CloseReason::Success).await;
        assert!(!store.contains("s1").await);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_not_appended() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();

        store.append("s1", 0, 3, b"abc").await.unwrap();
        let again = ack(store.append("s1", 0, 3, b"abc").await.unwrap());

        assert!(again.duplicate);
        assert_eq!(again.remaining, 2);

        let snapshot = store.snapshot("s1").await.unwrap();
        assert_eq!(snapshot.received_bytes, 3);
        assert_eq!(snapshot.received_chunks, 1);
    }

    #[tokio::test]
    async fn test_gap_is_rejected() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();
        store.append("s1", 0, 3, b"abc").await.unwrap();

        let result = store.append("s1", 2, 3, b"ghi").await;
        assert!(matches!(
            result,
            Err(UploadError::OutOfSequence { expected: 1, received: 2 })
        ));

        // Session unchanged, the missing ordinal still works
        ack(store.append("s1", 1, 3, b"def").await.unwrap());
    }

    #[tokio::test]
    async fn test_total_chunks_mismatch() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();
        store.append("s1", 0, 3, b"abc").await.unwrap();

        let result = store.append("s1", 1, 5, b"def").await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_ordinal_out_of_range() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();

        let result = store.append("s1", 2, 2, b"abc").await;
        assert!(matches!(
            result,
            Err(UploadError::InvalidOrdinal { ordinal: 2, total_chunks: 2 })
        ));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let result = store().append("missing", 1, 3, b"abc").await;
        assert!(matches!(result, Err(UploadError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_quota_leaves_session_open() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();
        store.append("s1", 0, 3, &[0u8; 1000]).await.unwrap();

        let result = store.append("s1", 1, 3, &[0u8; 100]).await;
        assert!(matches!(result, Err(UploadError::QuotaExceeded { size: 1100, max: 1024 })));

        // Retry the same ordinal with a smaller payload
        ack(store.append("s1", 1, 3, &[0u8; 10]).await.unwrap());
        assert_eq!(store.snapshot("s1").await.unwrap().received_bytes, 1010);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires_on_append() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();
        store.append("s1", 0, 3, b"abc").await.unwrap();

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

        let result = store.append("s1", 1, 3, b"def").await;
        assert!(matches!(result, Err(UploadError::Expired(_))));

        let result = store.append("s1", 1, 3, b"def").await;
        assert!(matches!(result, Err(UploadError::UnknownSession(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_stale_and_expire() {
        let store = store();
        store.create("old", metadata(), 2).await.unwrap();
        tokio::time::advance(Duration::from_secs(45)).await;
        store.create("fresh", metadata(), 2).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let stale = store.list_stale(TIMEOUT).await;
        assert_eq!(stale, vec!["old".to_string()]);

        assert!(store.expire("old", TIMEOUT).await);
        assert!(!store.expire("fresh", TIMEOUT).await);
        assert!(!store.contains("old").await);
        assert!(store.contains("fresh").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_skips_session_touched_after_listing() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        store.append("s1", 0, 2, b"abc").await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        // 70s since creation, 20s since the last chunk
        assert!(store.list_stale(TIMEOUT).await.is_empty());
        assert!(!store.expire("s1", TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_abort_session() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();
        store.append("s1", 0, 2, b"abc").await.unwrap();

        store.abort("s1").await.unwrap();
        assert!(!store.contains("s1").await);

        let result = store.abort("s1").await;
        assert!(matches!(result, Err(UploadError::UnknownSession(_))));
    }

    #[tokio::test]
    async fn test_finish_ignores_open_session() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();

        store.finish("s1", CloseReason::Failed).await;
        assert!(store.contains("s1").await);
    }

    #[tokio::test]
    async fn test_concurrent_same_ordinal() {
        let store = store();
        store.create("s1", metadata(), 3).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.append("s1", 0, 3, b"abc").await })
            })
            .collect();

        let mut duplicates = 0;
        for handle in handles {
            if ack(handle.await.unwrap().unwrap()).duplicate {
                duplicates += 1;
            }
        }

        assert_eq!(duplicates, 1);
        assert_eq!(store.snapshot("s1").await.unwrap().received_bytes, 3);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let store = store();
        for i in 0..8 {
            store.create(&format!("s{i}"), metadata(), 2).await.unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("s{i}");
                    store.append(&id, 0, 2, &[i as u8; 4]).await?;
                    store.append(&id, 1, 2, &[i as u8; 4]).await
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let file = complete(handle.await.unwrap().unwrap());
            assert_eq!(file.to_bytes().await.unwrap().as_ref(), &[i as u8; 8]);
        }
    }

    #[tokio::test]
    async fn test_drain_releases_spill_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(
            SessionLimits {
                max_upload_bytes: 1 << 20,
                idle_timeout: TIMEOUT,
            },
            BufferPolicy {
                mode: BufferMode::Disk,
                spill_threshold: 0,
                spill_dir: temp_dir.path().to_path_buf(),
            },
        );

        for i in 0..5 {
            let id = format!("s{i}");
            store.create(&id, metadata(), 2).await.unwrap();
            store.append(&id, 0, 2, &[1u8; 512]).await.unwrap();
        }
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 5);

        assert_eq!(store.drain().await, 5);
        assert!(store.is_empty().await);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_append_staged_adopts_spilled_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(
            SessionLimits {
                max_upload_bytes: 1 << 20,
                idle_timeout: TIMEOUT,
            },
            BufferPolicy {
                mode: BufferMode::Disk,
                spill_threshold: 0,
                spill_dir: temp_dir.path().to_path_buf(),
            },
        );

        let mut staged = store.stage().await.unwrap();
        staged.append(b"Hello, ").await.unwrap();
        staged.append(b"World!").await.unwrap();
        assert!(staged.is_spilled());

        store.create("s1", metadata(), 1).await.unwrap();
        let file = complete(store.append_staged("s1", staged).await.unwrap());

        // The session's own empty spill file is released on adoption
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
        assert!(file.path().is_some());
        assert_eq!(file.to_bytes().await.unwrap().as_ref(), b"Hello, World!");
        assert_eq!(file.sha256, crate::upload::compute_hash(b"Hello, World!"));

        store.finish("s1", CloseReason::Success).await;
        drop(file);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_append_staged_needs_one_chunk_session() {
        let store = store();
        store.create("s1", metadata(), 2).await.unwrap();

        let mut staged = store.stage().await.unwrap();
        staged.append(b"data").await.unwrap();

        let result = store.append_staged("s1", staged).await;
        assert!(matches!(result, Err(UploadError::ProtocolViolation(_))));
        assert_eq!(store.snapshot("s1").await.unwrap().received_bytes, 0);
    }
}
