//! Chunked upload sessions.
//!
//! Uploads accumulate in memory until committed, keyed by a server-issued
//! UUID. Sessions are process-local: a restart discards in-flight uploads and
//! clients restart them. Each session is guarded by an async mutex; a second
//! writer that catches a session mid-append observes [`RegistryError::SessionBusy`]
//! rather than interleaving chunks.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut as _, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::digest::RepositoryName;
use crate::error::{RegistryError, RegistryResult};
use crate::metrics;

#[derive(Debug)]
enum SessionState {
    Receiving { buffer: BytesMut },
    Closed,
}

/// A single in-flight chunked upload.
#[derive(Debug)]
pub struct UploadSession {
    repository: RepositoryName,
    owner: Option<String>,
    state: SessionState,
    deadline: Instant,
}

impl UploadSession {
    /// Bytes accumulated so far.
    pub fn offset(&self) -> u64 {
        match &self.state {
            SessionState::Receiving { buffer } => buffer.len() as u64,
            SessionState::Closed => 0,
        }
    }
}

/// Tracker for all in-flight upload sessions.
#[derive(Debug)]
pub struct UploadSessions {
    sessions: DashMap<Uuid, Arc<Mutex<UploadSession>>>,
    ttl: Duration,
    max_bytes: u64,
}

impl UploadSessions {
    /// Create a tracker with the given idle timeout and per-upload size cap.
    pub fn new(ttl: Duration, max_bytes: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_bytes,
        }
    }

    /// Open a new session for a repository, owned by the authenticated user.
    pub fn open(&self, repository: RepositoryName, owner: Option<String>) -> Uuid {
        let id = Uuid::new_v4();
        let session = UploadSession {
            repository,
            owner,
            state: SessionState::Receiving {
                buffer: BytesMut::new(),
            },
            deadline: Instant::now() + self.ttl,
        };
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        metrics::UPLOAD_SESSIONS_CREATED.inc();
        metrics::UPLOAD_SESSIONS_ACTIVE.inc();
        tracing::debug!(session = %id, "opened upload session");
        id
    }

    /// Run a closure against a session, enforcing scope, ownership and
    /// expiry.
    ///
    /// Expired sessions are removed on access; a repository or owner
    /// mismatch is indistinguishable from a missing session.
    fn with_session<T>(
        &self,
        id: Uuid,
        repository: &RepositoryName,
        owner: Option<&str>,
        f: impl FnOnce(&mut UploadSession) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        let not_found = || RegistryError::SessionNotFound(id.to_string());

        // Clone the Arc out of the map so the shard lock is released before
        // any removal below.
        let session = {
            let entry = self.sessions.get(&id).ok_or_else(not_found)?;
            Arc::clone(entry.value())
        };
        let mut guard = session.try_lock().map_err(|_| RegistryError::SessionBusy)?;

        if guard.deadline <= Instant::now() {
            drop(guard);
            if self.sessions.remove(&id).is_some() {
                metrics::UPLOAD_SESSIONS_EXPIRED.inc();
                metrics::UPLOAD_SESSIONS_ACTIVE.dec();
            }
            tracing::debug!(session = %id, "upload session expired");
            return Err(not_found());
        }

        if guard.repository != *repository || guard.owner.as_deref() != owner {
            return Err(not_found());
        }

        guard.deadline = Instant::now() + self.ttl;
        f(&mut guard)
    }

    /// Append a chunk, optionally checking the client's claimed offset.
    pub fn append(
        &self,
        id: Uuid,
        repository: &RepositoryName,
        owner: Option<&str>,
        chunk: Bytes,
        expected_offset: Option<u64>,
    ) -> RegistryResult<u64> {
        let max_bytes = self.max_bytes;
        self.with_session(id, repository, owner, |session| {
            let SessionState::Receiving { buffer } = &mut session.state else {
                return Err(RegistryError::SessionClosed);
            };
            if let Some(expected) = expected_offset {
                let offset = buffer.len() as u64;
                if expected != offset {
                    return Err(RegistryError::RangeMismatch {
                        expected: offset,
                        provided: expected,
                    });
                }
            }
            if buffer.len() as u64 + chunk.len() as u64 > max_bytes {
                return Err(RegistryError::UploadTooLarge { limit: max_bytes });
            }
            buffer.put(chunk);
            Ok(buffer.len() as u64)
        })
    }

    /// Current offset of a session.
    pub fn status(
        &self,
        id: Uuid,
        repository: &RepositoryName,
        owner: Option<&str>,
    ) -> RegistryResult<u64> {
        self.with_session(id, repository, owner, |session| match &session.state {
            SessionState::Receiving { buffer } => Ok(buffer.len() as u64),
            SessionState::Closed => Err(RegistryError::SessionClosed),
        })
    }

    /// Take the accumulated bytes for commit, destroying the session.
    ///
    /// The session is gone whether or not the subsequent digest check
    /// succeeds; a client whose digest was wrong starts a fresh upload.
    pub fn take_for_commit(
        &self,
        id: Uuid,
        repository: &RepositoryName,
        owner: Option<&str>,
    ) -> RegistryResult<Bytes> {
        let data = self.with_session(id, repository, owner, |session| {
            match std::mem::replace(&mut session.state, SessionState::Closed) {
                SessionState::Receiving { buffer } => Ok(buffer.freeze()),
                SessionState::Closed => Err(RegistryError::SessionClosed),
            }
        })?;
        if self.sessions.remove(&id).is_some() {
            metrics::UPLOAD_SESSIONS_COMMITTED.inc();
            metrics::UPLOAD_SESSIONS_ACTIVE.dec();
        }
        Ok(data)
    }

    /// Abort a session, discarding its buffered bytes.
    pub fn abort(
        &self,
        id: Uuid,
        repository: &RepositoryName,
        owner: Option<&str>,
    ) -> RegistryResult<()> {
        self.with_session(id, repository, owner, |session| {
            session.state = SessionState::Closed;
            Ok(())
        })?;
        if self.sessions.remove(&id).is_some() {
            metrics::UPLOAD_SESSIONS_ABORTED.inc();
            metrics::UPLOAD_SESSIONS_ACTIVE.dec();
        }
        tracing::debug!(session = %id, "aborted upload session");
        Ok(())
    }

    /// Drop every session whose deadline has passed.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.sessions.retain(|id, session| {
            // A locked session is in active use, keep it.
            let Ok(guard) = session.try_lock() else {
                return true;
            };
            if guard.deadline <= now {
                metrics::UPLOAD_SESSIONS_EXPIRED.inc();
                metrics::UPLOAD_SESSIONS_ACTIVE.dec();
                tracing::debug!(session = %id, "swept expired upload session");
                false
            } else {
                true
            }
        });
    }

    /// Spawn a background task that periodically sweeps expired sessions.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let sessions = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sessions.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryName {
        "library/app".parse().unwrap()
    }

    fn tracker() -> UploadSessions {
        UploadSessions::new(Duration::from_secs(60), 1024)
    }

    #[tokio::test]
    async fn chunks_accumulate_in_order() {
        let sessions = tracker();
        let repo = repo();
        let id = sessions.open(repo.clone(), None);

        assert_eq!(
            sessions
                .append(id, &repo, None, Bytes::from_static(b"hello "), None)
                .unwrap(),
            6
        );
        assert_eq!(
            sessions
                .append(id, &repo, None, Bytes::from_static(b"world"), Some(6))
                .unwrap(),
            11
        );
        assert_eq!(sessions.status(id, &repo, None).unwrap(), 11);

        let data = sessions.take_for_commit(id, &repo, None).unwrap();
        assert_eq!(&data[..], b"hello world");

        // Commit destroys the session.
        let error = sessions.status(id, &repo, None).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn offset_mismatch_is_rejected() {
        let sessions = tracker();
        let repo = repo();
        let id = sessions.open(repo.clone(), None);
        sessions
            .append(id, &repo, None, Bytes::from_static(b"abc"), None)
            .unwrap();

        let error = sessions
            .append(id, &repo, None, Bytes::from_static(b"def"), Some(7))
            .unwrap_err();
        assert!(matches!(
            error,
            RegistryError::RangeMismatch {
                expected: 3,
                provided: 7
            }
        ));
        // The rejected chunk was not appended.
        assert_eq!(sessions.status(id, &repo, None).unwrap(), 3);
    }

    #[tokio::test]
    async fn size_limit_is_enforced() {
        let sessions = UploadSessions::new(Duration::from_secs(60), 4);
        let repo = repo();
        let id = sessions.open(repo.clone(), None);

        let error = sessions
            .append(id, &repo, None, Bytes::from_static(b"too big"), None)
            .unwrap_err();
        assert!(matches!(error, RegistryError::UploadTooLarge { limit: 4 }));
    }

    #[tokio::test]
    async fn scope_mismatch_looks_like_missing_session() {
        let sessions = tracker();
        let repo = repo();
        let id = sessions.open(repo.clone(), Some("alice".into()));

        let error = sessions.status(id, &repo, Some("mallory")).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));
        let error = sessions.status(id, &repo, None).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));

        // The right owner going through the wrong repository is also a miss.
        let other: RepositoryName = "library/other".parse().unwrap();
        let error = sessions.status(id, &other, Some("alice")).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));

        assert_eq!(sessions.status(id, &repo, Some("alice")).unwrap(), 0);
    }

    #[tokio::test]
    async fn locked_session_reports_busy() {
        let sessions = tracker();
        let repo = repo();
        let id = sessions.open(repo.clone(), None);

        let handle = Arc::clone(sessions.sessions.get(&id).unwrap().value());
        let _guard = handle.try_lock().unwrap();

        let error = sessions
            .append(id, &repo, None, Bytes::from_static(b"x"), None)
            .unwrap_err();
        assert!(matches!(error, RegistryError::SessionBusy));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_sessions_are_unreachable_and_swept() {
        let sessions = UploadSessions::new(Duration::from_secs(1), 1024);
        let repo = repo();
        let id = sessions.open(repo.clone(), None);

        tokio::time::advance(Duration::from_secs(2)).await;

        let error = sessions.status(id, &repo, None).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));

        let other = sessions.open(repo.clone(), None);
        tokio::time::advance(Duration::from_secs(2)).await;
        sessions.sweep();
        assert!(sessions.sessions.is_empty());
        let error = sessions.status(other, &repo, None).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn abort_discards_the_session() {
        let sessions = tracker();
        let repo = repo();
        let id = sessions.open(repo.clone(), None);
        sessions
            .append(id, &repo, None, Bytes::from_static(b"abc"), None)
            .unwrap();

        sessions.abort(id, &repo, None).unwrap();
        let error = sessions.status(id, &repo, None).unwrap_err();
        assert!(matches!(error, RegistryError::SessionNotFound(_)));
    }
}
