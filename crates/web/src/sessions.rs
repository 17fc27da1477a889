//! In-memory merge session store.
//!
//! Sessions live only for the interactive review. They are dropped once their
//! merge commit is published, when abandoned, or after sitting idle past the
//! configured TTL.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use mergeway_core::conflict::{ConflictResolver, ResolutionState};
use mergeway_core::models::MergeConflictSession;

/// One reviewer's session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub resolver: ConflictResolver,
    pub last_touched: DateTime<Utc>,
    /// Set while a merge commit is being written; edits are refused.
    pub committing: bool,
}

/// Why a session could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAccess {
    Missing,
    Committing,
}

/// Sessions keyed by id.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: i64::try_from(ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    pub async fn insert(&self, resolver: ConflictResolver) -> Uuid {
        let id = Uuid::new_v4();
        let entry = SessionEntry {
            resolver,
            last_touched: Utc::now(),
            committing: false,
        };
        self.sessions.write().await.insert(id, entry);
        debug!(%id, "merge session created");
        id
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: Uuid) -> Option<SessionEntry> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Run `f` against a session that is not being committed, refreshing
    /// its idle timer.
    pub async fn update<R>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut ConflictResolver) -> R,
    ) -> Result<R, SessionAccess> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionAccess::Missing)?;
        if entry.committing {
            return Err(SessionAccess::Committing);
        }
        entry.last_touched = Utc::now();
        Ok(f(&mut entry.resolver))
    }

    /// Mark a session as committing and hand out what the synthesizer needs.
    pub async fn begin_commit(
        &self,
        id: Uuid,
    ) -> Result<(Arc<MergeConflictSession>, ResolutionState), SessionAccess> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(SessionAccess::Missing)?;
        if entry.committing {
            return Err(SessionAccess::Committing);
        }
        entry.committing = true;
        entry.last_touched = Utc::now();
        Ok((
            Arc::clone(entry.resolver.session()),
            entry.resolver.state().clone(),
        ))
    }

    /// Reopen a session for edits after a failed commit.
    pub async fn end_commit(&self, id: Uuid) {
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.committing = false;
            entry.last_touched = Utc::now();
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            debug!(%id, "merge session removed");
        }
        removed
    }

    /// Drop sessions idle since before `now - ttl`. Sessions mid-commit are
    /// kept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        // A TTL reaching past the representable range never expires anything.
        let Some(cutoff) = now.checked_sub_signed(self.ttl) else {
            return 0;
        };
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, e| e.committing || e.last_touched >= cutoff);
        let swept = before - sessions.len();
        if swept > 0 {
            info!(swept, remaining = sessions.len(), "expired merge sessions dropped");
        }
        swept
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergeway_core::models::{ConflictFileReport, Hunk, RepoSlug};

    fn resolver() -> ConflictResolver {
        let session = MergeConflictSession {
            repo: RepoSlug::new("acme", "widgets"),
            merge_base_sha: "m".into(),
            base_branch: "main".into(),
            head_branch: "feature".into(),
            base_sha: "b".into(),
            base_tree_sha: "t".into(),
            head_sha: "h".into(),
            files: vec![ConflictFileReport::new(
                "a.txt",
                vec![Hunk::Conflict {
                    base_lines: vec!["X".into()],
                    head_lines: vec!["Y".into()],
                }],
            )],
            truncated: false,
            total_changed_files: 1,
            fetched_at: Utc::now(),
        };
        ConflictResolver::new(Arc::new(session))
    }

    #[tokio::test]
    async fn test_commit_blocks_edits_until_released() {
        let store = SessionStore::new(60);
        let id = store.insert(resolver()).await;

        store.begin_commit(id).await.unwrap();
        assert_eq!(
            store.update(id, |r| r.accept_base("a.txt", 0)).await.err(),
            Some(SessionAccess::Committing)
        );
        assert_eq!(store.begin_commit(id).await.err(), Some(SessionAccess::Committing));

        store.end_commit(id).await;
        store
            .update(id, |r| r.accept_base("a.txt", 0))
            .await
            .unwrap()
            .unwrap();
        assert!(store.get(id).await.unwrap().resolver.is_complete());
    }

    #[tokio::test]
    async fn test_sweep_drops_idle_sessions_only() {
        let store = SessionStore::new(60);
        let idle = store.insert(resolver()).await;
        let busy = store.insert(resolver()).await;
        store.begin_commit(busy).await.unwrap();

        assert_eq!(store.sweep_expired(Utc::now()).await, 0);
        let later = Utc::now() + Duration::seconds(120);
        assert_eq!(store.sweep_expired(later).await, 1);
        assert!(store.get(idle).await.is_none());
        assert!(store.get(busy).await.is_some());
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        for ttl in [10_000_000_000_000, u64::MAX] {
            let store = SessionStore::new(ttl);
            let id = store.insert(resolver()).await;
            assert_eq!(store.sweep_expired(Utc::now()).await, 0);
            assert!(store.get(id).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = SessionStore::new(60);
        let id = Uuid::new_v4();
        assert_eq!(store.update(id, |_| ()).await.err(), Some(SessionAccess::Missing));
        assert!(!store.remove(id).await);
        assert!(store.is_empty().await);
    }
}
