use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dataset::Dataset;
use crate::engine::QueryResponse;
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub filename: String,
    pub dataset: Arc<Dataset>,
    pub loaded_at: DateTime<Utc>,
}

/// One asked question and its answer
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub query: String,
    pub response: QueryResponse,
    pub asked_at: DateTime<Utc>,
}

/// Append-only, chronological
pub type History = Vec<HistoryEntry>;

#[derive(Debug)]
pub struct Session {
    pub dataset: Option<LoadedDataset>,
    pub history: History,
    pub created_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            dataset: None,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Locked for the whole of one interaction, so a session handles its
/// requests one at a time while other sessions proceed.
pub type SessionHandle = Arc<Mutex<Session>>;

struct StoredSession {
    handle: SessionHandle,
    /// Unix millis of the last lookup
    last_seen: AtomicI64,
}

impl StoredSession {
    fn new() -> Self {
        Self {
            handle: Arc::new(Mutex::new(Session::default())),
            last_seen: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn touch(&self) {
        self.last_seen.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn idle_for(&self, now_millis: i64) -> Duration {
        let idle = now_millis.saturating_sub(self.last_seen.load(Ordering::Relaxed));
        Duration::from_millis(idle.max(0) as u64)
    }

    /// A request still holding the handle keeps the session alive.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, StoredSession>>>,
}

impl SessionStore {
    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        guard.insert(id, StoredSession::new());
        info!(session_id = %id, sessions = guard.len(), "Session created");
        id
    }

    pub async fn get(&self, id: &Uuid) -> AppResult<SessionHandle> {
        let guard = self.inner.read().await;
        let stored = guard
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;
        stored.touch();
        Ok(stored.handle.clone())
    }

    /// Ending a session drops its dataset and history.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let removed = guard.remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Drop sessions nobody has looked up for `max_idle`. Returns how many went.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Utc::now().timestamp_millis();
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|id, stored| {
            let keep = stored.in_use() || stored.idle_for(now) < max_idle;
            if !keep {
                debug!(session_id = %id, "Session expired");
            }
            keep
        });
        let expired = before - guard.len();
        if expired > 0 {
            info!(expired, sessions = guard.len(), "Idle sessions expired");
        }
        expired
    }

    /// Sweep idle sessions every `every` until the runtime shuts down.
    pub fn spawn_expiry(&self, max_idle: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.expire_idle(max_idle).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::default();
        let a = store.create().await;
        let b = store.create().await;

        store.get(&a).await.unwrap().lock().await.history.push(HistoryEntry {
            query: "q".into(),
            response: QueryResponse::Text("r".into()),
            asked_at: Utc::now(),
        });

        assert_eq!(store.get(&a).await.unwrap().lock().await.history.len(), 1);
        assert!(store.get(&b).await.unwrap().lock().await.history.is_empty());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_and_removed_sessions() {
        let store = SessionStore::default();
        assert!(matches!(store.get(&Uuid::new_v4()).await, Err(AppError::NotFound(_))));

        let id = store.create().await;
        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
        assert!(store.get(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire_unless_in_use() {
        let store = SessionStore::default();
        let idle = store.create().await;
        let busy = store.create().await;
        let held = store.get(&busy).await.unwrap();

        assert_eq!(store.expire_idle(Duration::from_secs(3600)).await, 0);
        assert_eq!(store.len().await, 2);

        assert_eq!(store.expire_idle(Duration::ZERO).await, 1);
        assert!(matches!(store.get(&idle).await, Err(AppError::NotFound(_))));
        assert!(store.get(&busy).await.is_ok());

        drop(held);
        assert_eq!(store.expire_idle(Duration::ZERO).await, 1);
        assert!(matches!(store.get(&busy).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expiry_task_sweeps_on_schedule() {
        let store = SessionStore::default();
        let id = store.create().await;
        let sweeper = store.spawn_expiry(Duration::ZERO, Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(matches!(store.get(&id).await, Err(AppError::NotFound(_))));
        sweeper.abort();
    }
}
