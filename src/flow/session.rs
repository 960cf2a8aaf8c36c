use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::info;

use super::conversation::{Conversation, ConversationState};

/// One session's conversation. Holding the lock is what makes a caller
/// the single writer for that session.
pub type SessionHandle = Arc<Mutex<Conversation>>;

/// Session-keyed store of conversations with an idle timeout.
///
/// Sessions checked out through [`SessionStore::checkout`] are pinned
/// outside the cache until every lease is dropped, so an expiry during a
/// long running flow never hands a second writer a fresh conversation.
#[derive(Clone, Debug)]
pub struct SessionStore {
    cache: Cache<String, SessionHandle>, // session_id → conversation
    leased: Arc<DashMap<String, (SessionHandle, usize)>>, // session_id → (conversation, leases)
}

/// Keeps a session pinned while a message is being handled.
#[derive(Debug)]
pub struct SessionLease<'a> {
    store: &'a SessionStore,
    session_id: String,
    handle: SessionHandle,
}

impl SessionLease<'_> {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Puts the session back into the cache, restarting its idle timer.
    pub async fn release(self) {
        self.store
            .cache
            .insert(self.session_id.clone(), self.handle.clone())
            .await;
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let unused = match self.store.leased.get_mut(&self.session_id) {
            Some(mut entry) => {
                entry.1 = entry.1.saturating_sub(1);
                entry.1 == 0
            }
            None => false,
        };
        if unused {
            self.store
                .leased
                .remove_if(&self.session_id, |_, (_, leases)| *leases == 0);
        }
    }
}

impl SessionStore {
    /// Creates a new store whose sessions expire after `ttl_secs` without use.
    pub fn new(ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs.max(1)))
            .eviction_listener(|key: Arc<String>, _value: SessionHandle, cause| {
                if cause.was_evicted() {
                    info!("Session expired: key={}, cause={:?}", key, cause);
                }
            })
            .build();
        Self {
            cache,
            leased: Arc::new(DashMap::new()),
        }
    }

    /// Returns an existing session or creates a new idle one.
    pub async fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if let Some(entry) = self.leased.get(session_id) {
            return entry.0.clone();
        }
        self.cache
            .get_with(session_id.to_string(), async {
                Arc::new(Mutex::new(Conversation::new()))
            })
            .await
    }

    /// Like [`get_or_create`](Self::get_or_create), but pins the session
    /// until the returned lease is dropped.
    pub async fn checkout(&self, session_id: &str) -> SessionLease<'_> {
        let candidate = self.get_or_create(session_id).await;
        let handle = {
            let mut entry = self
                .leased
                .entry(session_id.to_string())
                .or_insert_with(|| (candidate, 0));
            entry.1 += 1;
            entry.0.clone()
        };
        SessionLease {
            store: self,
            session_id: session_id.to_string(),
            handle,
        }
    }

    /// Returns an existing session if it exists.
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        if let Some(entry) = self.leased.get(session_id) {
            return Some(entry.0.clone());
        }
        self.cache.get(session_id).await
    }

    /// Current state of a session; unknown sessions are idle.
    pub async fn state_of(&self, session_id: &str) -> ConversationState {
        match self.get(session_id).await {
            Some(handle) => handle.lock().await.state(),
            None => ConversationState::Idle,
        }
    }

    /// Forcefully removes a session.
    pub async fn remove(&self, session_id: &str) {
        self.cache.invalidate(session_id).await;
    }

    /// Clears all sessions (used in tests or shutdown).
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Sessions currently held by a handler.
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InboundMessage;
    use crate::flow::conversation::MidFlowPolicy;
    use crate::flow::router::{CommandRouter, FlowKind, StepId};

    async fn start_audio(store: &SessionStore, session_id: &str) {
        let handle = store.get_or_create(session_id).await;
        let mut conv = handle.lock().await;
        conv.handle(
            &CommandRouter::with_default_flows(),
            MidFlowPolicy::Replace,
            InboundMessage::command("audio"),
        );
    }

    #[tokio::test]
    async fn test_session_store_create_and_retrieve() {
        let store = SessionStore::new(60);
        start_audio(&store, "abc123").await;

        assert_eq!(
            store.state_of("abc123").await,
            ConversationState::AwaitingInput {
                flow: FlowKind::Audio,
                step: StepId::AwaitingQuery
            }
        );
        assert!(store.get("abc123").await.is_some());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = SessionStore::new(60);
        start_audio(&store, "one").await;
        let _ = store.get_or_create("two").await;

        assert!(!store.state_of("one").await.is_idle());
        assert!(store.state_of("two").await.is_idle());
    }

    #[tokio::test]
    async fn test_session_store_removal() {
        let store = SessionStore::new(60);
        start_audio(&store, "abc123").await;

        store.remove("abc123").await;

        assert!(store.get("abc123").await.is_none());
        assert!(store.state_of("abc123").await.is_idle());
        let fresh = store.get_or_create("abc123").await;
        assert!(fresh.lock().await.is_idle());
    }

    #[tokio::test]
    async fn test_clear_sessions() {
        let store = SessionStore::new(60);
        start_audio(&store, "session1").await;

        store.clear();

        assert!(store.state_of("session1").await.is_idle());
    }

    #[tokio::test]
    async fn test_same_handle_for_same_session() {
        let store = SessionStore::new(60);
        let a = store.get_or_create("s").await;
        let b = store.get_or_create("s").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_leased_session_survives_expiry() {
        let store = SessionStore::new(60);
        let lease = store.checkout("s").await;
        start_audio(&store, "s").await;

        // the cache entry goes away while the lease is held
        store.clear();
        store.remove("s").await;

        let again = store.checkout("s").await;
        assert!(Arc::ptr_eq(lease.handle(), again.handle()));
        assert!(!store.state_of("s").await.is_idle());
        assert_eq!(store.leased_count(), 1);

        drop(again);
        assert_eq!(store.leased_count(), 1);
        lease.release().await;
        assert_eq!(store.leased_count(), 0);

        // released sessions are back in the cache with their state
        assert!(!store.state_of("s").await.is_idle());
    }
}
