use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

use crate::config::SessionsConfig;
use crate::engine::ConversationEngine;

struct SessionEntry {
    engine: Arc<Mutex<ConversationEngine>>,
    last_seen: Instant,
}

/// In-memory map from session id to its conversation engine.
///
/// The registry is bounded two ways: entries idle past the TTL are dropped
/// on the next access, and when the map is full the least recently used
/// entry makes room for the new one.
pub struct SessionRegistry {
    sessions: HashMap<String, SessionEntry>,
    capacity: usize,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity: config.capacity,
            ttl: Duration::from_secs(config.ttl_minutes * 60),
        }
    }

    #[cfg(test)]
    fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            capacity,
            ttl,
        }
    }

    fn sweep_expired(&mut self) {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions
            .retain(|_, entry| entry.last_seen.elapsed() < ttl);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            info!(dropped, "Expired idle sessions");
        }
    }

    pub fn has(&mut self, session_id: &str) -> bool {
        self.sweep_expired();
        self.sessions.contains_key(session_id)
    }

    /// Fetch a session's engine, refreshing its idle clock.
    pub fn get(&mut self, session_id: &str) -> Option<Arc<Mutex<ConversationEngine>>> {
        self.sweep_expired();
        let entry = self.sessions.get_mut(session_id)?;
        entry.last_seen = Instant::now();
        Some(entry.engine.clone())
    }

    /// Register an engine under a session id, evicting the least recently
    /// used session when full.
    pub fn insert(&mut self, session_id: String, engine: ConversationEngine) {
        self.sweep_expired();
        if self.sessions.len() >= self.capacity && !self.sessions.contains_key(&session_id) {
            let oldest = self
                .sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                info!(session_id = %id, "Evicting least recently used session");
                self.sessions.remove(&id);
            }
        }
        self.sessions.insert(
            session_id,
            SessionEntry {
                engine: Arc::new(Mutex::new(engine)),
                last_seen: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CompletionClient;
    use crate::state::{ChatStore, SqliteChatStore};
    use crate::testing::{MockProvider, MockRetriever};
    use crate::tools::ToolDispatcher;

    async fn engine() -> ConversationEngine {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::in_memory().await.unwrap());
        let user_id = store.create_user("alice").await.unwrap();
        let client = CompletionClient::new(Arc::new(MockProvider::with_results(vec![])), "m");
        let dispatcher = ToolDispatcher::new(Arc::new(MockRetriever::new()));
        ConversationEngine::new(client, dispatcher, store, user_id, "sys")
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let mut registry = SessionRegistry::with_limits(4, Duration::from_secs(60));
        registry.insert("s1".to_string(), engine().await);

        assert!(registry.has("s1"));
        assert!(registry.get("s1").is_some());
        assert!(registry.get("s2").is_none());
    }

    #[tokio::test]
    async fn full_registry_evicts_least_recently_used() {
        let mut registry = SessionRegistry::with_limits(2, Duration::from_secs(60));
        registry.insert("s1".to_string(), engine().await);
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.insert("s2".to_string(), engine().await);
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touch s1 so s2 becomes the oldest.
        let _ = registry.get("s1");
        registry.insert("s3".to_string(), engine().await);

        assert_eq!(registry.len(), 2);
        assert!(registry.has("s1"));
        assert!(!registry.has("s2"));
        assert!(registry.has("s3"));
    }

    #[tokio::test]
    async fn reinserting_existing_id_does_not_evict() {
        let mut registry = SessionRegistry::with_limits(2, Duration::from_secs(60));
        registry.insert("s1".to_string(), engine().await);
        registry.insert("s2".to_string(), engine().await);
        registry.insert("s2".to_string(), engine().await);

        assert_eq!(registry.len(), 2);
        assert!(registry.has("s1"));
    }

    #[tokio::test]
    async fn idle_sessions_expire_on_access() {
        let mut registry = SessionRegistry::with_limits(4, Duration::from_millis(10));
        registry.insert("s1".to_string(), engine().await);
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert!(!registry.has("s1"));
        assert_eq!(registry.len(), 0);
    }
}
