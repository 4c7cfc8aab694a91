//! In-memory store for tests and throwaway deployments (`memory://`).

use crate::traits::{AuthStore, SessionRecord, SessionStore, Store};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Volatile backend. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    auth: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn read(&self, session_id: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let auth = self.auth.read().await;
        Ok(auth.get(session_id).and_then(|kv| kv.get(key)).cloned())
    }

    async fn write(&self, session_id: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut auth = self.auth.write().await;
        auth.entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, session_id: &str, key: &str) -> anyhow::Result<bool> {
        let mut auth = self.auth.write().await;
        Ok(auth
            .get_mut(session_id)
            .and_then(|kv| kv.remove(key))
            .is_some())
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<usize> {
        let mut auth = self.auth.write().await;
        Ok(auth.remove(session_id).map_or(0, |kv| kv.len()))
    }

    async fn keys(&self, session_id: &str) -> anyhow::Result<Vec<String>> {
        let auth = self.auth.read().await;
        let mut keys: Vec<String> = auth
            .get(session_id)
            .map(|kv| kv.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn upsert_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> =
            self.sessions.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self.sessions.write().await.remove(id).is_some();
        self.auth.write().await.remove(id);
        Ok(removed)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_roundtrip_and_isolation() {
        let store = MemoryStore::new();
        store.write("a", "creds", b"one").await.unwrap();
        store.write("b", "creds", b"two").await.unwrap();

        assert_eq!(store.read("a", "creds").await.unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(store.read("b", "creds").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert!(store.read("a", "missing").await.unwrap().is_none());

        assert!(store.remove("a", "creds").await.unwrap());
        assert!(!store.remove("a", "creds").await.unwrap());
        assert!(store.read("b", "creds").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_and_keys() {
        let store = MemoryStore::new();
        store.write("s", "pre-key-2", b"x").await.unwrap();
        store.write("s", "pre-key-1", b"y").await.unwrap();

        assert_eq!(store.keys("s").await.unwrap(), vec!["pre-key-1", "pre-key-2"]);
        assert_eq!(store.clear("s").await.unwrap(), 2);
        assert!(store.keys("s").await.unwrap().is_empty());
        assert_eq!(store.clear("s").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sessions_listed_oldest_first() {
        let store = MemoryStore::new();
        let mut newer = SessionRecord::new("newer");
        newer.created_at = 200;
        let mut older = SessionRecord::new("older");
        older.created_at = 100;

        store.upsert_session(&newer).await.unwrap();
        store.upsert_session(&older).await.unwrap();

        let ids: Vec<String> = store
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["older", "newer"]);
    }

    #[tokio::test]
    async fn test_delete_session_drops_auth_state() {
        let store = MemoryStore::new();
        store.upsert_session(&SessionRecord::new("s1")).await.unwrap();
        store.write("s1", "device-db", b"db").await.unwrap();
        store.write("s2", "device-db", b"other").await.unwrap();

        assert!(store.delete_session("s1").await.unwrap());
        assert!(store.keys("s1").await.unwrap().is_empty());
        assert_eq!(store.keys("s2").await.unwrap(), vec!["device-db"]);
    }
}
