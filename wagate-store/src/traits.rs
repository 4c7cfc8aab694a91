//! Storage traits and record types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persisted description of one WhatsApp session.
///
/// Live connection state lives in the session manager; this is what
/// survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    /// Last known lifecycle status (`open`, `closed`, `logged_out`, ...).
    pub status: String,
    /// Own JID once paired.
    #[serde(default)]
    pub me_jid: Option<String>,
    /// Per-session event webhook, overriding the global one.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Chatwoot provider settings, opaque to the store.
    #[serde(default)]
    pub chatwoot: Option<serde_json::Value>,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Last update timestamp (Unix millis)
    pub updated_at: i64,
}

impl SessionRecord {
    /// Create a new record with current timestamps.
    pub fn new(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            status: "closed".into(),
            me_jid: None,
            webhook_url: None,
            chatwoot: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }
}

/// Key/value store for the protocol's authentication state, partitioned by
/// session.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Read a value. `None` if the key was never written.
    async fn read(&self, session_id: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn write(&self, session_id: &str, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Remove a value. Returns true if it existed.
    async fn remove(&self, session_id: &str, key: &str) -> anyhow::Result<bool>;

    /// Remove every value of a session. Returns the number removed.
    async fn clear(&self, session_id: &str) -> anyhow::Result<usize>;

    /// List the keys stored for a session.
    async fn keys(&self, session_id: &str) -> anyhow::Result<Vec<String>>;
}

/// Session record persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record.
    async fn upsert_session(&self, record: &SessionRecord) -> anyhow::Result<()>;

    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>>;

    /// All records, oldest first.
    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>>;

    /// Delete a record. Returns true if it existed.
    async fn delete_session(&self, id: &str) -> anyhow::Result<bool>;
}

/// A complete storage backend.
#[async_trait]
pub trait Store: AuthStore + SessionStore {
    /// Backend name (e.g., "postgres", "memory")
    fn name(&self) -> &str;

    /// Returns true if the backend is operational.
    async fn health_check(&self) -> bool;
}
