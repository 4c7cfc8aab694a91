//! Per-session view of the auth key/value store.
//!
//! Keys are laid out as `creds` for the account credentials and
//! `{category}-{id}` for everything else (pre-keys, sessions, sender keys,
//! app-state sync keys, device snapshots).

use crate::traits::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CREDS_KEY: &str = "creds";

/// Account credentials summary kept next to the protocol keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Creds {
    /// Own JID once paired.
    #[serde(default)]
    pub me: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// True once the phone has confirmed the pairing.
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub paired_at: Option<i64>,
    #[serde(default)]
    pub updated_at: i64,
}

/// Auth state handle bound to one session.
#[derive(Clone)]
pub struct AuthState {
    store: Arc<dyn Store>,
    session_id: String,
}

impl AuthState {
    pub fn new(store: Arc<dyn Store>, session_id: impl Into<String>) -> Self {
        Self {
            store,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn key(category: &str, id: &str) -> String {
        format!("{category}-{id}")
    }

    /// Load credentials, `None` for a session that never paired.
    pub async fn creds(&self) -> anyhow::Result<Option<Creds>> {
        match self.store.read(&self.session_id, CREDS_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_creds(&self, creds: &Creds) -> anyhow::Result<()> {
        let mut creds = creds.clone();
        creds.updated_at = chrono::Utc::now().timestamp_millis();
        let raw = serde_json::to_vec(&creds)?;
        self.store.write(&self.session_id, CREDS_KEY, &raw).await
    }

    pub async fn get(&self, category: &str, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.store
            .read(&self.session_id, &Self::key(category, id))
            .await
    }

    pub async fn set(&self, category: &str, id: &str, value: &[u8]) -> anyhow::Result<()> {
        self.store
            .write(&self.session_id, &Self::key(category, id), value)
            .await
    }

    pub async fn delete(&self, category: &str, id: &str) -> anyhow::Result<bool> {
        self.store
            .remove(&self.session_id, &Self::key(category, id))
            .await
    }

    /// Drop all credentials and keys, forcing a fresh QR pairing.
    pub async fn clear(&self) -> anyhow::Result<usize> {
        let removed = self.store.clear(&self.session_id).await?;
        tracing::info!(session = %self.session_id, removed, "Auth state cleared");
        Ok(removed)
    }

    /// Whether the session has completed pairing at least once.
    pub async fn has_credentials(&self) -> bool {
        matches!(self.creds().await, Ok(Some(creds)) if creds.registered)
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("backend", &self.store.name())
            .field("session_id", &self.session_id)
            .finish()
    }
}
