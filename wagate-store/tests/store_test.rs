//! Store integration tests.
//!
//! The Postgres tests run only when `WAGATE_TEST_DATABASE_URL` points at a
//! disposable database.

use std::sync::Arc;
use wagate_store::{open_store, AuthState, Creds, MemoryStore, SessionRecord, Store};

fn memory() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

// ───────────────────────────────────────────────────────────────────────────────
// AuthState
// ───────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_state_creds_lifecycle() {
    let store = memory();
    let auth = AuthState::new(store.clone(), "sales");

    assert!(auth.creds().await.unwrap().is_none());
    assert!(!auth.has_credentials().await);

    auth.save_creds(&Creds {
        me: Some("5511999998888@s.whatsapp.net".into()),
        registered: true,
        ..Default::default()
    })
    .await
    .unwrap();

    let creds = auth.creds().await.unwrap().unwrap();
    assert_eq!(creds.me.as_deref(), Some("5511999998888@s.whatsapp.net"));
    assert!(creds.updated_at > 0);
    assert!(auth.has_credentials().await);
}

#[tokio::test]
async fn auth_state_unregistered_creds_do_not_count() {
    let auth = AuthState::new(memory(), "s");
    auth.save_creds(&Creds::default()).await.unwrap();
    assert!(!auth.has_credentials().await);
}

#[tokio::test]
async fn auth_state_category_keys() {
    let store = memory();
    let auth = AuthState::new(store.clone(), "s1");

    auth.set("pre-key", "17", b"key-bytes").await.unwrap();
    assert_eq!(
        auth.get("pre-key", "17").await.unwrap().as_deref(),
        Some(&b"key-bytes"[..])
    );
    assert_eq!(store.keys("s1").await.unwrap(), vec!["pre-key-17"]);

    assert!(auth.delete("pre-key", "17").await.unwrap());
    assert!(auth.get("pre-key", "17").await.unwrap().is_none());
}

#[tokio::test]
async fn auth_state_clear_is_scoped_to_session() {
    let store = memory();
    let a = AuthState::new(store.clone(), "a");
    let b = AuthState::new(store.clone(), "b");

    a.set("session", "x", b"1").await.unwrap();
    a.save_creds(&Creds::default()).await.unwrap();
    b.set("session", "x", b"2").await.unwrap();

    assert_eq!(a.clear().await.unwrap(), 2);
    assert!(a.get("session", "x").await.unwrap().is_none());
    assert!(b.get("session", "x").await.unwrap().is_some());
}

// ───────────────────────────────────────────────────────────────────────────────
// Backend selection
// ───────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn open_store_memory() {
    let store = open_store("memory://", 1).await.unwrap();
    assert_eq!(store.name(), "memory");
    assert!(store.health_check().await);
}

#[tokio::test]
async fn open_store_rejects_unknown_scheme() {
    assert!(open_store("sqlite://x.db", 1).await.is_err());
    assert!(open_store("no-scheme", 1).await.is_err());
}

#[tokio::test]
async fn session_records_upsert_and_delete() {
    let store = memory();
    let mut record = SessionRecord::new("sales");
    record.webhook_url = Some("http://hooks.local/wa".into());
    record.chatwoot = Some(serde_json::json!({ "enabled": true, "account_id": 1 }));
    store.upsert_session(&record).await.unwrap();

    record.status = "open".into();
    record.touch();
    store.upsert_session(&record).await.unwrap();

    let loaded = store.get_session("sales").await.unwrap().unwrap();
    assert_eq!(loaded, record);
    assert_eq!(store.list_sessions().await.unwrap().len(), 1);

    assert!(store.delete_session("sales").await.unwrap());
    assert!(store.get_session("sales").await.unwrap().is_none());
    assert!(!store.delete_session("sales").await.unwrap());
}

#[tokio::test]
async fn deleting_a_session_clears_its_auth_state() {
    let store = memory();
    store.upsert_session(&SessionRecord::new("s1")).await.unwrap();
    let auth = AuthState::new(store.clone(), "s1");
    auth.set("device", "db", b"sqlite-bytes").await.unwrap();
    AuthState::new(store.clone(), "s2")
        .set("device", "db", b"kept")
        .await
        .unwrap();

    assert!(store.delete_session("s1").await.unwrap());
    assert!(store.keys("s1").await.unwrap().is_empty());
    assert_eq!(store.keys("s2").await.unwrap(), vec!["device-db"]);
}

// ───────────────────────────────────────────────────────────────────────────────
// Postgres (opt-in)
// ───────────────────────────────────────────────────────────────────────────────

async fn postgres() -> Option<Arc<dyn Store>> {
    let url = std::env::var("WAGATE_TEST_DATABASE_URL").ok()?;
    Some(open_store(&url, 2).await.expect("postgres reachable"))
}

#[tokio::test]
async fn postgres_roundtrip() {
    let Some(store) = postgres().await else {
        return;
    };
    assert_eq!(store.name(), "postgres");
    assert!(store.health_check().await);

    let id = format!("it-{}", std::process::id());
    let mut record = SessionRecord::new(&id);
    record.chatwoot = Some(serde_json::json!({ "inbox": "WhatsApp" }));
    store.upsert_session(&record).await.unwrap();
    assert_eq!(store.get_session(&id).await.unwrap(), Some(record));

    let auth = AuthState::new(store.clone(), &id);
    auth.set("device", "db", &[0u8, 1, 2, 255]).await.unwrap();
    assert_eq!(
        auth.get("device", "db").await.unwrap(),
        Some(vec![0u8, 1, 2, 255])
    );

    assert_eq!(auth.clear().await.unwrap(), 1);

    auth.set("device", "db", b"again").await.unwrap();
    assert!(store.delete_session(&id).await.unwrap());
    assert!(store.keys(&id).await.unwrap().is_empty());
}
