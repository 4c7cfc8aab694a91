//! Postgres backend.
//!
//! Schema:
//! - `wa_sessions` - one row per session record, Chatwoot settings as JSON text
//! - `wa_auth_state` - protocol auth key/values, keyed by (session_id, key)

use crate::traits::{AuthStore, SessionRecord, SessionStore, Store};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wa_sessions (
        id          TEXT PRIMARY KEY,
        status      TEXT NOT NULL,
        me_jid      TEXT,
        webhook_url TEXT,
        chatwoot    TEXT,
        created_at  BIGINT NOT NULL,
        updated_at  BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wa_auth_state (
        session_id TEXT NOT NULL,
        key        TEXT NOT NULL,
        value      BYTEA NOT NULL,
        updated_at BIGINT NOT NULL,
        PRIMARY KEY (session_id, key)
    )
    "#,
];

type SessionRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    i64,
);

/// Postgres-backed store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and create the schema if needed.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to Postgres")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables if they do not exist.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create schema")?;
        }
        tracing::debug!("Postgres schema ready");
        Ok(())
    }

    fn row_to_record(row: SessionRow) -> SessionRecord {
        let (id, status, me_jid, webhook_url, chatwoot, created_at, updated_at) = row;
        let chatwoot = chatwoot.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "Ignoring unreadable chatwoot settings");
                None
            }
        });

        SessionRecord {
            id,
            status,
            me_jid,
            webhook_url,
            chatwoot,
            created_at,
            updated_at,
        }
    }
}

#[async_trait]
impl AuthStore for PostgresStore {
    async fn read(&self, session_id: &str, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT value FROM wa_auth_state WHERE session_id = $1 AND key = $2")
                .bind(session_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("auth read failed for {session_id}/{key}"))?;

        Ok(row.map(|(value,)| value))
    }

    async fn write(&self, session_id: &str, key: &str, value: &[u8]) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO wa_auth_state (session_id, key, value, updated_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (session_id, key) \
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("auth write failed for {session_id}/{key}"))?;

        Ok(())
    }

    async fn remove(&self, session_id: &str, key: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM wa_auth_state WHERE session_id = $1 AND key = $2")
            .bind(session_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("auth remove failed for {session_id}/{key}"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, session_id: &str) -> anyhow::Result<usize> {
        let result = sqlx::query("DELETE FROM wa_auth_state WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("auth clear failed for {session_id}"))?;

        Ok(result.rows_affected() as usize)
    }

    async fn keys(&self, session_id: &str) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM wa_auth_state WHERE session_id = $1 ORDER BY key")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("auth keys failed for {session_id}"))?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn upsert_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let chatwoot = record
            .chatwoot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO wa_sessions (id, status, me_jid, webhook_url, chatwoot, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET \
                status = excluded.status, \
                me_jid = excluded.me_jid, \
                webhook_url = excluded.webhook_url, \
                chatwoot = excluded.chatwoot, \
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.status)
        .bind(&record.me_jid)
        .bind(&record.webhook_url)
        .bind(chatwoot)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_session failed for {}", record.id))?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, status, me_jid, webhook_url, chatwoot, created_at, updated_at \
             FROM wa_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("get_session failed for {id}"))?;

        Ok(row.map(Self::row_to_record))
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, status, me_jid, webhook_url, chatwoot, created_at, updated_at \
             FROM wa_sessions ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .context("list_sessions failed")?;

        Ok(rows.into_iter().map(Self::row_to_record).collect())
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("delete_session: begin transaction failed")?;

        sqlx::query("DELETE FROM wa_auth_state WHERE session_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("delete_session: auth cleanup failed for {id}"))?;

        let result = sqlx::query("DELETE FROM wa_sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("delete_session failed for {id}"))?;

        tx.commit()
            .await
            .with_context(|| format!("delete_session: commit failed for {id}"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
