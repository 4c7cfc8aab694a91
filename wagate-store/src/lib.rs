//! wagate Store - Persistence for session records and WhatsApp auth state.
//!
//! Two backends behind one [`Store`] trait:
//! - Postgres (`postgres://...`) for real deployments
//! - In-memory (`memory://`) for tests and throwaway runs
//!
//! ```text
//! SessionManager ──► SessionStore ──┐
//!                                   ├── Arc<dyn Store> ──► Postgres | Memory
//! Socket driver ───► AuthState ─────┘       (AuthStore)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth_state;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use auth_state::{AuthState, Creds};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{AuthStore, SessionRecord, SessionStore, Store};

use std::sync::Arc;

/// Open the backend selected by a database URL.
pub async fn open_store(url: &str, max_connections: u32) -> anyhow::Result<Arc<dyn Store>> {
    let scheme = url.split_once("://").map_or("", |(scheme, _)| scheme);
    match scheme {
        "memory" => {
            tracing::warn!("Using in-memory store; sessions will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "postgres" | "postgresql" => {
            let store = PostgresStore::connect(url, max_connections).await?;
            tracing::info!(max_connections, "Connected to Postgres");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("Unsupported database scheme '{other}'"),
    }
}
