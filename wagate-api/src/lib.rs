//! wagate API - multi-tenant WhatsApp REST gateway.
//!
//! ```text
//! Client ─► auth ─► routes ─► SessionManager ─► Socket (whatsapp-rust)
//!                                   │
//!                                   ├─► WebhookDispatcher ─► webhook receivers
//!                                   └─► ChatwootBridge ───► Chatwoot inbox
//! Chatwoot ─► /chatwoot/webhook/:id ─┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod error;
pub mod routes;
pub mod webhook;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::build_router;
pub use webhook::{WebhookDispatcher, WebhookEnvelope};

use std::net::SocketAddr;
use std::sync::Arc;
use wagate_chatwoot::ChatwootBridge;
use wagate_common::config::Config;
use wagate_sessions::{ManagerOptions, SessionManager, SocketFactory, WhatsAppWebFactory};
use wagate_store::Store;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub manager: SessionManager,
    pub bridge: Arc<ChatwootBridge>,
}

impl AppState {
    /// Wire the manager and the Chatwoot bridge over a store and a socket driver.
    pub fn new(config: Config, store: Arc<dyn Store>, factory: Arc<dyn SocketFactory>) -> Self {
        let manager = SessionManager::new(
            store.clone(),
            factory,
            ManagerOptions::from(&config.sessions),
        );
        let bridge = Arc::new(ChatwootBridge::new(
            manager.clone(),
            config.public_url(),
            config.chatwoot.message_cache_size,
        ));
        Self {
            config: Arc::new(config),
            store,
            manager,
            bridge,
        }
    }
}

/// Start the server and run until ctrl-c.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.network.bind.parse::<std::net::IpAddr>()?,
        config.network.port,
    ));

    let store = wagate_store::open_store(&config.database.url, config.database.max_connections).await?;
    tracing::info!(backend = store.name(), "Store opened");

    let factory = Arc::new(WhatsAppWebFactory::new(
        config.data_dir(),
        config.sessions.device_name.clone(),
    ));
    tracing::info!(driver = factory.name(), "Socket driver ready");

    let state = AppState::new(config, store, factory);
    if state.config.auth.api_key.is_none() {
        tracing::warn!("No API key configured; the API is open to anyone who can reach it");
    }

    let dispatcher = Arc::new(WebhookDispatcher::new(
        state.config.webhook.clone(),
        state.manager.clone(),
    ));
    dispatcher.spawn(state.manager.subscribe());
    ChatwootBridge::spawn_processor(state.bridge.clone(), state.manager.subscribe());

    if state.config.sessions.restore_on_start {
        let restored = state.manager.restore_sessions().await?;
        tracing::info!(restored, "Sessions restored");
    }

    let router = build_router(state.clone());
    tracing::info!(public_url = %state.config.public_url(), "Starting wagate on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.manager.shutdown().await;
    tracing::info!("wagate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
