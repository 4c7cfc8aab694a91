//! Route definitions.
//!
//! Everything under `/sessions` requires the API key; health probes and the
//! Chatwoot webhook (authenticated by its unguessable per-session URL) do not.

mod chats;
mod chatwoot;
mod groups;
mod health;
mod messages;
mod sessions;

pub use health::HealthResponse;

use crate::auth::{request_id, require_api_key, ApiKey};
use crate::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Base64 media travels in JSON bodies.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;
/// Media sends download, upload and wait for the server ack.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_key = ApiKey::new(state.config.auth.api_key.as_deref());

    let protected = Router::new()
        .route("/sessions", post(sessions::create).get(sessions::list))
        .route("/sessions/:id", get(sessions::get).delete(sessions::delete))
        .route("/sessions/:id/qr", get(sessions::qr))
        .route("/sessions/:id/restart", post(sessions::restart))
        .route("/sessions/:id/logout", post(sessions::logout))
        .route("/sessions/:id/webhook", put(sessions::set_webhook))
        .route("/sessions/:id/messages/text", post(messages::send_text))
        .route("/sessions/:id/messages/media", post(messages::send_media))
        .route("/sessions/:id/messages/location", post(messages::send_location))
        .route("/sessions/:id/chats/presence", post(chats::presence))
        .route("/sessions/:id/groups", post(groups::create))
        .route("/sessions/:id/groups/:jid", get(groups::metadata).delete(groups::leave))
        .route("/sessions/:id/groups/:jid/subject", put(groups::update_subject))
        .route("/sessions/:id/groups/:jid/participants", post(groups::update_participants))
        .route("/sessions/:id/groups/:jid/invite", get(groups::invite_code))
        .route(
            "/sessions/:id/chatwoot",
            get(chatwoot::get_settings).put(chatwoot::set_settings),
        )
        .layer(middleware::from_fn_with_state(api_key, require_api_key));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/chatwoot/webhook/:id", post(chatwoot::webhook));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
}
