//! Chatwoot provider settings and the inbox webhook.

use crate::error::{ApiJson, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use wagate_chatwoot::{ChatwootSettings, WebhookOutcome, WebhookPayload};

/// Settings as returned by the API: token redacted, webhook URL included so
/// it can be pasted into an inbox created by hand.
#[derive(Debug, Serialize)]
pub struct ChatwootView {
    #[serde(flatten)]
    pub settings: ChatwootSettings,
    pub webhook_url: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
}

impl From<WebhookOutcome> for WebhookAck {
    fn from(outcome: WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Ignored => Self {
                status: "ignored",
                sent: None,
            },
            WebhookOutcome::Sent(n) => Self {
                status: "sent",
                sent: Some(n),
            },
            WebhookOutcome::ConversationClosed => Self {
                status: "conversation_closed",
                sent: None,
            },
        }
    }
}

fn view(state: &AppState, id: &str, settings: ChatwootSettings) -> ChatwootView {
    ChatwootView {
        settings: settings.redacted(),
        webhook_url: state.bridge.webhook_url(id),
    }
}

pub async fn get_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChatwootView>> {
    let settings = state.bridge.settings(&id).await?;
    Ok(Json(view(&state, &id, settings)))
}

pub async fn set_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(settings): ApiJson<ChatwootSettings>,
) -> ApiResult<Json<ChatwootView>> {
    let settings = state.bridge.configure(&id, settings).await?;
    Ok(Json(view(&state, &id, settings)))
}

/// Called by Chatwoot for every event of the session's inbox.
pub async fn webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<WebhookPayload>,
) -> ApiResult<Json<WebhookAck>> {
    tracing::debug!(session = %id, event = %payload.event, "Chatwoot webhook");
    let outcome = state.bridge.handle_webhook(&id, payload).await?;
    Ok(Json(outcome.into()))
}
