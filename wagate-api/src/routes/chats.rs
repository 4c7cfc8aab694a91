use crate::error::{ApiJson, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use wagate_common::jid;
use wagate_sessions::ChatPresence;

#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    pub to: String,
    pub presence: ChatPresence,
}

/// Show "typing..." (or stop showing it) in a chat.
pub async fn presence(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<PresenceRequest>,
) -> ApiResult<StatusCode> {
    let to = jid::normalize_recipient(&request.to)?;
    let socket = state.manager.socket(&id).await?;
    socket.send_presence(&to, request.presence).await?;
    Ok(StatusCode::NO_CONTENT)
}
