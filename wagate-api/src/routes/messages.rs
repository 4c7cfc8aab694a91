//! Sending messages.

use crate::error::{ApiJson, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use wagate_sessions::{MediaKind, MediaSource, OutgoingMessage, SentMessage};

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub to: String,
    pub text: String,
}

/// `media` is `{ "url": ... }` or `{ "base64": ... }`.
#[derive(Debug, Deserialize)]
pub struct MediaRequest {
    pub to: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub media: MediaSource,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub to: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

pub async fn send_text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<TextRequest>,
) -> ApiResult<Json<SentMessage>> {
    let sent = state
        .manager
        .send_message(&id, &request.to, OutgoingMessage::text(request.text))
        .await?;
    Ok(Json(sent))
}

pub async fn send_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<MediaRequest>,
) -> ApiResult<Json<SentMessage>> {
    let message = OutgoingMessage::Media {
        kind: request.kind,
        source: request.media,
        caption: request.caption.filter(|c| !c.is_empty()),
        file_name: request.file_name,
        mimetype: request.mimetype,
    };
    Ok(Json(state.manager.send_message(&id, &request.to, message).await?))
}

pub async fn send_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<LocationRequest>,
) -> ApiResult<Json<SentMessage>> {
    let message = OutgoingMessage::Location {
        latitude: request.latitude,
        longitude: request.longitude,
        name: request.name,
        address: request.address,
    };
    Ok(Json(state.manager.send_message(&id, &request.to, message).await?))
}
