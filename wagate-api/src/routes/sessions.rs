//! Session administration.

use crate::error::{ApiJson, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use wagate_common::Error;
use wagate_sessions::{render_svg, render_text, QrFormat, SessionInfo};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub id: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub url: Option<String>,
}

fn check_webhook_url(url: Option<&str>) -> Result<(), Error> {
    match url {
        Some(u) if !(u.starts_with("http://") || u.starts_with("https://")) => Err(
            Error::InvalidInput(format!("webhook url must be http(s): '{u}'")),
        ),
        _ => Ok(()),
    }
}

pub async fn create(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionInfo>)> {
    let webhook_url = request.webhook_url.filter(|u| !u.trim().is_empty());
    check_webhook_url(webhook_url.as_deref())?;
    let info = state.manager.create_session(&request.id, webhook_url).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.manager.list().await;
    Json(ListSessionsResponse {
        total: sessions.len(),
        sessions,
    })
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.manager.info(&id).await?))
}

/// Latest pairing code as JSON (`raw`), an SVG image, or terminal text.
pub async fn qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<QrQuery>, axum::extract::rejection::QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    let format: QrFormat = match query.format.as_deref() {
        Some(f) => f.parse()?,
        None => QrFormat::default(),
    };
    let snapshot = state.manager.qr(&id).await?;

    let response = match format {
        QrFormat::Raw => Json(snapshot).into_response(),
        QrFormat::Svg => (
            [(header::CONTENT_TYPE, "image/svg+xml")],
            render_svg(&snapshot.code)?,
        )
            .into_response(),
        QrFormat::Text => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            render_text(&snapshot.code)?,
        )
            .into_response(),
    };
    Ok(response)
}

pub async fn restart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.manager.restart(&id).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.manager.logout(&id).await?))
}

pub async fn set_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<WebhookRequest>,
) -> ApiResult<Json<SessionInfo>> {
    let url = request.url.filter(|u| !u.trim().is_empty());
    check_webhook_url(url.as_deref())?;
    state.manager.set_webhook(&id, url).await?;
    Ok(Json(state.manager.info(&id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete(&id).await?;
    state.bridge.forget_session(&id);
    Ok(StatusCode::NO_CONTENT)
}
