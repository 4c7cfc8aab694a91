//! Group management. `:jid` accepts `120363...@g.us` or the bare id.

use crate::error::{ApiJson, ApiResult};
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use wagate_common::{jid, Error, Result};
use wagate_sessions::{GroupInfo, ParticipantAction, ParticipantResult};

const INVITE_BASE: &str = "https://chat.whatsapp.com/";
const MAX_SUBJECT_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubjectRequest {
    pub subject: String,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantsRequest {
    pub action: ParticipantAction,
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub results: Vec<ParticipantResult>,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub code: String,
    pub url: String,
}

fn check_subject(subject: &str) -> Result<&str> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(Error::InvalidInput("subject must not be empty".into()));
    }
    if subject.chars().count() > MAX_SUBJECT_CHARS {
        return Err(Error::InvalidInput(format!(
            "subject is longer than {MAX_SUBJECT_CHARS} characters"
        )));
    }
    Ok(subject)
}

fn participant_jids(participants: &[String]) -> Result<Vec<String>> {
    participants
        .iter()
        .map(|p| jid::normalize_recipient(p))
        .collect()
}

pub async fn create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<GroupInfo>)> {
    let subject = check_subject(&request.subject)?;
    let participants = participant_jids(&request.participants)?;
    let socket = state.manager.socket(&id).await?;
    let group = socket.group_create(subject, &participants).await?;
    tracing::info!(session = %id, group = %group.jid, "Group created");
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn metadata(
    State(state): State<AppState>,
    Path((id, group)): Path<(String, String)>,
) -> ApiResult<Json<GroupInfo>> {
    let group = jid::normalize_group(&group)?;
    let socket = state.manager.socket(&id).await?;
    Ok(Json(socket.group_metadata(&group).await?))
}

pub async fn update_subject(
    State(state): State<AppState>,
    Path((id, group)): Path<(String, String)>,
    ApiJson(request): ApiJson<SubjectRequest>,
) -> ApiResult<StatusCode> {
    let group = jid::normalize_group(&group)?;
    let subject = check_subject(&request.subject)?;
    let socket = state.manager.socket(&id).await?;
    socket.group_update_subject(&group, subject).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Per-participant results; partial failures are reported, not raised.
pub async fn update_participants(
    State(state): State<AppState>,
    Path((id, group)): Path<(String, String)>,
    ApiJson(request): ApiJson<ParticipantsRequest>,
) -> ApiResult<Json<ParticipantsResponse>> {
    let group = jid::normalize_group(&group)?;
    if request.participants.is_empty() {
        return Err(Error::InvalidInput("participants must not be empty".into()).into());
    }
    let participants = participant_jids(&request.participants)?;
    let socket = state.manager.socket(&id).await?;
    let results = socket
        .group_participants_update(&group, &participants, request.action)
        .await?;
    tracing::info!(
        session = %id,
        group = %group,
        action = request.action.as_str(),
        count = results.len(),
        "Group participants updated"
    );
    Ok(Json(ParticipantsResponse { results }))
}

pub async fn invite_code(
    State(state): State<AppState>,
    Path((id, group)): Path<(String, String)>,
) -> ApiResult<Json<InviteResponse>> {
    let group = jid::normalize_group(&group)?;
    let socket = state.manager.socket(&id).await?;
    let code = socket.group_invite_code(&group).await?;
    Ok(Json(InviteResponse {
        url: format!("{INVITE_BASE}{code}"),
        code,
    }))
}

pub async fn leave(
    State(state): State<AppState>,
    Path((id, group)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let group = jid::normalize_group(&group)?;
    let socket = state.manager.socket(&id).await?;
    socket.group_leave(&group).await?;
    Ok(StatusCode::NO_CONTENT)
}
