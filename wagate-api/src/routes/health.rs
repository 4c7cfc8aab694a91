use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

fn response(status: &str, store: Option<&str>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "wagate".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.map(str::to_string),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(response("healthy", None))
}

/// Ready once the store answers.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.name();
    if state.store.health_check().await {
        (StatusCode::OK, Json(response("ready", Some(store))))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(response("not_ready", Some(store))),
        )
    }
}
