//! Integration tests for the HTTP API.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use common::{test_config, test_state, wait_for_status, API_KEY, QR_CODE};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wagate_api::{build_router, AppState};
use wagate_sessions::{ChatPresence, OutgoingMessage, SessionStatus};

fn app_with_key() -> (Router, AppState, std::sync::Arc<common::FakeFactory>) {
    let (state, factory) = test_state(test_config(Some(API_KEY)));
    (build_router(state.clone()), state, factory)
}

/// Make an authenticated request and return status and JSON body
/// (`Value::Null` for empty bodies).
async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("apikey", API_KEY);
    let request = match body {
        Some(b) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn open_session(app: &Router, state: &AppState, id: &str) {
    let (status, _) = call(app, Method::POST, "/sessions", Some(json!({ "id": id }))).await;
    assert_eq!(status, StatusCode::CREATED);
    wait_for_status(state, id, SessionStatus::Open).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Health and auth
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_needs_no_key() {
    let (app, _, _) = app_with_key();
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "wagate");
}

#[tokio::test]
async fn test_ready_reports_store() {
    let (app, _, _) = app_with_key();
    let request = Request::get("/ready").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["store"], "memory");
}

#[tokio::test]
async fn test_sessions_require_api_key() {
    let (app, _, _) = app_with_key();

    let request = Request::get("/sessions").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["code"], "unauthorized");

    let request = Request::get("/sessions")
        .header("apikey", "wrong-key-wrong-key")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let request = Request::get("/sessions")
        .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_open_api_without_key() {
    let (state, _) = test_state(test_config(None));
    let app = build_router(state);
    let request = Request::get("/sessions").body(Body::empty()).unwrap();
    assert_eq!(app.oneshot(request).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() {
    let (app, _, _) = app_with_key();

    let request = Request::get("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let request = Request::get("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_and_list_sessions() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(&app, Method::GET, "/sessions/sales", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "sales");
    assert_eq!(json["status"], "open");
    assert_eq!(json["me"], "15550001111@s.whatsapp.net");
    assert_eq!(json["chatwoot_enabled"], false);

    let (status, json) = call(&app, Method::GET, "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["sessions"][0]["id"], "sales");
}

#[tokio::test]
async fn test_create_session_errors() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(&app, Method::POST, "/sessions", Some(json!({ "id": "sales" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "conflict");

    let (status, _) = call(&app, Method::POST, "/sessions", Some(json!({ "id": "bad id!" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions",
        Some(json!({ "id": "hooks", "webhook_url": "ftp://example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = call(&app, Method::POST, "/sessions", Some(json!({ "name": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "invalid_input");

    let (status, _) = call(&app, Method::GET, "/sessions/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_qr_formats() {
    let (app, state, _) = app_with_key();
    let (status, _) = call(&app, Method::POST, "/sessions", Some(json!({ "id": "pending-1" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    wait_for_status(&state, "pending-1", SessionStatus::AwaitingScan).await;

    let (status, json) = call(&app, Method::GET, "/sessions/pending-1/qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], QR_CODE);
    assert_eq!(json["count"], 1);

    let request = Request::get("/sessions/pending-1/qr?format=svg")
        .header("apikey", API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/svg+xml");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("<svg"));

    let (status, _) = call(&app, Method::GET, "/sessions/pending-1/qr?format=gif", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_logout_and_delete() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(&app, Method::POST, "/sessions/sales/logout", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "logged_out");

    let (status, _) = call(&app, Method::DELETE, "/sessions/sales", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, Method::GET, "/sessions/sales", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_webhook() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(
        &app,
        Method::PUT,
        "/sessions/sales/webhook",
        Some(json!({ "url": "https://hooks.test/wa" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["webhook_url"], "https://hooks.test/wa");

    let (_, json) = call(&app, Method::PUT, "/sessions/sales/webhook", Some(json!({}))).await;
    assert!(json.get("webhook_url").is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages and chats
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_text_normalizes_recipient() {
    let (app, state, factory) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(
        &app,
        Method::POST,
        "/sessions/sales/messages/text",
        Some(json!({ "to": "+1 (555) 123-4567", "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["to"], "15551234567@s.whatsapp.net");
    assert_eq!(json["id"], "MSG1");

    let sent = factory.socket.sent.lock().unwrap();
    assert!(matches!(&sent[0].1, OutgoingMessage::Text { text } if text == "hello"));
}

#[tokio::test]
async fn test_send_requires_open_session() {
    let (app, state, _) = app_with_key();
    call(&app, Method::POST, "/sessions", Some(json!({ "id": "pending-2" }))).await;
    wait_for_status(&state, "pending-2", SessionStatus::AwaitingScan).await;

    let (status, json) = call(
        &app,
        Method::POST,
        "/sessions/pending-2/messages/text",
        Some(json!({ "to": "15551234567", "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "not_connected");
}

#[tokio::test]
async fn test_send_validation_errors() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions/sales/messages/location",
        Some(json!({ "to": "15551234567", "latitude": 123.0, "longitude": 0.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions/sales/messages/text",
        Some(json!({ "to": "not-a-number", "text": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions/sales/messages/media",
        Some(json!({ "to": "15551234567", "type": "image", "media": { "url": "file:///etc/passwd" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_base64_media() {
    let (app, state, factory) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions/sales/messages/media",
        Some(json!({
            "to": "15551234567",
            "type": "document",
            "media": { "base64": "aGVsbG8=" },
            "file_name": "hello.txt",
            "caption": "the file"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let sent = factory.socket.sent.lock().unwrap();
    match &sent[0].1 {
        OutgoingMessage::Media { source, caption, .. } => {
            assert_eq!(source.as_bytes(), Some(&b"hello"[..]));
            assert_eq!(caption.as_deref(), Some("the file"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_presence() {
    let (app, state, factory) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/sessions/sales/chats/presence",
        Some(json!({ "to": "15551234567", "presence": "composing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        factory.socket.presences.lock().unwrap()[0],
        ("15551234567@s.whatsapp.net".to_string(), ChatPresence::Composing)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Groups
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_group_routes() {
    let (app, state, factory) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(
        &app,
        Method::POST,
        "/sessions/sales/groups",
        Some(json!({ "subject": "Team", "participants": ["15551234567"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["participants"][0]["jid"], "15551234567@s.whatsapp.net");

    let (status, json) = call(&app, Method::GET, "/sessions/sales/groups/120363000000000001", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["jid"], "120363000000000001@g.us");
    assert_eq!(json["participants"][0]["admin"], "superadmin");

    let (status, json) = call(
        &app,
        Method::POST,
        "/sessions/sales/groups/120363000000000001@g.us/participants",
        Some(json!({ "action": "add", "participants": ["15551234567", "15557654321"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["status"], 200);
    assert_eq!(json["results"][1]["status"], 403);

    let (status, json) = call(&app, Method::GET, "/sessions/sales/groups/120363000000000001/invite", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["url"], "https://chat.whatsapp.com/AbCdEfGh123");

    let (status, _) = call(
        &app,
        Method::PUT,
        "/sessions/sales/groups/120363000000000001/subject",
        Some(json!({ "subject": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::DELETE, "/sessions/sales/groups/120363000000000001", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(factory.socket.left.lock().unwrap()[0], "120363000000000001@g.us");

    let (status, _) = call(&app, Method::GET, "/sessions/sales/groups/not-a-group", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─────────────────────────────────────────────────────────────────────────────
// Chatwoot
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chatwoot_settings_defaults_and_validation() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let (status, json) = call(&app, Method::GET, "/sessions/sales/chatwoot", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["enabled"], false);
    assert_eq!(json["merge_brazil_contacts"], true);
    assert_eq!(json["webhook_url"], "https://wa.test/chatwoot/webhook/sales");

    let (status, _) = call(
        &app,
        Method::PUT,
        "/sessions/sales/chatwoot",
        Some(json!({ "enabled": true, "url": "not a url", "account_id": 1, "token": "t" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chatwoot_webhook_is_public() {
    let (app, state, _) = app_with_key();
    open_session(&app, &state, "sales").await;

    let request = Request::post("/chatwoot/webhook/sales")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "event": "message_created", "message_type": "outgoing", "content": "hi" }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ignored");
}
