//! Outbound event webhooks.
//!
//! Every [`SessionEvent`] becomes a POST of
//! `{ "event", "session", "data", "date_time" }` to the session's webhook URL,
//! or to the global `webhook.url` when the session has none.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use wagate_common::config::WebhookConfig;
use wagate_sessions::{SessionEvent, SessionManager};

/// Body POSTed to webhook receivers.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEnvelope {
    pub event: &'static str,
    pub session: String,
    pub data: Value,
    pub date_time: String,
}

impl WebhookEnvelope {
    pub fn from_event(event: &SessionEvent) -> Self {
        let (name, data) = match event {
            SessionEvent::QrUpdated { code, count, .. } => {
                ("qrcode.updated", json!({ "code": code, "count": count }))
            }
            SessionEvent::ConnectionUpdate { status, reason, .. } => (
                "connection.update",
                json!({ "status": status, "reason": reason }),
            ),
            SessionEvent::MessageReceived { message, .. } => {
                ("messages.upsert", serde_json::to_value(message).unwrap_or(Value::Null))
            }
            SessionEvent::MessageSent { kind, message, .. } => (
                "send.message",
                json!({ "kind": kind, "message": message }),
            ),
        };
        Self {
            event: name,
            session: event.session_id().to_string(),
            data,
            date_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub struct WebhookDispatcher {
    config: WebhookConfig,
    manager: SessionManager,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig, manager: SessionManager) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            config,
            manager,
            client,
        }
    }

    /// Where events of a session go, if anywhere.
    async fn target(&self, session_id: &str) -> Option<String> {
        let per_session = self
            .manager
            .info(session_id)
            .await
            .ok()
            .and_then(|info| info.webhook_url)
            .filter(|u| !u.trim().is_empty());
        per_session.or_else(|| self.config.url.clone().filter(|u| !u.trim().is_empty()))
    }

    /// Deliver one event. Failures are logged, never retried.
    pub async fn dispatch(&self, event: &SessionEvent) {
        let envelope = WebhookEnvelope::from_event(event);
        if !self.config.wants(envelope.event) {
            return;
        }
        let Some(url) = self.target(&envelope.session).await else {
            return;
        };

        match self.client.post(&url).json(&envelope).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(event = envelope.event, session = %envelope.session, "Webhook delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    event = envelope.event,
                    session = %envelope.session,
                    status = %response.status(),
                    "Webhook receiver returned an error"
                );
            }
            Err(e) => {
                tracing::warn!(
                    event = envelope.event,
                    session = %envelope.session,
                    error = %e,
                    "Webhook delivery failed"
                );
            }
        }
    }

    /// Deliver events until the channel closes.
    ///
    /// Each session gets its own worker, so a session's events reach the
    /// receiver in the order they happened while a slow receiver only holds
    /// up its own session.
    pub fn spawn(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut workers: HashMap<String, mpsc::UnboundedSender<SessionEvent>> = HashMap::new();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let session_id = event.session_id().to_string();
                        let worker = workers
                            .entry(session_id.clone())
                            .or_insert_with(|| self.clone().spawn_worker(session_id.clone()));
                        if let Err(mpsc::error::SendError(event)) = worker.send(event) {
                            // Worker gone; start a fresh one for this session.
                            let worker = self.clone().spawn_worker(session_id.clone());
                            let _ = worker.send(event);
                            workers.insert(session_id, worker);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Webhook dispatcher lagging; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_worker(self: Arc<Self>, session_id: String) -> mpsc::UnboundedSender<SessionEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.dispatch(&event).await;
            }
            tracing::debug!(session = %session_id, "Webhook worker stopped");
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wagate_sessions::{SentMessage, SessionStatus};

    #[test]
    fn test_envelope_names() {
        let qr = WebhookEnvelope::from_event(&SessionEvent::QrUpdated {
            session_id: "s1".into(),
            code: "2@abc".into(),
            count: 2,
        });
        assert_eq!(qr.event, "qrcode.updated");
        assert_eq!(qr.session, "s1");
        assert_eq!(qr.data["count"], 2);

        let update = WebhookEnvelope::from_event(&SessionEvent::ConnectionUpdate {
            session_id: "s1".into(),
            status: SessionStatus::Open,
            reason: None,
        });
        assert_eq!(update.event, "connection.update");
        assert_eq!(update.data["status"], "open");

        let sent = WebhookEnvelope::from_event(&SessionEvent::MessageSent {
            session_id: "s1".into(),
            kind: "text".into(),
            message: SentMessage::now("ID1", "1555@s.whatsapp.net"),
        });
        assert_eq!(sent.event, "send.message");
        assert_eq!(sent.data["message"]["id"], "ID1");
    }
}
