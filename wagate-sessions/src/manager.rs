//! Session registry and per-session supervisor.
//!
//! Every running session has one supervisor task:
//!
//! ```text
//!            ┌──────────────────────────────────────────────────┐
//!            ▼                                                  │
//! connect ─► consume SocketEvents ─► Disconnected(reason) ─► policy
//!              │ Qr        → store code, count, maybe close      ├─ Reconnect(d): sleep d
//!              │ Connected → status open, persist me             ├─ ClearCredentials: wipe, stop
//!              │ Message   → broadcast                           └─ Stop
//! ```
//!
//! Restart and logout abort the task and bump the handle's generation, so a
//! superseded task can never write state again.

use crate::events::{SessionEvent, SessionStatus};
use crate::message::{OutgoingMessage, SentMessage};
use crate::reconnect::{ReconnectAction, ReconnectPolicy};
use crate::socket::{DisconnectReason, Socket, SocketError, SocketEvent, SocketFactory};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::Instrument;
use wagate_common::{jid, util, Error, Result, SessionsConfig};
use wagate_store::{AuthState, Creds, SessionRecord, Store};

const EVENT_BUFFER: usize = 256;
const SOCKET_EVENT_BUFFER: usize = 64;

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// QR codes shown before an unscanned session is closed.
    pub qr_limit: u32,
    pub policy: ReconnectPolicy,
}

impl From<&SessionsConfig> for ManagerOptions {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            qr_limit: config.qr_limit,
            policy: ReconnectPolicy::from(&config.reconnect),
        }
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

/// Public snapshot of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    pub qr_available: bool,
    pub qr_count: u32,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub chatwoot_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Latest pairing code of a session.
#[derive(Debug, Clone, Serialize)]
pub struct QrSnapshot {
    pub code: String,
    pub count: u32,
}

struct SessionHandle {
    record: SessionRecord,
    status: SessionStatus,
    socket: Option<Arc<dyn Socket>>,
    qr: Option<String>,
    qr_count: u32,
    retries: u32,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn new(record: SessionRecord, status: SessionStatus) -> Self {
        Self {
            record,
            status,
            socket: None,
            qr: None,
            qr_count: 0,
            retries: 0,
            generation: 0,
            task: None,
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.record.id.clone(),
            status: self.status,
            me: self.record.me_jid.clone(),
            qr_available: self.qr.is_some(),
            qr_count: self.qr_count,
            retries: self.retries,
            webhook_url: self.record.webhook_url.clone(),
            chatwoot_enabled: self
                .record
                .chatwoot
                .as_ref()
                .and_then(|c| c.get("enabled"))
                .and_then(|e| e.as_bool())
                .unwrap_or(false),
            created_at: self.record.created_at,
            updated_at: self.record.updated_at,
        }
    }

    /// Stop the supervisor and detach the socket. Returns the socket so the
    /// caller can close or log it out outside the registry lock.
    fn stop(&mut self) -> Option<Arc<dyn Socket>> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.qr = None;
        self.socket.take()
    }

    fn set_status(&mut self, status: SessionStatus) -> SessionRecord {
        self.status = status;
        self.record.status = status.as_str().to_string();
        self.record.touch();
        self.record.clone()
    }
}

struct Inner {
    store: Arc<dyn Store>,
    factory: Arc<dyn SocketFactory>,
    http: reqwest::Client,
    options: ManagerOptions,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Owns every session's socket and lifecycle.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        factory: Arc<dyn SocketFactory>,
        options: ManagerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                store,
                factory,
                http: reqwest::Client::new(),
                options,
                sessions: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Receive every session event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Register a new session and start connecting it.
    pub async fn create_session(
        &self,
        id: &str,
        webhook_url: Option<String>,
    ) -> Result<SessionInfo> {
        if !util::is_valid_session_id(id) {
            return Err(Error::InvalidInput(format!(
                "session id '{id}' must be 1-64 characters of [A-Za-z0-9_-]"
            )));
        }

        let record = {
            let mut sessions = self.inner.sessions.write().await;
            if sessions.contains_key(id) {
                return Err(Error::Conflict(format!("session '{id}' already exists")));
            }
            if self
                .inner
                .store
                .get_session(id)
                .await
                .map_err(internal)?
                .is_some()
            {
                return Err(Error::Conflict(format!("session '{id}' already exists")));
            }

            let mut record = SessionRecord::new(id);
            record.webhook_url = webhook_url;
            record.status = SessionStatus::Connecting.as_str().to_string();
            sessions.insert(
                id.to_string(),
                SessionHandle::new(record.clone(), SessionStatus::Connecting),
            );
            record
        };

        if let Err(e) = self.inner.store.upsert_session(&record).await {
            self.inner.sessions.write().await.remove(id);
            return Err(internal(e));
        }

        tracing::info!(session = %id, "Session created");
        self.start(id).await?;
        self.info(id).await
    }

    /// Bring persisted sessions back after a restart. Returns how many were
    /// started.
    pub async fn restore_sessions(&self) -> Result<usize> {
        let records = self.inner.store.list_sessions().await.map_err(internal)?;
        let mut started = 0;

        for record in records {
            let id = record.id.clone();
            if self.inner.sessions.read().await.contains_key(&id) {
                continue;
            }

            let previous = record
                .status
                .parse::<SessionStatus>()
                .unwrap_or(SessionStatus::Closed);
            let auth = AuthState::new(self.inner.store.clone(), &id);
            let resume = match previous {
                SessionStatus::LoggedOut => false,
                SessionStatus::Connecting | SessionStatus::AwaitingScan => true,
                _ => auth.has_credentials().await,
            };

            let status = if previous == SessionStatus::LoggedOut {
                SessionStatus::LoggedOut
            } else {
                SessionStatus::Closed
            };
            self.inner
                .sessions
                .write()
                .await
                .insert(id.clone(), SessionHandle::new(record, status));

            if resume {
                match self.start(&id).await {
                    Ok(()) => started += 1,
                    Err(e) => tracing::warn!(session = %id, error = %e, "Failed to restore session"),
                }
            } else {
                tracing::debug!(session = %id, status = %status, "Session left idle on restore");
            }
        }

        tracing::info!(started, "Sessions restored");
        Ok(started)
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(SessionHandle::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub async fn info(&self, id: &str) -> Result<SessionInfo> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(id)
            .map(SessionHandle::info)
            .ok_or_else(|| not_found(id))
    }

    /// Persisted record, including provider settings.
    pub async fn record(&self, id: &str) -> Result<SessionRecord> {
        let sessions = self.inner.sessions.read().await;
        sessions
            .get(id)
            .map(|h| h.record.clone())
            .ok_or_else(|| not_found(id))
    }

    pub async fn qr(&self, id: &str) -> Result<QrSnapshot> {
        let sessions = self.inner.sessions.read().await;
        let handle = sessions.get(id).ok_or_else(|| not_found(id))?;
        handle
            .qr
            .as_ref()
            .map(|code| QrSnapshot {
                code: code.clone(),
                count: handle.qr_count,
            })
            .ok_or_else(|| Error::NotFound(format!("no QR code pending for session '{id}'")))
    }

    /// Replace the per-session webhook URL.
    pub async fn set_webhook(&self, id: &str, url: Option<String>) -> Result<SessionRecord> {
        self.update_record(id, |record| record.webhook_url = url).await
    }

    /// Replace the per-session Chatwoot settings.
    pub async fn set_chatwoot(
        &self,
        id: &str,
        settings: Option<serde_json::Value>,
    ) -> Result<SessionRecord> {
        self.update_record(id, |record| record.chatwoot = settings)
            .await
    }

    async fn update_record(
        &self,
        id: &str,
        f: impl FnOnce(&mut SessionRecord),
    ) -> Result<SessionRecord> {
        let record = {
            let mut sessions = self.inner.sessions.write().await;
            let handle = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            f(&mut handle.record);
            handle.record.touch();
            handle.record.clone()
        };
        self.inner
            .store
            .upsert_session(&record)
            .await
            .map_err(internal)?;
        Ok(record)
    }

    /// Drop the current connection and start over with a fresh retry budget.
    pub async fn restart(&self, id: &str) -> Result<SessionInfo> {
        let socket = {
            let mut sessions = self.inner.sessions.write().await;
            let handle = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            handle.stop()
        };

        if let Some(socket) = socket {
            if let Err(e) = socket.close().await {
                tracing::debug!(session = %id, error = %e, "Close before restart failed");
            }
        }

        tracing::info!(session = %id, "Restarting session");
        self.start(id).await?;
        self.info(id).await
    }

    /// Unlink the device and wipe credentials. The record is kept.
    pub async fn logout(&self, id: &str) -> Result<SessionInfo> {
        let socket = {
            let mut sessions = self.inner.sessions.write().await;
            let handle = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            handle.stop()
        };

        if let Some(socket) = socket {
            if let Err(e) = socket.logout().await {
                tracing::warn!(session = %id, error = %e, "Logout request failed; clearing local state anyway");
            }
        }

        self.inner.wipe_credentials(id).await;

        let record = {
            let mut sessions = self.inner.sessions.write().await;
            let handle = sessions.get_mut(id).ok_or_else(|| not_found(id))?;
            handle.record.me_jid = None;
            handle.qr_count = 0;
            handle.retries = 0;
            handle.set_status(SessionStatus::LoggedOut)
        };
        self.inner.persist(&record).await;
        self.inner.emit(SessionEvent::ConnectionUpdate {
            session_id: id.to_string(),
            status: SessionStatus::LoggedOut,
            reason: None,
        });

        tracing::info!(session = %id, "Session logged out");
        self.info(id).await
    }

    /// Log out (when connected) and forget the session entirely.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (socket, was_open) = {
            let mut sessions = self.inner.sessions.write().await;
            let mut handle = sessions.remove(id).ok_or_else(|| not_found(id))?;
            let was_open = handle.status == SessionStatus::Open;
            (handle.stop(), was_open)
        };

        if let Some(socket) = socket {
            let result = if was_open {
                socket.logout().await
            } else {
                socket.close().await
            };
            if let Err(e) = result {
                tracing::warn!(session = %id, error = %e, "Socket shutdown failed during delete");
            }
        }

        self.inner.wipe_credentials(id).await;
        self.inner
            .store
            .delete_session(id)
            .await
            .map_err(internal)?;

        self.inner.emit(SessionEvent::ConnectionUpdate {
            session_id: id.to_string(),
            status: SessionStatus::Closed,
            reason: None,
        });
        tracing::info!(session = %id, "Session deleted");
        Ok(())
    }

    /// The live socket of an open session.
    pub async fn socket(&self, id: &str) -> Result<Arc<dyn Socket>> {
        let sessions = self.inner.sessions.read().await;
        let handle = sessions.get(id).ok_or_else(|| not_found(id))?;
        match (&handle.socket, handle.status) {
            (Some(socket), SessionStatus::Open) => Ok(socket.clone()),
            _ => Err(Error::NotConnected(format!(
                "session '{id}' is {}",
                handle.status
            ))),
        }
    }

    /// Validate, resolve media, and send.
    pub async fn send_message(
        &self,
        id: &str,
        to: &str,
        message: OutgoingMessage,
    ) -> Result<SentMessage> {
        message.validate()?;
        let to = jid::normalize_recipient(to)?;
        let socket = self.socket(id).await?;

        let kind = message.kind();
        let message = message.resolve(&self.inner.http).await?;
        let sent = socket.send_message(&to, message).await.map_err(Error::from)?;

        tracing::info!(session = %id, to = %to, kind, message_id = %sent.id, "Message sent");
        self.inner.emit(SessionEvent::MessageSent {
            session_id: id.to_string(),
            kind: kind.to_string(),
            message: sent.clone(),
        });
        Ok(sent)
    }

    /// Close every socket. Persisted statuses are left as they are so the
    /// next start resumes the same sessions.
    pub async fn shutdown(&self) {
        let sockets: Vec<(String, Arc<dyn Socket>)> = {
            let mut sessions = self.inner.sessions.write().await;
            sessions
                .iter_mut()
                .filter_map(|(id, handle)| handle.stop().map(|s| (id.clone(), s)))
                .collect()
        };

        for (id, socket) in sockets {
            if let Err(e) = socket.close().await {
                tracing::debug!(session = %id, error = %e, "Socket close failed during shutdown");
            }
        }
        tracing::info!("Session manager stopped");
    }

    /// Spawn a supervisor for a registered session.
    async fn start(&self, id: &str) -> Result<()> {
        let mut sessions = self.inner.sessions.write().await;
        let handle = sessions.get_mut(id).ok_or_else(|| not_found(id))?;

        if let Some(stale) = handle.stop() {
            tokio::spawn(async move {
                let _ = stale.close().await;
            });
        }
        handle.retries = 0;
        handle.qr_count = 0;
        let generation = handle.generation;
        let record = handle.set_status(SessionStatus::Connecting);

        let span = wagate_common::session_span!(id);
        let task = tokio::spawn(
            supervise(self.inner.clone(), id.to_string(), generation).instrument(span),
        );
        handle.task = Some(task);
        drop(sessions);

        self.inner.persist(&record).await;
        self.inner.emit(SessionEvent::ConnectionUpdate {
            session_id: id.to_string(),
            status: SessionStatus::Connecting,
            reason: None,
        });
        Ok(())
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn persist(&self, record: &SessionRecord) {
        if let Err(e) = self.store.upsert_session(record).await {
            tracing::warn!(session = %record.id, error = %e, "Failed to persist session record");
        }
    }

    async fn wipe_credentials(&self, id: &str) {
        let auth = AuthState::new(self.store.clone(), id);
        if let Err(e) = auth.clear().await {
            tracing::warn!(session = %id, error = %e, "Failed to clear auth state");
        }
        if let Err(e) = self.factory.purge(id).await {
            tracing::warn!(session = %id, error = %e, "Failed to purge driver state");
        }
    }

    /// Apply `f` to the handle if `generation` is still current.
    async fn with_handle<R>(
        &self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut SessionHandle) -> R,
    ) -> Option<R> {
        let mut sessions = self.sessions.write().await;
        let handle = sessions.get_mut(id)?;
        if handle.generation != generation {
            return None;
        }
        Some(f(handle))
    }

    /// Set status, persist, broadcast. False when superseded.
    async fn transition(
        &self,
        id: &str,
        generation: u64,
        status: SessionStatus,
        reason: Option<DisconnectReason>,
    ) -> bool {
        let Some(record) = self
            .with_handle(id, generation, |h| h.set_status(status))
            .await
        else {
            return false;
        };
        self.persist(&record).await;
        self.emit(SessionEvent::ConnectionUpdate {
            session_id: id.to_string(),
            status,
            reason,
        });
        true
    }

    async fn on_connected(&self, id: &str, generation: u64, me: Option<String>) -> bool {
        let updated = self
            .with_handle(id, generation, |h| {
                h.retries = 0;
                h.qr = None;
                h.qr_count = 0;
                if me.is_some() {
                    h.record.me_jid = me.clone();
                }
            })
            .await;
        if updated.is_none() {
            return false;
        }

        let auth = AuthState::new(self.store.clone(), id);
        let mut creds = match auth.creds().await {
            Ok(creds) => creds.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable credentials; rewriting");
                Creds::default()
            }
        };
        if me.is_some() {
            creds.me = me.clone();
        }
        creds.registered = true;
        creds
            .paired_at
            .get_or_insert_with(|| chrono::Utc::now().timestamp_millis());
        if let Err(e) = auth.save_creds(&creds).await {
            tracing::warn!(error = %e, "Failed to save credentials");
        }

        tracing::info!(me = ?me, "WhatsApp connection open");
        self.transition(id, generation, SessionStatus::Open, None)
            .await
    }

    /// Returns false when the session must stop (superseded or QR limit).
    async fn on_qr(&self, id: &str, generation: u64, code: String) -> bool {
        let limit = self.options.qr_limit;
        let outcome = self
            .with_handle(id, generation, |h| {
                h.qr_count += 1;
                if h.qr_count > limit {
                    h.qr = None;
                    Err(h.socket.take())
                } else {
                    h.qr = Some(code.clone());
                    let changed = h.status != SessionStatus::AwaitingScan;
                    let record = changed.then(|| h.set_status(SessionStatus::AwaitingScan));
                    Ok((h.qr_count, record))
                }
            })
            .await;

        match outcome {
            None => false,
            Some(Err(socket)) => {
                tracing::warn!(limit, "QR code limit reached without a scan; closing session");
                if let Some(socket) = socket {
                    let _ = socket.close().await;
                }
                self.transition(id, generation, SessionStatus::Closed, None)
                    .await;
                false
            }
            Some(Ok((count, record))) => {
                tracing::info!(count, "New pairing QR code");
                if let Some(record) = record {
                    self.persist(&record).await;
                    self.emit(SessionEvent::ConnectionUpdate {
                        session_id: id.to_string(),
                        status: SessionStatus::AwaitingScan,
                        reason: None,
                    });
                }
                self.emit(SessionEvent::QrUpdated {
                    session_id: id.to_string(),
                    code,
                    count,
                });
                true
            }
        }
    }
}

enum Outcome {
    Disconnected(DisconnectReason),
    /// Stop without consulting the policy (already handled).
    Halt,
}

/// Connection loop for one session.
async fn supervise(inner: Arc<Inner>, id: String, generation: u64) {
    loop {
        let (tx, mut rx) = mpsc::channel(SOCKET_EVENT_BUFFER);
        let auth = AuthState::new(inner.store.clone(), &id);

        let outcome = match inner.factory.connect(&id, auth, tx).await {
            Ok(socket) => {
                let attached = inner
                    .with_handle(&id, generation, |h| h.socket = Some(socket.clone()))
                    .await;
                if attached.is_none() {
                    let _ = socket.close().await;
                    return;
                }
                consume(&inner, &id, generation, &mut rx).await
            }
            Err(SocketError::Unsupported(what)) => {
                tracing::error!(driver = inner.factory.name(), "Cannot connect: {what}");
                inner
                    .transition(&id, generation, SessionStatus::Closed, None)
                    .await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Connect failed");
                Outcome::Disconnected(DisconnectReason::ConnectionClosed)
            }
        };

        let reason = match outcome {
            Outcome::Halt => return,
            Outcome::Disconnected(reason) => reason,
        };

        let Some((stale, attempt)) = inner
            .with_handle(&id, generation, |h| {
                h.qr = None;
                (h.socket.take(), h.retries)
            })
            .await
        else {
            return;
        };
        if let Some(stale) = stale {
            if let Err(e) = stale.close().await {
                tracing::debug!(error = %e, "Closing dropped socket failed");
            }
        }

        match inner.options.policy.decide(reason, attempt) {
            ReconnectAction::Reconnect(delay) => {
                if ReconnectPolicy::counts_as_retry(reason) {
                    inner
                        .with_handle(&id, generation, |h| h.retries += 1)
                        .await;
                }
                tracing::info!(
                    reason = %reason,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                if !inner
                    .transition(&id, generation, SessionStatus::Reconnecting, Some(reason))
                    .await
                {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
            ReconnectAction::ClearCredentials => {
                tracing::warn!(reason = %reason, "Credentials invalidated; clearing auth state");
                inner.wipe_credentials(&id).await;
                inner
                    .with_handle(&id, generation, |h| h.record.me_jid = None)
                    .await;
                inner
                    .transition(&id, generation, SessionStatus::LoggedOut, Some(reason))
                    .await;
                return;
            }
            ReconnectAction::Stop => {
                tracing::warn!(reason = %reason, attempts = attempt, "Giving up on session");
                inner
                    .transition(&id, generation, SessionStatus::Closed, Some(reason))
                    .await;
                return;
            }
        }
    }
}

async fn consume(
    inner: &Inner,
    id: &str,
    generation: u64,
    rx: &mut mpsc::Receiver<SocketEvent>,
) -> Outcome {
    while let Some(event) = rx.recv().await {
        match event {
            SocketEvent::Qr(code) => {
                if !inner.on_qr(id, generation, code).await {
                    return Outcome::Halt;
                }
            }
            SocketEvent::Connected { me } => {
                if !inner.on_connected(id, generation, me).await {
                    return Outcome::Halt;
                }
            }
            SocketEvent::Disconnected(reason) => return Outcome::Disconnected(reason),
            SocketEvent::Message(message) => {
                let preview = message
                    .text
                    .as_deref()
                    .map(|t| util::truncate_with_ellipsis(t, 40))
                    .unwrap_or_default();
                tracing::debug!(
                    chat = %message.chat,
                    from_me = message.from_me,
                    preview = %preview,
                    "Message received"
                );
                inner.emit(SessionEvent::MessageReceived {
                    session_id: id.to_string(),
                    message,
                });
            }
        }
    }
    // Driver dropped its sender without saying why.
    Outcome::Disconnected(DisconnectReason::ConnectionClosed)
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("session '{id}' not found"))
}

fn internal(e: anyhow::Error) -> Error {
    Error::Internal(format!("{e:#}"))
}
