//! The seam between the session manager and the WhatsApp protocol library.
//!
//! A [`SocketFactory`] opens one [`Socket`] per session. The socket reports
//! lifecycle and inbound traffic through an `mpsc` channel of
//! [`SocketEvent`]s; the manager's supervisor task consumes it.

use crate::message::{IncomingMessage, OutgoingMessage, SentMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use wagate_store::AuthState;

/// Result type for socket operations.
pub type SocketResult<T> = Result<T, SocketError>;

/// Socket error type.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("Socket not connected")]
    NotConnected,

    #[error("Invalid JID: {0}")]
    InvalidJid(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// WhatsApp answered but refused the request.
    #[error("Rejected by WhatsApp: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SocketError> for wagate_common::Error {
    fn from(err: SocketError) -> Self {
        use wagate_common::Error;
        match err {
            SocketError::NotConnected => Error::NotConnected("socket is not open".into()),
            SocketError::InvalidJid(jid) => Error::InvalidInput(format!("invalid JID '{jid}'")),
            SocketError::Unsupported(what) => Error::InvalidInput(format!("unsupported: {what}")),
            SocketError::Rejected(msg) => Error::InvalidInput(msg),
            SocketError::Protocol(msg) => Error::External(format!("whatsapp: {msg}")),
            SocketError::Io(e) => Error::Io(e),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    /// The server asks for a fresh connection, typically right after pairing.
    RestartRequired,
    /// Another client opened this session.
    ConnectionReplaced,
    /// The device was unlinked from the phone.
    LoggedOut,
    BadSession,
    MultideviceMismatch,
}

impl DisconnectReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection_closed",
            Self::ConnectionLost => "connection_lost",
            Self::TimedOut => "timed_out",
            Self::RestartRequired => "restart_required",
            Self::ConnectionReplaced => "connection_replaced",
            Self::LoggedOut => "logged_out",
            Self::BadSession => "bad_session",
            Self::MultideviceMismatch => "multidevice_mismatch",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a socket reports to its supervisor.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// A new pairing QR code; the previous one is no longer valid.
    Qr(String),
    Connected { me: Option<String> },
    Disconnected(DisconnectReason),
    Message(IncomingMessage),
}

/// Chat presence ("typing..." and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPresence {
    Composing,
    Recording,
    Paused,
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: String,
    /// `admin`, `superadmin`, or absent for regular members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub jid: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Creation time (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Promote => "promote",
            Self::Demote => "demote",
        }
    }
}

/// Per-participant outcome of a group membership change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantResult {
    pub jid: String,
    /// `200` on success, otherwise the WhatsApp error code (403, 408, 409...).
    pub status: u16,
}

/// A live WhatsApp connection.
#[async_trait]
pub trait Socket: Send + Sync {
    /// Send a message. Media must already be resolved to bytes.
    async fn send_message(&self, to: &str, message: OutgoingMessage) -> SocketResult<SentMessage>;

    async fn send_presence(&self, to: &str, presence: ChatPresence) -> SocketResult<()>;

    async fn group_create(&self, subject: &str, participants: &[String]) -> SocketResult<GroupInfo>;

    async fn group_metadata(&self, jid: &str) -> SocketResult<GroupInfo>;

    async fn group_participants_update(
        &self,
        jid: &str,
        participants: &[String],
        action: ParticipantAction,
    ) -> SocketResult<Vec<ParticipantResult>>;

    /// Invite code (the part after `https://chat.whatsapp.com/`).
    async fn group_invite_code(&self, jid: &str) -> SocketResult<String>;

    async fn group_update_subject(&self, jid: &str, subject: &str) -> SocketResult<()>;

    async fn group_leave(&self, jid: &str) -> SocketResult<()>;

    /// Unlink this device and drop local credentials.
    async fn logout(&self) -> SocketResult<()>;

    /// Close the connection, keeping credentials for a later resume.
    async fn close(&self) -> SocketResult<()>;
}

/// Opens sockets.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &str;

    /// Start connecting a session. Returns as soon as the socket exists;
    /// pairing and connection progress arrive on `events`.
    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
        events: mpsc::Sender<SocketEvent>,
    ) -> SocketResult<Arc<dyn Socket>>;

    /// Remove any driver-local state kept for a session.
    async fn purge(&self, _session_id: &str) -> SocketResult<()> {
        Ok(())
    }
}
