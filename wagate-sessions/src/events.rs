//! Session lifecycle states and the events broadcast to subscribers.

use crate::message::{IncomingMessage, SentMessage};
use crate::socket::DisconnectReason;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    /// A QR code is waiting to be scanned.
    AwaitingScan,
    Open,
    Reconnecting,
    Closed,
    LoggedOut,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingScan => "awaiting_scan",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::LoggedOut => "logged_out",
        }
    }

    /// States in which a supervisor task is (or should be) running.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingScan | Self::Open | Self::Reconnecting
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "awaiting_scan" => Ok(Self::AwaitingScan),
            "open" => Ok(Self::Open),
            "reconnecting" => Ok(Self::Reconnecting),
            "closed" => Ok(Self::Closed),
            "logged_out" => Ok(Self::LoggedOut),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Broadcast to every [`crate::SessionManager::subscribe`] receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    QrUpdated {
        session_id: String,
        code: String,
        count: u32,
    },
    ConnectionUpdate {
        session_id: String,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DisconnectReason>,
    },
    MessageReceived {
        session_id: String,
        message: IncomingMessage,
    },
    MessageSent {
        session_id: String,
        /// `text`, `image`, `location`, ...
        kind: String,
        message: SentMessage,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::QrUpdated { session_id, .. }
            | Self::ConnectionUpdate { session_id, .. }
            | Self::MessageReceived { session_id, .. }
            | Self::MessageSent { session_id, .. } => session_id,
        }
    }
}
